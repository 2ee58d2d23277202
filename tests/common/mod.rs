// Shared fakes for integration tests
//
// Not every test binary uses every helper.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::Engine;
use duplex_voice::codec::{self, AudioBlob};
use duplex_voice::session::SessionObserver;
use duplex_voice::transport::messages::{Content, Part};
use duplex_voice::transport::{
    OpenConfig, ServerContent, ServerMessage, Transport, TransportConnection, TransportError,
    TransportEvent, TransportHandle,
};
use duplex_voice::{SessionError, SessionState};
use tokio::sync::mpsc;

/// How [`FakeTransport::open`] behaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenBehavior {
    Succeed,
    Fail,
    /// Never resolves
    Hang,
}

#[derive(Default)]
struct FakeState {
    opens: usize,
    last_open: Option<OpenConfig>,
    events: Option<mpsc::Sender<TransportEvent>>,
    sent: Vec<AudioBlob>,
    closes: usize,
    refuse_sends: bool,
}

/// In-process transport that records what the session does with it
#[derive(Clone)]
pub struct FakeTransport {
    behavior: OpenBehavior,
    state: Arc<Mutex<FakeState>>,
    open: Arc<AtomicBool>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::with_behavior(OpenBehavior::Succeed)
    }

    pub fn with_behavior(behavior: OpenBehavior) -> Self {
        Self {
            behavior,
            state: Arc::new(Mutex::new(FakeState::default())),
            open: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn opens(&self) -> usize {
        self.state.lock().unwrap().opens
    }

    pub fn last_instructions(&self) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .last_open
            .as_ref()
            .and_then(|c| c.instructions.clone())
    }

    pub fn sent(&self) -> Vec<AudioBlob> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn closes(&self) -> usize {
        self.state.lock().unwrap().closes
    }

    /// Pretend the channel is (not) ready for outbound audio
    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }

    /// Make every send fail while the channel still reports open
    pub fn refuse_sends(&self, refuse: bool) {
        self.state.lock().unwrap().refuse_sends = refuse;
    }

    /// Inject an inbound event as if the remote produced it
    pub async fn emit(&self, event: TransportEvent) {
        let tx = self
            .state
            .lock()
            .unwrap()
            .events
            .clone()
            .expect("transport was never opened");
        tx.send(event).await.expect("session stopped listening");
    }

    pub async fn emit_message(&self, message: ServerMessage) {
        self.emit(TransportEvent::Message(message)).await;
    }
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    async fn open(&self, config: &OpenConfig) -> Result<TransportConnection, TransportError> {
        {
            let mut state = self.state.lock().unwrap();
            state.opens += 1;
            state.last_open = Some(config.clone());
        }

        match self.behavior {
            OpenBehavior::Fail => Err(TransportError::ConnectionFailed(
                "connection refused".to_string(),
            )),
            OpenBehavior::Hang => std::future::pending().await,
            OpenBehavior::Succeed => {
                let (tx, rx) = mpsc::channel(64);
                self.state.lock().unwrap().events = Some(tx);
                self.open.store(true, Ordering::SeqCst);

                Ok(TransportConnection {
                    handle: Box::new(FakeHandle {
                        state: Arc::clone(&self.state),
                        open: Arc::clone(&self.open),
                    }),
                    events: rx,
                })
            }
        }
    }

    fn name(&self) -> &str {
        "fake"
    }
}

/// Handle half of [`FakeTransport`], also usable on its own
pub struct FakeHandle {
    state: Arc<Mutex<FakeState>>,
    open: Arc<AtomicBool>,
}

impl FakeHandle {
    pub fn detached(open: bool) -> (Self, FakeTransport) {
        let transport = FakeTransport::new();
        transport.set_open(open);
        (
            Self {
                state: Arc::clone(&transport.state),
                open: Arc::clone(&transport.open),
            },
            transport,
        )
    }
}

impl TransportHandle for FakeHandle {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn send_audio(&self, blob: AudioBlob) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }

        let mut state = self.state.lock().unwrap();
        if state.refuse_sends {
            return Err(TransportError::Backpressure);
        }
        state.sent.push(blob);
        Ok(())
    }

    fn close(&self) -> Result<(), TransportError> {
        self.state.lock().unwrap().closes += 1;
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Everything a session reported to its observer
#[derive(Debug, Clone, PartialEq)]
pub enum Observed {
    Message,
    Error(String),
    Close,
    State(SessionState),
    TurnComplete,
    Speaking(bool),
}

#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<Observed>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Observed> {
        self.events.lock().unwrap().clone()
    }

    fn count(&self, pred: impl Fn(&Observed) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| pred(e)).count()
    }

    pub fn errors(&self) -> usize {
        self.count(|e| matches!(e, Observed::Error(_)))
    }

    pub fn closes(&self) -> usize {
        self.count(|e| matches!(e, Observed::Close))
    }

    pub fn messages(&self) -> usize {
        self.count(|e| matches!(e, Observed::Message))
    }

    pub fn turn_completes(&self) -> usize {
        self.count(|e| matches!(e, Observed::TurnComplete))
    }

    pub fn speaking_changes(&self) -> Vec<bool> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                Observed::Speaking(s) => Some(*s),
                _ => None,
            })
            .collect()
    }

    pub fn states(&self) -> Vec<SessionState> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                Observed::State(s) => Some(*s),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: Observed) {
        self.events.lock().unwrap().push(event);
    }
}

impl SessionObserver for RecordingObserver {
    fn on_message(&self, _message: &ServerMessage) {
        self.push(Observed::Message);
    }

    fn on_error(&self, error: &SessionError) {
        self.push(Observed::Error(error.to_string()));
    }

    fn on_close(&self) {
        self.push(Observed::Close);
    }

    fn on_state_change(&self, state: SessionState) {
        self.push(Observed::State(state));
    }

    fn on_turn_complete(&self) {
        self.push(Observed::TurnComplete);
    }

    fn on_speaking_changed(&self, speaking: bool) {
        self.push(Observed::Speaking(speaking));
    }
}

/// Poll `cond` until it holds, failing the test after a couple of seconds
pub async fn eventually(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

/// Inbound audio message carrying `samples` samples at 24 kHz
pub fn audio_message(samples: usize) -> ServerMessage {
    audio_message_with_data(
        base64::engine::general_purpose::STANDARD
            .encode(codec::f32_to_pcm16_bytes(&vec![0.25; samples])),
    )
}

/// Inbound audio message with an arbitrary payload
pub fn audio_message_with_data(data: String) -> ServerMessage {
    ServerMessage {
        server_content: Some(ServerContent {
            model_turn: Some(Content {
                parts: vec![Part {
                    text: None,
                    inline_data: Some(AudioBlob {
                        mime_type: codec::pcm_mime_type(codec::OUTPUT_SAMPLE_RATE),
                        data,
                    }),
                }],
            }),
            ..ServerContent::default()
        }),
        ..ServerMessage::default()
    }
}

pub fn interrupted_message() -> ServerMessage {
    ServerMessage {
        server_content: Some(ServerContent {
            interrupted: true,
            ..ServerContent::default()
        }),
        ..ServerMessage::default()
    }
}

/// Interruption and new audio in one message
pub fn interrupted_audio_message(samples: usize) -> ServerMessage {
    let mut message = audio_message(samples);
    if let Some(content) = message.server_content.as_mut() {
        content.interrupted = true;
    }
    message
}

pub fn turn_complete_message() -> ServerMessage {
    ServerMessage {
        server_content: Some(ServerContent {
            turn_complete: true,
            ..ServerContent::default()
        }),
        ..ServerMessage::default()
    }
}
