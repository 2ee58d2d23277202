//! WebSocket transport for the realtime protocol.
//!
//! `open` performs the handshake, sends the `setup` message and spawns a pump
//! task that multiplexes outbound messages with the inbound stream. There is
//! no reconnection: a dropped socket surfaces as an error or close event and
//! the session decides what to do.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use super::messages::{
    ClientMessage, Content, GenerationConfig, PrebuiltVoiceConfig, RealtimeInput, ServerMessage,
    SetupMessage, SpeechConfig, VoiceConfig,
};
use super::{
    OpenConfig, Transport, TransportConnection, TransportError, TransportEvent, TransportHandle,
};
use crate::codec::AudioBlob;

/// Channel capacity for outbound WebSocket messages
const WS_CHANNEL_CAPACITY: usize = 256;

/// Channel capacity for inbound events awaiting the session
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Connection settings for [`WebSocketTransport`]
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// `ws://` or `wss://` endpoint
    pub url: String,
    /// Sent as a bearer token when present
    pub api_key: Option<String>,
    pub model: String,
    /// Prebuilt voice name for the remote speaker
    pub voice: Option<String>,
    pub connect_timeout: Duration,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8765/v1/live".to_string(),
            api_key: None,
            model: "models/live-audio".to_string(),
            voice: None,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// [`Transport`] over a single WebSocket connection per session
pub struct WebSocketTransport {
    config: WebSocketConfig,
}

impl WebSocketTransport {
    pub fn new(config: WebSocketConfig) -> Result<Self, TransportError> {
        let url = url::Url::parse(&config.url)
            .map_err(|e| TransportError::ConnectionFailed(format!("{}: {}", config.url, e)))?;

        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(TransportError::ConnectionFailed(format!(
                "unsupported scheme '{}' (expected ws or wss)",
                url.scheme()
            )));
        }

        Ok(Self { config })
    }

    fn build_setup(&self, open: &OpenConfig) -> ClientMessage {
        ClientMessage::Setup(SetupMessage {
            model: self.config.model.clone(),
            system_instruction: open.instructions.as_deref().map(Content::text),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: self.config.voice.as_ref().map(|voice| SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: voice.clone(),
                        },
                    },
                }),
            },
        })
    }
}

#[async_trait::async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, config: &OpenConfig) -> Result<TransportConnection, TransportError> {
        info!(
            "Connecting to {} for session {}",
            self.config.url, config.session_id
        );

        let mut request = self
            .config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        if let Some(key) = &self.config.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (ws_stream, _response) = tokio::time::timeout(
            self.config.connect_timeout,
            tokio_tungstenite::connect_async(request),
        )
        .await
        .map_err(|_| TransportError::Timeout(self.config.connect_timeout))?
        .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        let (mut sink, stream) = ws_stream.split();

        let setup = serde_json::to_string(&self.build_setup(config))?;
        sink.send(Message::Text(setup.into()))
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))?;

        info!("Connected to {}", self.config.url);

        let (outbound_tx, outbound_rx) = mpsc::channel(WS_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let open = Arc::new(AtomicBool::new(true));

        tokio::spawn(pump(
            sink,
            stream,
            outbound_rx,
            events_tx,
            Arc::clone(&open),
            config.session_id.clone(),
        ));

        Ok(TransportConnection {
            handle: Box::new(WebSocketHandle {
                outbound: outbound_tx,
                open,
            }),
            events: events_rx,
        })
    }

    fn name(&self) -> &str {
        "websocket"
    }
}

enum Outbound {
    Message(Message),
    Close,
}

struct WebSocketHandle {
    outbound: mpsc::Sender<Outbound>,
    open: Arc<AtomicBool>,
}

impl TransportHandle for WebSocketHandle {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn send_audio(&self, blob: AudioBlob) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }

        let message = ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![blob],
        });
        let json = serde_json::to_string(&message)?;

        self.outbound
            .try_send(Outbound::Message(Message::Text(json.into())))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => TransportError::Backpressure,
                mpsc::error::TrySendError::Closed(_) => TransportError::NotOpen,
            })
    }

    fn close(&self) -> Result<(), TransportError> {
        if !self.open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        // The pump also exits when this handle is dropped, so a full queue
        // only delays the close frame.
        if let Err(mpsc::error::TrySendError::Full(_)) = self.outbound.try_send(Outbound::Close) {
            debug!("Outbound queue full while closing");
        }
        Ok(())
    }
}

async fn pump<S, R>(
    mut sink: S,
    mut stream: R,
    mut outbound: mpsc::Receiver<Outbound>,
    events: mpsc::Sender<TransportEvent>,
    open: Arc<AtomicBool>,
    session_id: String,
) where
    S: futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
    R: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    debug!("WebSocket pump started for session {}", session_id);

    loop {
        tokio::select! {
            out = outbound.recv() => match out {
                Some(Outbound::Message(msg)) => {
                    if let Err(e) = sink.send(msg).await {
                        error!("Failed to send WebSocket message: {}", e);
                        let _ = events
                            .send(TransportEvent::Error(TransportError::WebSocket(e.to_string())))
                            .await;
                        break;
                    }
                }
                Some(Outbound::Close) | None => {
                    if let Err(e) = sink.send(Message::Close(None)).await {
                        debug!("Close frame not delivered: {}", e);
                    }
                    info!("WebSocket closed by client (session {})", session_id);
                    break;
                }
            },

            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => forward(&events, text.as_bytes()).await,
                Some(Ok(Message::Binary(data))) => forward(&events, &data).await,
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = sink.send(Message::Pong(data)).await {
                        warn!("Failed to send pong: {}", e);
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.as_str().to_string())
                        .filter(|r| !r.is_empty());
                    info!("WebSocket closed by server: {:?}", reason);
                    // Flushes the queued close reply
                    if let Err(e) = sink.close().await {
                        debug!("Close handshake not completed: {}", e);
                    }
                    let _ = events.send(TransportEvent::Closed { reason }).await;
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!("WebSocket error: {}", e);
                    let _ = events
                        .send(TransportEvent::Error(TransportError::WebSocket(e.to_string())))
                        .await;
                    break;
                }
                None => {
                    let _ = events.send(TransportEvent::Closed { reason: None }).await;
                    break;
                }
            },
        }
    }

    open.store(false, Ordering::SeqCst);
    debug!("WebSocket pump stopped for session {}", session_id);
}

async fn forward(events: &mpsc::Sender<TransportEvent>, payload: &[u8]) {
    match serde_json::from_slice::<ServerMessage>(payload) {
        Ok(message) => {
            let _ = events.send(TransportEvent::Message(message)).await;
        }
        Err(e) => {
            warn!("Failed to parse server message: {}", e);
        }
    }
}
