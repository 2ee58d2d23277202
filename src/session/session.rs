use super::config::SessionConfig;
use super::observer::SessionObserver;
use super::state::{SessionState, StateTracker};
use super::stats::{SessionCounters, SessionStats};
use crate::audio::{
    AudioDeviceProvider, CaptureConfig, CaptureDevice, DeviceError, PlaybackConfig,
    PlaybackDevice, SourceId,
};
use crate::capture::{CapturePipeline, FrameOutcome, FRAME_QUEUE_DEPTH};
use crate::codec;
use crate::error::SessionError;
use crate::playback::{AudioChunk, PlaybackScheduler};
use crate::transport::{
    OpenConfig, ServerMessage, Transport, TransportError, TransportEvent, TransportHandle,
};
use chrono::{DateTime, Utc};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, watch, Notify};
use tracing::{debug, error, info, warn};

/// Commands from the session handle to its event loop
#[derive(Debug)]
enum Command {
    Stop,
}

/// Why the event loop ended
#[derive(Debug)]
enum Exit {
    Stopped,
    RemoteClosed(Option<String>),
    Failed(TransportError),
}

#[derive(Debug, Default)]
struct SessionMeta {
    session_id: String,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// A live duplex audio session
///
/// Construct one per connection attempt: once a session reaches `Closed` or
/// `Error` it cannot be restarted. The transport and device provider are
/// supplied by the caller, so any number of sessions (and tests) can share or
/// fake them.
pub struct LiveSession {
    /// Transport used to open the duplex channel
    transport: Arc<dyn Transport>,

    /// Source of the capture and playback devices
    devices: Arc<dyn AudioDeviceProvider>,

    /// Caller hooks
    observer: Arc<dyn SessionObserver>,

    /// Lifecycle state, shared with the event loop
    state: Arc<StateTracker>,

    /// Counters, shared with the event loop
    counters: Arc<SessionCounters>,

    meta: Arc<Mutex<SessionMeta>>,

    /// Sender for the running event loop, once streaming
    commands: Mutex<Option<mpsc::Sender<Command>>>,

    /// Wakes a `start` that is waiting for the transport to open
    cancel_connect: Notify,
}

impl LiveSession {
    /// Create an idle session
    pub fn new(
        transport: Arc<dyn Transport>,
        devices: Arc<dyn AudioDeviceProvider>,
        observer: Arc<dyn SessionObserver>,
    ) -> Self {
        Self {
            transport,
            devices,
            state: Arc::new(StateTracker::new(Arc::clone(&observer))),
            observer,
            counters: Arc::new(SessionCounters::default()),
            meta: Arc::new(Mutex::new(SessionMeta::default())),
            commands: Mutex::new(None),
            cancel_connect: Notify::new(),
        }
    }

    /// Acquire devices, open the transport and start streaming.
    ///
    /// Device and open failures are returned here (and reported once to the
    /// observer); the session is then in `Error`. Runtime failures after this
    /// returns `Ok` are only reported through the observer.
    pub async fn start(&self, config: SessionConfig) -> Result<(), SessionError> {
        if !self
            .state
            .transition(SessionState::Idle, SessionState::Connecting)
        {
            return Err(SessionError::InvalidState {
                action: "start",
                state: self.state.get(),
            });
        }

        info!(
            "Starting live session: {} (transport: {}, devices: {})",
            config.session_id,
            self.transport.name(),
            self.devices.name()
        );
        lock(&self.meta).session_id = config.session_id.clone();

        let mut pending = PendingStart::new(self);

        match self.devices.open_input(&CaptureConfig::default()).await {
            Ok(device) => pending.capture = Some(device),
            Err(e) => {
                pending.disarm();
                return Err(self.fail_connect(SessionError::DeviceAcquisition(e)));
            }
        }

        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        match self
            .devices
            .open_output(&PlaybackConfig::default(), completions_tx)
            .await
        {
            Ok(device) => pending.playback = Some(device),
            Err(e) => {
                pending.release();
                return Err(self.fail_connect(SessionError::DeviceAcquisition(e)));
            }
        }

        let open_config = OpenConfig {
            session_id: config.session_id.clone(),
            instructions: config.instructions.clone(),
        };

        let opened = tokio::select! {
            biased;
            _ = self.cancel_connect.notified() => None,
            result = self.transport.open(&open_config) => Some(result),
        };

        let connection = match opened {
            None => {
                info!("Session {} stopped while connecting", config.session_id);
                pending.abandon();
                return Err(SessionError::Cancelled);
            }
            Some(Err(e)) => {
                pending.release();
                return Err(self.fail_connect(SessionError::TransportOpen(e)));
            }
            Some(Ok(connection)) => connection,
        };

        let (Some(capture), Some(playback)) = pending.take() else {
            // Both devices are held once open resolves
            return Err(self.fail_connect(SessionError::DeviceAcquisition(
                DeviceError::Released,
            )));
        };

        let (capture, frames) = match CapturePipeline::start(capture, FRAME_QUEUE_DEPTH) {
            Ok(started) => started,
            Err(e) => {
                if let Err(close_err) = connection.handle.close() {
                    warn!("Failed to close transport: {}", close_err);
                }
                release_devices(None, Some(playback));
                return Err(self.fail_connect(SessionError::DeviceAcquisition(e)));
            }
        };

        let (command_tx, command_rx) = mpsc::channel(4);
        *lock(&self.commands) = Some(command_tx);
        lock(&self.meta).started_at = Some(Utc::now());

        let actor = SessionActor {
            session_id: config.session_id.clone(),
            transport: Some(connection.handle),
            events: connection.events,
            capture,
            frames,
            scheduler: PlaybackScheduler::new(playback),
            completions: completions_rx,
            commands: command_rx,
            state: Arc::clone(&self.state),
            observer: Arc::clone(&self.observer),
            counters: Arc::clone(&self.counters),
            meta: Arc::clone(&self.meta),
            speaking: false,
            awaiting_drain: false,
            torn_down: false,
        };

        self.state.set(SessionState::Streaming);
        tokio::spawn(actor.run());

        info!("Live session streaming: {}", config.session_id);

        Ok(())
    }

    /// Stop the session and wait until every resource is released.
    ///
    /// Safe to call in any state and any number of times.
    pub async fn stop(&self) {
        let mut state_rx = self.state.subscribe();

        loop {
            match self.state.get() {
                SessionState::Idle => {
                    if self
                        .state
                        .transition(SessionState::Idle, SessionState::Closed)
                    {
                        return;
                    }
                }
                SessionState::Connecting => {
                    self.cancel_connect.notify_one();
                    let _ = state_rx
                        .wait_for(|s| *s != SessionState::Connecting)
                        .await;
                }
                SessionState::Streaming | SessionState::Closing => {
                    info!("Stopping live session: {}", lock(&self.meta).session_id);
                    let commands = lock(&self.commands).clone();
                    if let Some(tx) = commands {
                        // A full queue means a stop is already pending
                        let _ = tx.try_send(Command::Stop);
                    }
                    let _ = state_rx.wait_for(|s| s.is_terminal()).await;
                    return;
                }
                SessionState::Closed | SessionState::Error => return,
            }
        }
    }

    /// Wait until the session reaches a terminal state
    pub async fn closed(&self) -> SessionState {
        let mut state_rx = self.state.subscribe();
        let state = state_rx
            .wait_for(|s| s.is_terminal())
            .await
            .map(|state| *state);
        state.unwrap_or_else(|_| self.state.get())
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Whether the remote is currently audible
    pub fn is_speaking(&self) -> bool {
        self.counters.speaking.load(Ordering::SeqCst)
    }

    /// Get current session statistics
    pub fn stats(&self) -> SessionStats {
        let meta = lock(&self.meta);
        let duration_secs = match meta.started_at {
            Some(start) => {
                let end = meta.ended_at.unwrap_or_else(Utc::now);
                end.signed_duration_since(start).num_milliseconds() as f64 / 1000.0
            }
            None => 0.0,
        };

        SessionStats {
            session_id: meta.session_id.clone(),
            state: self.state.get(),
            started_at: meta.started_at,
            duration_secs,
            frames_sent: SessionCounters::read(&self.counters.frames_sent),
            frames_dropped: SessionCounters::read(&self.counters.frames_dropped),
            chunks_scheduled: SessionCounters::read(&self.counters.chunks_scheduled),
            chunks_dropped: SessionCounters::read(&self.counters.chunks_dropped),
            interruptions: SessionCounters::read(&self.counters.interruptions),
            turns_completed: SessionCounters::read(&self.counters.turns_completed),
            speaking: self.is_speaking(),
        }
    }

    fn fail_connect(&self, err: SessionError) -> SessionError {
        error!("Failed to start live session: {}", err);
        lock(&self.meta).ended_at = Some(Utc::now());
        self.state.set(SessionState::Error);
        self.observer.on_error(&err);
        err
    }
}

/// Devices held by a `start` that has not reached `Streaming` yet
///
/// If the `start` future is dropped mid-connect, the guard releases whatever
/// was acquired and closes the session, so a later `stop` does not wait on
/// `Connecting` forever.
struct PendingStart<'a> {
    session: &'a LiveSession,
    capture: Option<Box<dyn CaptureDevice>>,
    playback: Option<Box<dyn PlaybackDevice>>,
    armed: bool,
}

impl<'a> PendingStart<'a> {
    fn new(session: &'a LiveSession) -> Self {
        Self {
            session,
            capture: None,
            playback: None,
            armed: true,
        }
    }

    /// The caller reports the outcome itself
    fn disarm(&mut self) {
        self.armed = false;
    }

    /// Release held devices; the caller reports the failure
    fn release(&mut self) {
        self.disarm();
        release_devices(self.capture.take(), self.playback.take());
    }

    /// Hand the devices over to the streaming session
    fn take(
        &mut self,
    ) -> (
        Option<Box<dyn CaptureDevice>>,
        Option<Box<dyn PlaybackDevice>>,
    ) {
        self.disarm();
        (self.capture.take(), self.playback.take())
    }

    /// Give up connecting: release devices and end in `Closed`
    fn abandon(&mut self) {
        self.disarm();

        let session = self.session;
        session.state.set(SessionState::Closing);
        release_devices(self.capture.take(), self.playback.take());
        lock(&session.meta).ended_at = Some(Utc::now());
        session.state.set(SessionState::Closed);
        session.observer.on_close();
    }
}

impl Drop for PendingStart<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!(
                "Start abandoned while connecting: {}",
                lock(&self.session.meta).session_id
            );
            self.abandon();
        }
    }
}

/// Release devices acquired before streaming began
fn release_devices(
    capture: Option<Box<dyn CaptureDevice>>,
    playback: Option<Box<dyn PlaybackDevice>>,
) {
    if let Some(mut device) = capture {
        if let Err(e) = device.stop() {
            warn!("Failed to release capture device: {}", e);
        }
    }

    if let Some(mut device) = playback {
        if let Err(e) = device.close() {
            warn!("Failed to release playback device: {}", e);
        }
    }
}

/// The session's event loop
///
/// Owns every resource of a streaming session. Frames, inbound events and
/// playback completions are handled one at a time, in the order each source
/// produced them, so the scheduler needs no locking.
struct SessionActor {
    session_id: String,
    transport: Option<Box<dyn TransportHandle>>,
    events: mpsc::Receiver<TransportEvent>,
    capture: CapturePipeline,
    frames: mpsc::Receiver<Vec<f32>>,
    scheduler: PlaybackScheduler,
    completions: mpsc::UnboundedReceiver<SourceId>,
    commands: mpsc::Receiver<Command>,
    state: Arc<StateTracker>,
    observer: Arc<dyn SessionObserver>,
    counters: Arc<SessionCounters>,
    meta: Arc<Mutex<SessionMeta>>,
    speaking: bool,
    /// Turn complete, waiting for scheduled audio to finish
    awaiting_drain: bool,
    torn_down: bool,
}

impl SessionActor {
    async fn run(mut self) {
        debug!("Session loop started: {}", self.session_id);

        let exit = loop {
            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(Command::Stop) | None => break Exit::Stopped,
                },

                event = self.events.recv() => match event {
                    Some(TransportEvent::Message(message)) => self.handle_message(message),
                    Some(TransportEvent::Error(e)) => break Exit::Failed(e),
                    Some(TransportEvent::Closed { reason }) => break Exit::RemoteClosed(reason),
                    None => break Exit::RemoteClosed(None),
                },

                Some(id) = self.completions.recv() => self.handle_completion(id),

                Some(samples) = self.frames.recv() => self.handle_frame(&samples),
            }
        };

        self.finish(exit);
    }

    fn handle_message(&mut self, message: ServerMessage) {
        self.observer.on_message(&message);

        if message.is_interrupted() {
            let stopped = self.scheduler.interrupt();
            SessionCounters::bump(&self.counters.interruptions);
            info!(
                "Interrupted by user ({} sources flushed, session {})",
                stopped, self.session_id
            );
            self.awaiting_drain = false;
            self.set_speaking(false);
        }

        for blob in message.audio_parts() {
            let samples = match codec::decode(&blob.data) {
                Ok(samples) => samples,
                Err(e) => {
                    warn!("Dropping inbound chunk: {}", SessionError::Decode(e));
                    SessionCounters::bump(&self.counters.chunks_dropped);
                    continue;
                }
            };

            match self.scheduler.schedule(AudioChunk::new(samples)) {
                Ok(_) => {
                    SessionCounters::bump(&self.counters.chunks_scheduled);
                    self.awaiting_drain = false;
                    self.set_speaking(true);
                }
                Err(e) => {
                    warn!("Failed to schedule inbound chunk: {}", e);
                    SessionCounters::bump(&self.counters.chunks_dropped);
                }
            }
        }

        if message.is_turn_complete() {
            SessionCounters::bump(&self.counters.turns_completed);
            debug!("Turn complete (session {})", self.session_id);
            self.observer.on_turn_complete();

            if self.scheduler.is_idle() {
                self.set_speaking(false);
            } else {
                self.awaiting_drain = true;
            }
        }
    }

    fn handle_completion(&mut self, id: SourceId) {
        if self.scheduler.on_source_ended(id) && self.awaiting_drain {
            self.awaiting_drain = false;
            self.set_speaking(false);
        }
    }

    fn handle_frame(&mut self, samples: &[f32]) {
        if self.state.get() != SessionState::Streaming {
            return;
        }

        match self.capture.on_frame(samples, self.transport.as_deref()) {
            FrameOutcome::Sent { .. } => SessionCounters::bump(&self.counters.frames_sent),
            FrameOutcome::Dropped(_) => SessionCounters::bump(&self.counters.frames_dropped),
        }
    }

    fn set_speaking(&mut self, speaking: bool) {
        if self.speaking != speaking {
            self.speaking = speaking;
            self.counters.speaking.store(speaking, Ordering::SeqCst);
            self.observer.on_speaking_changed(speaking);
        }
    }

    fn finish(mut self, exit: Exit) {
        self.state.set(SessionState::Closing);

        let failed = match exit {
            Exit::Stopped => {
                info!("Live session stopped: {}", self.session_id);
                false
            }
            Exit::RemoteClosed(reason) => {
                info!(
                    "Live session closed by remote: {} ({})",
                    self.session_id,
                    reason.as_deref().unwrap_or("no reason given")
                );
                false
            }
            Exit::Failed(e) => {
                let err = SessionError::TransportRuntime(e);
                error!("Live session failed: {} ({})", self.session_id, err);
                self.observer.on_error(&err);
                true
            }
        };

        self.teardown();
        self.set_speaking(false);
        lock(&self.meta).ended_at = Some(Utc::now());

        self.state.set(if failed {
            SessionState::Error
        } else {
            SessionState::Closed
        });
        self.observer.on_close();
    }

    /// Release everything the session owns, exactly once.
    ///
    /// Each step runs even if an earlier one failed.
    fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        if let Err(e) = self.capture.stop() {
            warn!("Failed to release capture device: {}", e);
        }
        self.frames.close();

        if let Err(e) = self.scheduler.teardown() {
            warn!("Failed to release playback device: {}", e);
        }

        if let Some(transport) = self.transport.take() {
            if let Err(e) = transport.close() {
                warn!("Failed to close transport: {}", e);
            }
        }

        info!("Session resources released: {}", self.session_id);
    }
}
