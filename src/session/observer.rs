use tracing::{error, info};

use super::state::SessionState;
use crate::error::SessionError;
use crate::transport::ServerMessage;

/// Caller hooks invoked from the session loop
///
/// Callbacks run on the session's event loop and must return quickly.
pub trait SessionObserver: Send + Sync {
    /// Every inbound event, before the session acts on it
    fn on_message(&self, _message: &ServerMessage) {}

    fn on_error(&self, _error: &SessionError) {}

    /// The session has released its resources
    fn on_close(&self) {}

    fn on_state_change(&self, _state: SessionState) {}

    /// The remote finished its turn
    fn on_turn_complete(&self) {}

    /// The remote started or stopped being audible.
    ///
    /// Goes false on interruption, or once the turn is complete and every
    /// scheduled chunk has finished playing.
    fn on_speaking_changed(&self, _speaking: bool) {}
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {}

/// Observer that logs session activity
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl SessionObserver for LoggingObserver {
    fn on_message(&self, message: &ServerMessage) {
        if let Some(content) = &message.server_content {
            if let Some(t) = &content.input_transcription {
                info!("You: {}", t.text);
            }
            if let Some(t) = &content.output_transcription {
                info!("Assistant: {}", t.text);
            }
        }
        if message.go_away.is_some() {
            info!("Server is going away");
        }
    }

    fn on_error(&self, error: &SessionError) {
        error!("Session error: {}", error);
    }

    fn on_close(&self) {
        info!("Session closed");
    }

    fn on_state_change(&self, state: SessionState) {
        info!("Session is {}", state);
    }

    fn on_speaking_changed(&self, speaking: bool) {
        if speaking {
            info!("Assistant speaking");
        } else {
            info!("Assistant quiet, listening");
        }
    }
}
