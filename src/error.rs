use thiserror::Error;

use crate::audio::DeviceError;
use crate::codec::CodecError;
use crate::session::SessionState;
use crate::transport::TransportError;

/// Errors surfaced by a live session
#[derive(Debug, Error)]
pub enum SessionError {
    /// Microphone or speaker could not be acquired (includes permission denied)
    #[error("Audio device unavailable: {0}")]
    DeviceAcquisition(#[source] DeviceError),

    #[error("Transport failed to open: {0}")]
    TransportOpen(#[source] TransportError),

    /// The open transport failed mid-session; fatal for the session
    #[error("Transport error: {0}")]
    TransportRuntime(#[source] TransportError),

    /// Inbound audio could not be decoded; the chunk is dropped
    #[error("Failed to decode inbound audio: {0}")]
    Decode(#[from] CodecError),

    #[error("Cannot {action} a session that is {state}")]
    InvalidState {
        action: &'static str,
        state: SessionState,
    },

    #[error("Session stopped while connecting")]
    Cancelled,
}
