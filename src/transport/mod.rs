//! Duplex channel to the remote conversational audio service
//!
//! The session only sees the [`Transport`] trait: a resolved `open` is the
//! "connected" notification, and everything afterwards (messages, runtime
//! errors, remote close) arrives in order on the connection's event channel.

pub mod messages;
pub mod websocket;

use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::codec::AudioBlob;

pub use messages::{ClientMessage, ServerContent, ServerMessage};
pub use websocket::{WebSocketConfig, WebSocketTransport};

/// Errors raised by a transport
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection timed out after {0:?}")]
    Timeout(Duration),

    /// The channel is not (or no longer) open
    #[error("Not connected")]
    NotOpen,

    /// The outbound queue is full
    #[error("Outbound queue full")]
    Backpressure,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Parameters for opening a channel
#[derive(Debug, Clone, Default)]
pub struct OpenConfig {
    /// Session identifier, for log correlation only
    pub session_id: String,
    /// Instructions forwarded verbatim to the remote service
    pub instructions: Option<String>,
}

/// Inbound notifications from an open channel
#[derive(Debug)]
pub enum TransportEvent {
    Message(ServerMessage),
    Error(TransportError),
    Closed { reason: Option<String> },
}

/// An open channel: the handle for sending plus the ordered inbound events
pub struct TransportConnection {
    pub handle: Box<dyn TransportHandle>,
    pub events: mpsc::Receiver<TransportEvent>,
}

/// Sending side of an open channel
pub trait TransportHandle: Send + Sync {
    /// Whether outbound audio can currently be sent
    fn is_open(&self) -> bool;

    /// Queue one audio blob without blocking
    fn send_audio(&self, blob: AudioBlob) -> Result<(), TransportError>;

    /// Close the channel. Closing an already closed channel is a no-op.
    fn close(&self) -> Result<(), TransportError>;
}

/// Factory for duplex channels, owned by the caller and shared with sessions
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, config: &OpenConfig) -> Result<TransportConnection, TransportError>;

    /// Transport name for logging
    fn name(&self) -> &str;
}
