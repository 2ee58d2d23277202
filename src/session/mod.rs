//! Live session management
//!
//! This module provides the `LiveSession` abstraction that manages:
//! - Device acquisition (microphone, speaker)
//! - Opening the duplex transport
//! - Streaming captured frames outbound
//! - Scheduling inbound audio and handling interruptions
//! - Exactly-once teardown on stop, remote close, or error

mod config;
mod observer;
mod session;
mod state;
mod stats;

pub use config::SessionConfig;
pub use observer::{LoggingObserver, NoopObserver, SessionObserver};
pub use session::LiveSession;
pub use state::SessionState;
pub use stats::SessionStats;
