use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::SessionState;

/// Statistics about a live session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    pub session_id: String,

    pub state: SessionState,

    /// When streaming started, if it did
    pub started_at: Option<DateTime<Utc>>,

    /// Time spent streaming so far, in seconds
    pub duration_secs: f64,

    /// Captured frames handed to the transport
    pub frames_sent: u64,

    /// Captured frames dropped because the transport could not take them
    pub frames_dropped: u64,

    /// Inbound chunks scheduled for playback
    pub chunks_scheduled: u64,

    /// Inbound chunks dropped (decode or device failure)
    pub chunks_dropped: u64,

    pub interruptions: u64,

    pub turns_completed: u64,

    /// Whether the remote is currently audible
    pub speaking: bool,
}

/// Counters shared between the session handle and its event loop
#[derive(Debug, Default)]
pub(crate) struct SessionCounters {
    pub frames_sent: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub chunks_scheduled: AtomicU64,
    pub chunks_dropped: AtomicU64,
    pub interruptions: AtomicU64,
    pub turns_completed: AtomicU64,
    pub speaking: AtomicBool,
}

impl SessionCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn read(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}
