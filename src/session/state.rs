use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

use super::observer::SessionObserver;

/// Lifecycle of a live session
///
/// `Idle → Connecting → Streaming → Closing → Closed`, with `Error` reachable
/// from `Connecting` and `Streaming`. `Closed` and `Error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Streaming,
    Closing,
    Closed,
    Error,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Error)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Streaming => write!(f, "streaming"),
            SessionState::Closing => write!(f, "closing"),
            SessionState::Closed => write!(f, "closed"),
            SessionState::Error => write!(f, "error"),
        }
    }
}

/// Shared state cell that reports every transition to the observer
pub(crate) struct StateTracker {
    tx: watch::Sender<SessionState>,
    observer: Arc<dyn SessionObserver>,
}

impl StateTracker {
    pub(crate) fn new(observer: Arc<dyn SessionObserver>) -> Self {
        let (tx, _) = watch::channel(SessionState::Idle);
        Self { tx, observer }
    }

    pub(crate) fn get(&self) -> SessionState {
        *self.tx.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    pub(crate) fn set(&self, next: SessionState) {
        let previous = self.tx.send_replace(next);
        if previous != next {
            debug!("Session state: {} -> {}", previous, next);
            self.observer.on_state_change(next);
        }
    }

    /// Move to `to` only if currently in `from`
    pub(crate) fn transition(&self, from: SessionState, to: SessionState) -> bool {
        let moved = self.tx.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        });

        if moved {
            debug!("Session state: {} -> {}", from, to);
            self.observer.on_state_change(to);
        }
        moved
    }
}
