use serde::{Deserialize, Serialize};

/// Configuration for a live session
///
/// Sample rates and frame size are protocol constants and not configurable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Unique session identifier, used for log correlation
    pub session_id: String,

    /// Instructions passed through unchanged to the transport's open call
    pub instructions: Option<String>,
}

impl SessionConfig {
    pub fn with_instructions(instructions: impl Into<String>) -> Self {
        Self {
            instructions: Some(instructions.into()),
            ..Self::default()
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id: format!("session-{}", uuid::Uuid::new_v4()),
            instructions: None,
        }
    }
}
