use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

use crate::transport::WebSocketConfig;

/// Environment overrides, e.g. `DUPLEX_VOICE__TRANSPORT__API_KEY`
const ENV_PREFIX: &str = "DUPLEX_VOICE";

#[derive(Debug, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub transport: TransportConfig,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub audio: AudioConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct TransportConfig {
    pub url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub voice: Option<String>,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Default, Deserialize)]
pub struct SessionSettings {
    /// Instructions forwarded to the remote service on connect
    pub instructions: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AudioConfig {
    /// WAV file replayed as the microphone
    pub input_path: Option<String>,
    /// WAV file receiving the remote audio
    pub output_path: Option<String>,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .with_context(|| format!("Failed to load config from {}", path))?;

        Ok(settings.try_deserialize()?)
    }

    /// Parse a TOML document (no environment overrides)
    pub fn from_toml(toml: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

impl TransportConfig {
    pub fn websocket_config(&self) -> WebSocketConfig {
        WebSocketConfig {
            url: self.url.clone(),
            api_key: self.api_key.clone().filter(|k| !k.is_empty()),
            model: self.model.clone(),
            voice: self.voice.clone(),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
        }
    }
}
