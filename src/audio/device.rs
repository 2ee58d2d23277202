use thiserror::Error;
use tokio::sync::mpsc;

use crate::codec::{INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};

/// Identifies one scheduled playback source on a playback device
pub type SourceId = u64;

/// Number of samples in one captured frame (16ms at 16kHz)
pub const FRAME_SAMPLES: usize = 256;

/// Audio device failures
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The platform refused access (e.g. microphone permission)
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("no {0} device available")]
    NotFound(String),

    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("device already released")]
    Released,

    #[error("audio backend error: {0}")]
    Backend(String),
}

/// Configuration for a capture (microphone) device
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Sample rate frames are delivered at
    pub sample_rate: u32,
    /// Channel count of delivered frames (1 = mono)
    pub channels: u16,
    /// Samples per delivered frame
    pub frame_samples: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: INPUT_SAMPLE_RATE,
            channels: 1,
            frame_samples: FRAME_SAMPLES,
        }
    }
}

/// Configuration for a playback (speaker) device
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Sample rate of the sources handed to the device
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: OUTPUT_SAMPLE_RATE,
            channels: 1,
        }
    }
}

/// A microphone-like input device
///
/// Frames are pushed into the sender handed to [`CaptureDevice::start`] from
/// whatever thread the device runs on. Implementations must never block that
/// thread: a full channel means the frame is dropped.
pub trait CaptureDevice: Send {
    /// Begin delivering fixed-size mono frames
    fn start(&mut self, frames: mpsc::Sender<Vec<f32>>) -> Result<(), DeviceError>;

    /// Stop delivering frames and release the device. Must be idempotent.
    fn stop(&mut self) -> Result<(), DeviceError>;

    fn is_capturing(&self) -> bool;

    /// Device name for logging
    fn name(&self) -> &str;
}

/// A speaker-like output device with its own monotonic clock
///
/// Every source started on the device produces exactly one completion
/// notification (its id on the completions channel) when it ends, whether
/// naturally or because it was stopped.
pub trait PlaybackDevice: Send {
    /// Current device time in seconds
    fn now(&self) -> f64;

    /// Play `samples` starting exactly at device time `start_at`
    fn start_source(
        &mut self,
        id: SourceId,
        samples: Vec<f32>,
        start_at: f64,
    ) -> Result<(), DeviceError>;

    /// Stop a source immediately. Unknown or finished sources are ignored.
    fn stop_source(&mut self, id: SourceId);

    /// Release the device
    fn close(&mut self) -> Result<(), DeviceError>;

    fn name(&self) -> &str;
}

/// Capability to acquire input and output device contexts
///
/// Implementations:
/// - [`MemoryDevices`](super::memory::MemoryDevices): in-memory fake clock (tests)
/// - [`WavDevices`](super::wav::WavDevices): WAV file in, WAV file out
/// - `HostDevices`: default microphone and speaker (feature `host-audio`)
#[async_trait::async_trait]
pub trait AudioDeviceProvider: Send + Sync {
    /// Acquire the capture device
    async fn open_input(
        &self,
        config: &CaptureConfig,
    ) -> Result<Box<dyn CaptureDevice>, DeviceError>;

    /// Acquire the playback device. Completion notifications for started
    /// sources are delivered on `completions`.
    async fn open_output(
        &self,
        config: &PlaybackConfig,
        completions: mpsc::UnboundedSender<SourceId>,
    ) -> Result<Box<dyn PlaybackDevice>, DeviceError>;

    /// Provider name for logging
    fn name(&self) -> &str;
}
