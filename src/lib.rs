pub mod audio;
pub mod capture;
pub mod codec;
pub mod config;
pub mod error;
pub mod playback;
pub mod session;
pub mod transport;

pub use audio::{
    AudioDeviceProvider, CaptureDevice, DeviceError, MemoryDevices, PlaybackDevice, WavDevices,
};
pub use capture::{CapturePipeline, FrameOutcome};
pub use codec::{AudioBlob, CodecError};
pub use config::Config;
pub use error::SessionError;
pub use playback::{AudioChunk, PlaybackScheduler, ScheduledSource};
pub use session::{LiveSession, SessionConfig, SessionObserver, SessionState, SessionStats};
pub use transport::{
    ServerMessage, Transport, TransportError, TransportEvent, TransportHandle, WebSocketConfig,
    WebSocketTransport,
};
