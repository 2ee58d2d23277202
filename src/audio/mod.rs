pub mod device;
pub mod file;
pub mod memory;
pub mod resample;
pub mod wav;

#[cfg(feature = "host-audio")]
pub mod host;

pub use device::{
    AudioDeviceProvider, CaptureConfig, CaptureDevice, DeviceError, PlaybackConfig,
    PlaybackDevice, SourceId, FRAME_SAMPLES,
};
pub use file::AudioFile;
pub use memory::{DeviceFailure, MemoryDevices, StartedSource};
pub use resample::LinearResampler;
pub use wav::WavDevices;

#[cfg(feature = "host-audio")]
pub use host::HostDevices;
