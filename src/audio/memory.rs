// In-memory audio devices with a manually driven clock
//
// Nothing here touches hardware: captured frames are injected by the caller,
// the playback clock only moves when told to, and playback completion fires
// when the caller finishes a source (or advances the clock past its end).

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tracing::debug;

use super::device::{
    AudioDeviceProvider, CaptureConfig, CaptureDevice, DeviceError, PlaybackConfig,
    PlaybackDevice, SourceId,
};

/// Failure to inject on device acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceFailure {
    PermissionDenied,
    NotFound,
}

impl DeviceFailure {
    fn to_error(self, kind: &str) -> DeviceError {
        match self {
            DeviceFailure::PermissionDenied => {
                DeviceError::PermissionDenied(format!("{} access denied", kind))
            }
            DeviceFailure::NotFound => DeviceError::NotFound(kind.to_string()),
        }
    }
}

/// A source started on the in-memory playback device
#[derive(Debug, Clone, PartialEq)]
pub struct StartedSource {
    pub id: SourceId,
    pub start_at: f64,
    pub duration: f64,
}

#[derive(Default)]
struct MemoryState {
    clock: f64,
    output_sample_rate: u32,
    fail_input: Option<DeviceFailure>,
    fail_output: Option<DeviceFailure>,
    frames: Option<mpsc::Sender<Vec<f32>>>,
    completions: Option<mpsc::UnboundedSender<SourceId>>,
    inputs_opened: usize,
    outputs_opened: usize,
    input_stops: usize,
    output_closes: usize,
    started: Vec<StartedSource>,
    stopped: Vec<SourceId>,
    finished: HashSet<SourceId>,
}

impl MemoryState {
    fn complete(&mut self, id: SourceId) -> bool {
        if !self.started.iter().any(|s| s.id == id) || !self.finished.insert(id) {
            return false;
        }

        if let Some(tx) = &self.completions {
            let _ = tx.send(id);
        }
        true
    }
}

/// In-memory [`AudioDeviceProvider`] for tests and simulations
///
/// Cloning yields another handle onto the same devices, so a test can keep one
/// clone to drive the clock while the session owns the devices.
#[derive(Clone, Default)]
pub struct MemoryDevices {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryDevices {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        // A poisoned lock only means a test panicked mid-update; the counters
        // are still meaningful.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make the next input acquisition fail
    pub fn fail_input(&self, failure: DeviceFailure) {
        self.lock().fail_input = Some(failure);
    }

    /// Make the next output acquisition fail
    pub fn fail_output(&self, failure: DeviceFailure) {
        self.lock().fail_output = Some(failure);
    }

    pub fn now(&self) -> f64 {
        self.lock().clock
    }

    pub fn set_now(&self, now: f64) {
        self.lock().clock = now;
    }

    /// Advance the clock and complete every source that has ended by then
    pub fn advance(&self, secs: f64) {
        let mut state = self.lock();
        state.clock += secs;

        let clock = state.clock;
        let due: Vec<SourceId> = state
            .started
            .iter()
            .filter(|s| s.start_at + s.duration <= clock)
            .map(|s| s.id)
            .collect();

        for id in due {
            state.complete(id);
        }
    }

    /// Deliver one captured frame, as the device callback would.
    ///
    /// Returns false if capture is not running or the frame queue is full.
    pub fn push_frame(&self, samples: Vec<f32>) -> bool {
        match &self.lock().frames {
            Some(tx) => tx.try_send(samples).is_ok(),
            None => false,
        }
    }

    /// Signal natural completion of a started source
    pub fn finish(&self, id: SourceId) -> bool {
        self.lock().complete(id)
    }

    pub fn started_sources(&self) -> Vec<StartedSource> {
        self.lock().started.clone()
    }

    pub fn stopped_sources(&self) -> Vec<SourceId> {
        self.lock().stopped.clone()
    }

    pub fn inputs_opened(&self) -> usize {
        self.lock().inputs_opened
    }

    pub fn outputs_opened(&self) -> usize {
        self.lock().outputs_opened
    }

    /// Number of times the capture device was released
    pub fn input_stops(&self) -> usize {
        self.lock().input_stops
    }

    /// Number of times the playback device was released
    pub fn output_closes(&self) -> usize {
        self.lock().output_closes
    }

    pub fn is_capturing(&self) -> bool {
        self.lock().frames.is_some()
    }
}

#[async_trait::async_trait]
impl AudioDeviceProvider for MemoryDevices {
    async fn open_input(
        &self,
        _config: &CaptureConfig,
    ) -> Result<Box<dyn CaptureDevice>, DeviceError> {
        let mut state = self.lock();
        if let Some(failure) = state.fail_input.take() {
            return Err(failure.to_error("microphone"));
        }

        state.inputs_opened += 1;
        Ok(Box::new(MemoryCapture {
            devices: self.clone(),
            capturing: false,
            released: false,
        }))
    }

    async fn open_output(
        &self,
        config: &PlaybackConfig,
        completions: mpsc::UnboundedSender<SourceId>,
    ) -> Result<Box<dyn PlaybackDevice>, DeviceError> {
        let mut state = self.lock();
        if let Some(failure) = state.fail_output.take() {
            return Err(failure.to_error("speaker"));
        }

        state.outputs_opened += 1;
        state.output_sample_rate = config.sample_rate;
        state.completions = Some(completions);
        Ok(Box::new(MemoryPlayback {
            devices: self.clone(),
            closed: false,
        }))
    }

    fn name(&self) -> &str {
        "memory"
    }
}

struct MemoryCapture {
    devices: MemoryDevices,
    capturing: bool,
    released: bool,
}

impl CaptureDevice for MemoryCapture {
    fn start(&mut self, frames: mpsc::Sender<Vec<f32>>) -> Result<(), DeviceError> {
        if self.released {
            return Err(DeviceError::Released);
        }

        self.devices.lock().frames = Some(frames);
        self.capturing = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        if self.released {
            return Ok(());
        }

        let mut state = self.devices.lock();
        state.frames = None;
        state.input_stops += 1;
        self.capturing = false;
        self.released = true;
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn name(&self) -> &str {
        "memory capture"
    }
}

struct MemoryPlayback {
    devices: MemoryDevices,
    closed: bool,
}

impl PlaybackDevice for MemoryPlayback {
    fn now(&self) -> f64 {
        self.devices.now()
    }

    fn start_source(
        &mut self,
        id: SourceId,
        samples: Vec<f32>,
        start_at: f64,
    ) -> Result<(), DeviceError> {
        if self.closed {
            return Err(DeviceError::Released);
        }

        let mut state = self.devices.lock();
        let rate = state.output_sample_rate.max(1);
        let duration = samples.len() as f64 / rate as f64;
        debug!("memory playback: source {} at {:.3}s ({:.3}s)", id, start_at, duration);
        state.started.push(StartedSource {
            id,
            start_at,
            duration,
        });
        Ok(())
    }

    fn stop_source(&mut self, id: SourceId) {
        let mut state = self.devices.lock();
        state.stopped.push(id);
        state.complete(id);
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        if self.closed {
            return Ok(());
        }

        let mut state = self.devices.lock();
        state.completions = None;
        state.output_closes += 1;
        self.closed = true;
        Ok(())
    }

    fn name(&self) -> &str {
        "memory playback"
    }
}
