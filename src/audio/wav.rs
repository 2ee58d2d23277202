// WAV file audio devices
//
// Capture replays a WAV file at real-time cadence, one fixed-size frame per
// frame period, then keeps the cadence with silence until stopped. Playback
// renders every scheduled source onto a timeline in device time and writes it
// out as a 16-bit WAV when the device is closed.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::device::{
    AudioDeviceProvider, CaptureConfig, CaptureDevice, DeviceError, PlaybackConfig,
    PlaybackDevice, SourceId,
};
use super::file::AudioFile;

/// File-backed [`AudioDeviceProvider`]
#[derive(Debug, Clone)]
pub struct WavDevices {
    input_path: PathBuf,
    output_path: Option<PathBuf>,
}

impl WavDevices {
    /// Capture from `input_path`; write playback to `output_path` if given
    pub fn new(input_path: impl Into<PathBuf>, output_path: Option<PathBuf>) -> Self {
        Self {
            input_path: input_path.into(),
            output_path,
        }
    }
}

#[async_trait::async_trait]
impl AudioDeviceProvider for WavDevices {
    async fn open_input(
        &self,
        config: &CaptureConfig,
    ) -> Result<Box<dyn CaptureDevice>, DeviceError> {
        if !self.input_path.exists() {
            return Err(DeviceError::NotFound(format!(
                "input file {}",
                self.input_path.display()
            )));
        }

        let file = AudioFile::open(&self.input_path)
            .map_err(|e| DeviceError::Backend(format!("{:#}", e)))?;
        let samples = file.to_mono(config.sample_rate)?;

        Ok(Box::new(WavCapture {
            name: file.path,
            samples,
            config: config.clone(),
            task: None,
        }))
    }

    async fn open_output(
        &self,
        config: &PlaybackConfig,
        completions: mpsc::UnboundedSender<SourceId>,
    ) -> Result<Box<dyn PlaybackDevice>, DeviceError> {
        if let Some(parent) = self.output_path.as_ref().and_then(|p| p.parent()) {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    DeviceError::Backend(format!("Failed to create output directory: {}", e))
                })?;
            }
        }

        Ok(Box::new(WavPlayback {
            origin: Instant::now(),
            sample_rate: config.sample_rate,
            output_path: self.output_path.clone(),
            timeline: Vec::new(),
            sources: HashMap::new(),
            completions,
            closed: false,
        }))
    }

    fn name(&self) -> &str {
        "wav"
    }
}

struct WavCapture {
    name: String,
    samples: Vec<f32>,
    config: CaptureConfig,
    task: Option<JoinHandle<()>>,
}

impl CaptureDevice for WavCapture {
    fn start(&mut self, frames: mpsc::Sender<Vec<f32>>) -> Result<(), DeviceError> {
        if self.task.is_some() {
            return Err(DeviceError::Backend("capture already started".to_string()));
        }

        let frame_samples = self.config.frame_samples.max(1);
        let period =
            Duration::from_secs_f64(frame_samples as f64 / self.config.sample_rate as f64);
        let samples = std::mem::take(&mut self.samples);

        info!(
            "WAV capture started: {} ({} frames of {} samples)",
            self.name,
            samples.len().div_ceil(frame_samples),
            frame_samples
        );

        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            let mut offset = 0;

            loop {
                ticker.tick().await;

                let mut frame = vec![0.0; frame_samples];
                if offset < samples.len() {
                    let end = (offset + frame_samples).min(samples.len());
                    frame[..end - offset].copy_from_slice(&samples[offset..end]);
                    offset = end;
                }

                match frames.try_send(frame) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        debug!("Capture queue full, dropping frame");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                }
            }
        }));

        Ok(())
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        if let Some(task) = self.task.take() {
            task.abort();
            info!("WAV capture stopped: {}", self.name);
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.task.is_some()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

struct PlayingSource {
    offset: usize,
    samples: Vec<f32>,
    timer: JoinHandle<()>,
    /// Set by whichever of the timer or `stop_source` reports completion
    completed: Arc<AtomicBool>,
}

struct WavPlayback {
    origin: Instant,
    sample_rate: u32,
    output_path: Option<PathBuf>,
    timeline: Vec<f32>,
    sources: HashMap<SourceId, PlayingSource>,
    completions: mpsc::UnboundedSender<SourceId>,
    closed: bool,
}

impl WavPlayback {
    fn offset_of(&self, time: f64) -> usize {
        (time.max(0.0) * self.sample_rate as f64).round() as usize
    }

    fn write_output(&self) -> Result<(), DeviceError> {
        let Some(path) = &self.output_path else {
            return Ok(());
        };

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let backend = |e: hound::Error| DeviceError::Backend(format!("{}: {}", path.display(), e));
        let mut writer = hound::WavWriter::create(path, spec).map_err(backend)?;
        for &sample in &self.timeline {
            writer
                .write_sample((sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                .map_err(backend)?;
        }
        writer.finalize().map_err(backend)?;

        info!(
            "Playback written to {} ({:.1}s)",
            path.display(),
            self.timeline.len() as f64 / self.sample_rate as f64
        );
        Ok(())
    }
}

impl PlaybackDevice for WavPlayback {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
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

        let offset = self.offset_of(start_at);
        let end = offset + samples.len();
        if self.timeline.len() < end {
            self.timeline.resize(end, 0.0);
        }
        for (slot, sample) in self.timeline[offset..end].iter_mut().zip(&samples) {
            *slot += sample;
        }

        let end_at = self.origin + Duration::from_secs_f64(end as f64 / self.sample_rate as f64);
        let completions = self.completions.clone();
        let completed = Arc::new(AtomicBool::new(false));
        let done = Arc::clone(&completed);
        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(end_at).await;
            if !done.swap(true, Ordering::SeqCst) {
                let _ = completions.send(id);
            }
        });

        self.sources.insert(
            id,
            PlayingSource {
                offset,
                samples,
                timer,
                completed,
            },
        );
        Ok(())
    }

    fn stop_source(&mut self, id: SourceId) {
        let Some(source) = self.sources.remove(&id) else {
            return;
        };

        source.timer.abort();
        if source.completed.swap(true, Ordering::SeqCst) {
            return;
        }

        // Silence whatever part of the source has not been heard yet
        let cut = self.offset_of(self.now()).max(source.offset);
        let end = source.offset + source.samples.len();
        for pos in cut..end {
            self.timeline[pos] -= source.samples[pos - source.offset];
        }

        let _ = self.completions.send(id);
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        for (_, source) in self.sources.drain() {
            source.timer.abort();
        }

        if let Err(e) = self.write_output() {
            warn!("Failed to write playback output: {}", e);
            return Err(e);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "wav playback"
    }
}
