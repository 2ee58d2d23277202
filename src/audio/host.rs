// Host audio devices (default microphone and speaker) via cpal
//
// cpal streams are not Send, so each stream lives on its own thread for the
// lifetime of the device and is dropped there when the device is released.
// The real-time callbacks only touch channels and a short-held mutex.

use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use super::device::{
    AudioDeviceProvider, CaptureConfig, CaptureDevice, DeviceError, PlaybackConfig,
    PlaybackDevice, SourceId,
};
use super::file::fold_to_mono;
use super::resample::LinearResampler;

/// [`AudioDeviceProvider`] bound to the host's default input and output devices
#[derive(Debug, Default, Clone)]
pub struct HostDevices;

impl HostDevices {
    pub fn new() -> Self {
        Self
    }
}

fn build_error(e: cpal::BuildStreamError) -> DeviceError {
    match e {
        cpal::BuildStreamError::DeviceNotAvailable => {
            DeviceError::NotFound("audio device".to_string())
        }
        cpal::BuildStreamError::StreamConfigNotSupported => {
            DeviceError::UnsupportedFormat("f32 stream not supported".to_string())
        }
        other => DeviceError::Backend(other.to_string()),
    }
}

/// Keeps a stream thread alive until told to stop
struct StreamThread {
    stop_tx: std_mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

impl StreamThread {
    fn shutdown(self) {
        let _ = self.stop_tx.send(());
        if self.thread.join().is_err() {
            error!("Audio stream thread panicked");
        }
    }
}

#[async_trait::async_trait]
impl AudioDeviceProvider for HostDevices {
    async fn open_input(
        &self,
        config: &CaptureConfig,
    ) -> Result<Box<dyn CaptureDevice>, DeviceError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| DeviceError::NotFound("microphone".to_string()))?;
        let name = device.name().unwrap_or_else(|_| "default input".to_string());
        let supported = device
            .default_input_config()
            .map_err(|e| DeviceError::Backend(e.to_string()))?;

        info!(
            "Host microphone: {} ({}Hz, {} channels)",
            name,
            supported.sample_rate().0,
            supported.channels()
        );

        Ok(Box::new(HostCapture {
            name,
            config: config.clone(),
            stream: None,
        }))
    }

    async fn open_output(
        &self,
        config: &PlaybackConfig,
        completions: mpsc::UnboundedSender<SourceId>,
    ) -> Result<Box<dyn PlaybackDevice>, DeviceError> {
        let mixer = Arc::new(Mutex::new(OutputMixer {
            frames_rendered: 0,
            sources: Vec::new(),
            completions,
        }));

        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let thread_mixer = Arc::clone(&mixer);

        let thread = std::thread::Builder::new()
            .name("duplex-voice-output".to_string())
            .spawn(move || run_output_stream(thread_mixer, ready_tx, stop_rx))
            .map_err(|e| DeviceError::Backend(e.to_string()))?;

        let (name, device_rate) = ready_rx
            .await
            .map_err(|_| DeviceError::Backend("output thread exited".to_string()))??;

        info!("Host speaker: {} ({}Hz)", name, device_rate);

        Ok(Box::new(HostPlayback {
            name,
            source_rate: config.sample_rate,
            device_rate,
            mixer,
            stream: Some(StreamThread { stop_tx, thread }),
        }))
    }

    fn name(&self) -> &str {
        "host"
    }
}

struct HostCapture {
    name: String,
    config: CaptureConfig,
    stream: Option<StreamThread>,
}

impl CaptureDevice for HostCapture {
    fn start(&mut self, frames: mpsc::Sender<Vec<f32>>) -> Result<(), DeviceError> {
        if self.stream.is_some() {
            return Err(DeviceError::Backend("capture already started".to_string()));
        }

        let (ready_tx, ready_rx) = std_mpsc::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let config = self.config.clone();

        let thread = std::thread::Builder::new()
            .name("duplex-voice-input".to_string())
            .spawn(move || run_input_stream(config, frames, ready_tx, stop_rx))
            .map_err(|e| DeviceError::Backend(e.to_string()))?;

        // Stream construction is quick; waiting here keeps start() synchronous
        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.stream = Some(StreamThread { stop_tx, thread });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => Err(DeviceError::Backend("input thread exited".to_string())),
        }
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        if let Some(stream) = self.stream.take() {
            stream.shutdown();
            info!("Host microphone released: {}", self.name);
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn run_input_stream(
    config: CaptureConfig,
    frames: mpsc::Sender<Vec<f32>>,
    ready_tx: std_mpsc::Sender<Result<(), DeviceError>>,
    stop_rx: std_mpsc::Receiver<()>,
) {
    let setup = || -> Result<cpal::Stream, DeviceError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| DeviceError::NotFound("microphone".to_string()))?;
        let supported = device
            .default_input_config()
            .map_err(|e| DeviceError::Backend(e.to_string()))?;
        let stream_config: cpal::StreamConfig = supported.into();

        let channels = stream_config.channels;
        let frame_samples = config.frame_samples.max(1);
        let mut resampler =
            LinearResampler::new(stream_config.sample_rate.0, config.sample_rate);
        let mut pending: Vec<f32> = Vec::with_capacity(frame_samples * 2);

        let stream = device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let mono = fold_to_mono(data, channels);
                    resampler.process(&mono, &mut pending);

                    while pending.len() >= frame_samples {
                        let frame: Vec<f32> = pending.drain(..frame_samples).collect();
                        // Never block the audio thread; a full queue drops the frame
                        let _ = frames.try_send(frame);
                    }
                },
                |e| warn!("Microphone stream error: {}", e),
                None,
            )
            .map_err(build_error)?;

        stream.play().map_err(|e| DeviceError::Backend(e.to_string()))?;
        Ok(stream)
    };

    match setup() {
        Ok(stream) => {
            let _ = ready_tx.send(Ok(()));
            let _ = stop_rx.recv();
            drop(stream);
        }
        Err(e) => {
            let _ = ready_tx.send(Err(e));
        }
    }
}

struct HostSource {
    id: SourceId,
    start_frame: u64,
    samples: Vec<f32>,
}

struct OutputMixer {
    frames_rendered: u64,
    sources: Vec<HostSource>,
    completions: mpsc::UnboundedSender<SourceId>,
}

impl OutputMixer {
    fn render(&mut self, out: &mut [f32], channels: usize) {
        let start = self.frames_rendered;

        for (k, frame) in out.chunks_mut(channels).enumerate() {
            let pos = start + k as u64;
            let mut value = 0.0f32;
            for source in &self.sources {
                if pos >= source.start_frame {
                    if let Some(s) = source.samples.get((pos - source.start_frame) as usize) {
                        value += s;
                    }
                }
            }
            frame.fill(value.clamp(-1.0, 1.0));
        }

        self.frames_rendered += (out.len() / channels) as u64;

        let rendered = self.frames_rendered;
        let completions = &self.completions;
        self.sources.retain(|source| {
            let ended = source.start_frame + source.samples.len() as u64 <= rendered;
            if ended {
                let _ = completions.send(source.id);
            }
            !ended
        });
    }
}

fn run_output_stream(
    mixer: Arc<Mutex<OutputMixer>>,
    ready_tx: oneshot::Sender<Result<(String, u32), DeviceError>>,
    stop_rx: std_mpsc::Receiver<()>,
) {
    let setup = || -> Result<(cpal::Stream, String, u32), DeviceError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| DeviceError::NotFound("speaker".to_string()))?;
        let name = device.name().unwrap_or_else(|_| "default output".to_string());
        let supported = device
            .default_output_config()
            .map_err(|e| DeviceError::Backend(e.to_string()))?;
        let stream_config: cpal::StreamConfig = supported.into();
        let channels = stream_config.channels as usize;
        let rate = stream_config.sample_rate.0;

        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| match mixer.lock() {
                    Ok(mut mixer) => mixer.render(data, channels),
                    Err(_) => data.fill(0.0),
                },
                |e| warn!("Speaker stream error: {}", e),
                None,
            )
            .map_err(build_error)?;

        stream.play().map_err(|e| DeviceError::Backend(e.to_string()))?;
        Ok((stream, name, rate))
    };

    match setup() {
        Ok((stream, name, rate)) => {
            let _ = ready_tx.send(Ok((name, rate)));
            let _ = stop_rx.recv();
            drop(stream);
        }
        Err(e) => {
            let _ = ready_tx.send(Err(e));
        }
    }
}

struct HostPlayback {
    name: String,
    source_rate: u32,
    device_rate: u32,
    mixer: Arc<Mutex<OutputMixer>>,
    stream: Option<StreamThread>,
}

impl PlaybackDevice for HostPlayback {
    fn now(&self) -> f64 {
        let frames = self.mixer.lock().map(|m| m.frames_rendered).unwrap_or(0);
        frames as f64 / self.device_rate as f64
    }

    fn start_source(
        &mut self,
        id: SourceId,
        samples: Vec<f32>,
        start_at: f64,
    ) -> Result<(), DeviceError> {
        if self.stream.is_none() {
            return Err(DeviceError::Released);
        }

        let samples = LinearResampler::convert(self.source_rate, self.device_rate, &samples);
        let start_frame = (start_at.max(0.0) * self.device_rate as f64).round() as u64;

        let mut mixer = self
            .mixer
            .lock()
            .map_err(|_| DeviceError::Backend("output mixer poisoned".to_string()))?;
        mixer.sources.push(HostSource {
            id,
            start_frame,
            samples,
        });
        Ok(())
    }

    fn stop_source(&mut self, id: SourceId) {
        if let Ok(mut mixer) = self.mixer.lock() {
            if let Some(index) = mixer.sources.iter().position(|s| s.id == id) {
                mixer.sources.remove(index);
                let _ = mixer.completions.send(id);
            }
        }
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        if let Some(stream) = self.stream.take() {
            stream.shutdown();
            info!("Host speaker released: {}", self.name);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
