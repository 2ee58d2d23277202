//! Microphone capture: frames in, encoded sends out
//!
//! Outbound audio has no buffering tier. A frame that cannot be sent right
//! now (transport missing, not open, or refusing) is dropped and the next
//! frame is tried on its own.

use tokio::sync::mpsc;
use tracing::{debug, info, trace};

use crate::audio::{CaptureDevice, DeviceError};
use crate::codec;
use crate::transport::TransportHandle;

/// Captured frames waiting for the session loop
pub const FRAME_QUEUE_DEPTH: usize = 32;

/// Why a frame was not sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// No transport, or the transport is not open yet / any more
    NotOpen,
    /// The transport refused the frame
    SendFailed,
    /// The pipeline was stopped
    Stopped,
}

/// Result of pushing one frame through the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Sent { sequence: u64 },
    Dropped(DropReason),
}

/// Owns the capture device for the lifetime of a streaming session
pub struct CapturePipeline {
    device: Option<Box<dyn CaptureDevice>>,
    next_sequence: u64,
}

impl CapturePipeline {
    /// Start the device. Frames arrive on the returned receiver in capture
    /// order and should be fed back through [`CapturePipeline::on_frame`].
    pub fn start(
        mut device: Box<dyn CaptureDevice>,
        queue_depth: usize,
    ) -> Result<(Self, mpsc::Receiver<Vec<f32>>), DeviceError> {
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        device.start(tx)?;

        info!("Capture started on {}", device.name());

        Ok((
            Self {
                device: Some(device),
                next_sequence: 0,
            },
            rx,
        ))
    }

    /// Encode a frame and make exactly one send attempt
    pub fn on_frame(
        &mut self,
        samples: &[f32],
        transport: Option<&dyn TransportHandle>,
    ) -> FrameOutcome {
        if self.device.is_none() {
            return FrameOutcome::Dropped(DropReason::Stopped);
        }

        let Some(transport) = transport.filter(|t| t.is_open()) else {
            trace!("Transport not open, dropping frame");
            return FrameOutcome::Dropped(DropReason::NotOpen);
        };

        match transport.send_audio(codec::encode(samples)) {
            Ok(()) => {
                let sequence = self.next_sequence;
                self.next_sequence += 1;
                FrameOutcome::Sent { sequence }
            }
            Err(e) => {
                debug!("Dropping frame: {}", e);
                FrameOutcome::Dropped(DropReason::SendFailed)
            }
        }
    }

    /// Release the device. Idempotent.
    pub fn stop(&mut self) -> Result<(), DeviceError> {
        match self.device.take() {
            Some(mut device) => {
                info!(
                    "Stopping capture on {} ({} frames sent)",
                    device.name(),
                    self.next_sequence
                );
                device.stop()
            }
            None => Ok(()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.device.is_some()
    }

    /// Number of frames handed to the transport so far
    pub fn frames_sent(&self) -> u64 {
        self.next_sequence
    }
}
