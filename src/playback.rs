//! Gapless playback scheduling of inbound audio chunks
//!
//! Every chunk starts at `max(cursor, device now)` and pushes the cursor to
//! its own end, so consecutive chunks play back to back with no gap and no
//! overlap, and an idle device starts the next chunk immediately. All times
//! are seconds in the playback device's clock.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::audio::{DeviceError, PlaybackDevice, SourceId};
use crate::codec::OUTPUT_SAMPLE_RATE;

/// One decoded unit of inbound audio
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioChunk {
    /// A chunk at the protocol's output rate (24 kHz)
    pub fn new(samples: Vec<f32>) -> Self {
        Self {
            samples,
            sample_rate: OUTPUT_SAMPLE_RATE,
        }
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Where a chunk landed on the device timeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSource {
    pub id: SourceId,
    pub start_at: f64,
    pub duration: f64,
}

impl ScheduledSource {
    pub fn end_at(&self) -> f64 {
        self.start_at + self.duration
    }
}

/// Owns the playback device and the set of scheduled sources
pub struct PlaybackScheduler {
    device: Option<Box<dyn PlaybackDevice>>,
    /// Device time at which the next chunk starts
    cursor: f64,
    /// Sources queued or playing, keyed by id (ids are monotonic)
    scheduled: BTreeMap<SourceId, ScheduledSource>,
    next_id: SourceId,
}

impl PlaybackScheduler {
    pub fn new(device: Box<dyn PlaybackDevice>) -> Self {
        info!("Playback scheduler ready on {}", device.name());

        Self {
            device: Some(device),
            cursor: 0.0,
            scheduled: BTreeMap::new(),
            next_id: 0,
        }
    }

    /// Schedule a chunk right after everything already scheduled
    ///
    /// If the device rejects the chunk it is dropped and the cursor does not
    /// move.
    pub fn schedule(&mut self, chunk: AudioChunk) -> Result<ScheduledSource, DeviceError> {
        let device = self.device.as_mut().ok_or(DeviceError::Released)?;

        let duration = chunk.duration();
        let start_at = self.cursor.max(device.now());
        let id = self.next_id;

        device.start_source(id, chunk.samples, start_at)?;

        self.next_id += 1;
        self.cursor = start_at + duration;

        let source = ScheduledSource {
            id,
            start_at,
            duration,
        };
        self.scheduled.insert(id, source);

        debug!(
            "Scheduled source {} at {:.3}s for {:.3}s ({} pending)",
            id,
            start_at,
            duration,
            self.scheduled.len()
        );

        Ok(source)
    }

    /// Handle a completion notification from the device.
    ///
    /// Returns true when this completion emptied the set, i.e. everything
    /// scheduled so far has finished playing.
    pub fn on_source_ended(&mut self, id: SourceId) -> bool {
        self.scheduled.remove(&id).is_some() && self.scheduled.is_empty()
    }

    /// Stop everything queued or playing and restart the timeline at "now".
    ///
    /// Returns the number of sources stopped.
    pub fn interrupt(&mut self) -> usize {
        let stopped = self.stop_all();

        self.cursor = match &self.device {
            Some(device) => device.now(),
            None => 0.0,
        };

        if stopped > 0 {
            info!("Playback interrupted: {} sources stopped", stopped);
        }
        stopped
    }

    /// Stop everything and release the playback device. Idempotent.
    pub fn teardown(&mut self) -> Result<(), DeviceError> {
        self.stop_all();
        self.cursor = 0.0;

        match self.device.take() {
            Some(mut device) => {
                info!("Releasing playback device: {}", device.name());
                device.close()
            }
            None => Ok(()),
        }
    }

    fn stop_all(&mut self) -> usize {
        let ids: Vec<SourceId> = self.scheduled.keys().copied().collect();
        self.scheduled.clear();

        match self.device.as_mut() {
            Some(device) => {
                for &id in &ids {
                    device.stop_source(id);
                }
            }
            None if !ids.is_empty() => {
                warn!("{} sources tracked without a playback device", ids.len());
            }
            None => {}
        }

        ids.len()
    }

    /// Device time at which the next chunk would start if the device were busy
    pub fn cursor(&self) -> f64 {
        self.cursor
    }

    /// Sources queued or playing, in schedule order
    pub fn scheduled(&self) -> impl Iterator<Item = &ScheduledSource> {
        self.scheduled.values()
    }

    pub fn pending(&self) -> usize {
        self.scheduled.len()
    }

    pub fn is_idle(&self) -> bool {
        self.scheduled.is_empty()
    }

    pub fn is_released(&self) -> bool {
        self.device.is_none()
    }

    /// Current device time, if the device is still held
    pub fn now(&self) -> Option<f64> {
        self.device.as_ref().map(|d| d.now())
    }
}
