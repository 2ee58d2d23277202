use anyhow::{Context, Result};
use hound::{SampleFormat, WavReader};
use std::path::Path;
use tracing::info;

use super::device::DeviceError;

/// A WAV file loaded into memory as interleaved f32 samples
pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path).context("Failed to open WAV file")?;

        let spec = reader.spec();
        let samples: Vec<f32> = match spec.sample_format {
            SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to read audio samples")?,
            SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<Vec<_>, _>>()
                    .context("Failed to read audio samples")?
            }
        };

        let duration_seconds =
            samples.len() as f64 / (spec.sample_rate as f64 * spec.channels as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }

    /// Fold down to mono and decimate to `target_rate`.
    ///
    /// Only integer downsampling ratios are supported.
    pub fn to_mono(&self, target_rate: u32) -> Result<Vec<f32>, DeviceError> {
        if self.sample_rate < target_rate || self.sample_rate % target_rate != 0 {
            return Err(DeviceError::UnsupportedFormat(format!(
                "{}: cannot convert {}Hz to {}Hz",
                self.path, self.sample_rate, target_rate
            )));
        }

        let mono = fold_to_mono(&self.samples, self.channels);
        Ok(decimate(&mono, (self.sample_rate / target_rate) as usize))
    }
}

/// Average interleaved channels into one
pub fn fold_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }

    samples
        .chunks_exact(channels as usize)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Decimate by an integer ratio, averaging each group of `ratio` samples
///
/// A short final group is averaged over what it has.
pub fn decimate(samples: &[f32], ratio: usize) -> Vec<f32> {
    if ratio <= 1 {
        return samples.to_vec();
    }

    samples
        .chunks(ratio)
        .map(|group| group.iter().sum::<f32>() / group.len() as f32)
        .collect()
}
