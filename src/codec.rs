//! PCM codec adapter
//!
//! Converts between linear f32 samples and the transport's wire payload:
//! 16-bit signed little-endian PCM, base64 encoded. Outbound audio is
//! 16 kHz mono, inbound audio is 24 kHz mono.

use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sample rate of captured (outbound) audio
pub const INPUT_SAMPLE_RATE: u32 = 16000;

/// Sample rate of remote (inbound) audio
pub const OUTPUT_SAMPLE_RATE: u32 = 24000;

/// Errors produced while decoding an inbound payload
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("PCM16 payload has odd length ({0} bytes)")]
    OddLength(usize),

    #[error("payload is empty")]
    Empty,
}

/// Binary-safe audio payload as carried by the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioBlob {
    /// e.g. `audio/pcm;rate=16000`
    pub mime_type: String,
    /// Base64-encoded PCM16LE bytes
    pub data: String,
}

/// Build the mime type string for raw PCM at a given rate
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={}", sample_rate)
}

/// Encode f32 samples (-1.0..=1.0) into a 16 kHz wire blob
pub fn encode(samples: &[f32]) -> AudioBlob {
    AudioBlob {
        mime_type: pcm_mime_type(INPUT_SAMPLE_RATE),
        data: base64::engine::general_purpose::STANDARD.encode(f32_to_pcm16_bytes(samples)),
    }
}

/// Decode a base64 PCM16LE payload into f32 samples
pub fn decode(data: &str) -> Result<Vec<f32>, CodecError> {
    let bytes = base64::engine::general_purpose::STANDARD.decode(data)?;
    pcm16_bytes_to_f32(&bytes)
}

/// Convert f32 samples to PCM16LE bytes, clamping out-of-range input
pub fn f32_to_pcm16_bytes(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
        .flat_map(|s| s.to_le_bytes())
        .collect()
}

/// Convert PCM16LE bytes to f32 samples
pub fn pcm16_bytes_to_f32(bytes: &[u8]) -> Result<Vec<f32>, CodecError> {
    if bytes.is_empty() {
        return Err(CodecError::Empty);
    }

    if bytes.len() % 2 != 0 {
        return Err(CodecError::OddLength(bytes.len()));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect())
}
