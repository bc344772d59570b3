//! Linear PCM WAVE encoding
//!
//! Builds the canonical 44-byte RIFF/WAVE header and converts sample blocks
//! into 16-bit little-endian PCM payloads. The header layout follows the
//! classic `RIFF` → `fmt ` → `data` ordering with no extra chunks.

use thiserror::Error;

use super::block::Samples;

/// Size of the canonical header in bytes
pub const HEADER_LEN: usize = 44;

/// PCM format code in the `fmt ` chunk
const FORMAT_PCM: u16 = 1;

/// Errors from encoding or header parsing
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodingError {
    #[error("no samples to encode")]
    MissingSamples,
    #[error("sample rate is missing or zero")]
    MissingSampleRate,
    #[error("channel count is missing or zero")]
    MissingChannels,
    #[error("invalid WAVE header: {0}")]
    InvalidHeader(String),
    #[error("failed to write WAVE file: {0}")]
    Writer(String),
}

impl From<hound::Error> for EncodingError {
    fn from(e: hound::Error) -> Self {
        EncodingError::Writer(e.to_string())
    }
}

impl EncodingError {
    pub fn name(&self) -> &'static str {
        "EncodingError"
    }
}

/// Stream parameters written into the `fmt ` chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaveSpec {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl WaveSpec {
    /// Mono 16-bit PCM, the only layout the encoder produces
    pub fn pcm16(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
            bits_per_sample: 16,
        }
    }

    /// The same layout as a `hound` writer spec
    pub fn to_hound(&self) -> hound::WavSpec {
        hound::WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: self.bits_per_sample,
            sample_format: hound::SampleFormat::Int,
        }
    }

    pub fn bytes_per_sample(&self) -> u32 {
        u32::from(self.bits_per_sample / 8)
    }

    pub fn block_align(&self) -> u16 {
        self.channels * (self.bits_per_sample / 8)
    }

    pub fn byte_rate(&self) -> u32 {
        self.sample_rate * self.bytes_per_sample() * u32::from(self.channels)
    }

    /// Payload size in bytes for `sample_count` frames
    pub fn data_len(&self, sample_count: usize) -> u32 {
        let len = sample_count as u64 * u64::from(self.channels) * u64::from(self.bytes_per_sample());
        len.min(u64::from(u32::MAX - 36)) as u32
    }
}

/// A parsed canonical header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaveHeader {
    pub spec: WaveSpec,
    pub riff_size: u32,
    pub data_size: u32,
}

impl WaveHeader {
    pub fn sample_count(&self) -> usize {
        let frame = u32::from(self.spec.block_align());
        if frame == 0 {
            return 0;
        }
        (self.data_size / frame) as usize
    }
}

/// Build a header declaring `sample_count` frames
pub fn build_header(spec: &WaveSpec, sample_count: usize) -> [u8; HEADER_LEN] {
    let data_len = spec.data_len(sample_count);
    let mut header = [0u8; HEADER_LEN];

    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&(36 + data_len).to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");
    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&16u32.to_le_bytes());
    header[20..22].copy_from_slice(&FORMAT_PCM.to_le_bytes());
    header[22..24].copy_from_slice(&spec.channels.to_le_bytes());
    header[24..28].copy_from_slice(&spec.sample_rate.to_le_bytes());
    header[28..32].copy_from_slice(&spec.byte_rate().to_le_bytes());
    header[32..34].copy_from_slice(&spec.block_align().to_le_bytes());
    header[34..36].copy_from_slice(&spec.bits_per_sample.to_le_bytes());
    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&data_len.to_le_bytes());

    header
}

/// Parse a canonical 44-byte header
pub fn read_header(bytes: &[u8]) -> Result<WaveHeader, EncodingError> {
    if bytes.len() < HEADER_LEN {
        return Err(EncodingError::InvalidHeader(format!(
            "expected {} bytes, got {}",
            HEADER_LEN,
            bytes.len()
        )));
    }

    let tag = |at: usize, expected: &[u8; 4]| -> Result<(), EncodingError> {
        if &bytes[at..at + 4] != expected {
            return Err(EncodingError::InvalidHeader(format!(
                "missing '{}' tag",
                String::from_utf8_lossy(expected)
            )));
        }
        Ok(())
    };
    let u16_at = |at: usize| u16::from_le_bytes([bytes[at], bytes[at + 1]]);
    let u32_at =
        |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);

    tag(0, b"RIFF")?;
    tag(8, b"WAVE")?;
    tag(12, b"fmt ")?;
    tag(36, b"data")?;

    if u16_at(20) != FORMAT_PCM {
        return Err(EncodingError::InvalidHeader(format!(
            "unsupported format code {}",
            u16_at(20)
        )));
    }

    Ok(WaveHeader {
        spec: WaveSpec {
            sample_rate: u32_at(24),
            channels: u16_at(22),
            bits_per_sample: u16_at(34),
        },
        riff_size: u32_at(4),
        data_size: u32_at(40),
    })
}

/// Encode samples as 16-bit little-endian PCM without a header
///
/// Float input is clamped to [-1, 1] first. Integer input is copied verbatim.
pub fn encode(samples: &Samples, sample_rate: u32, channels: u16) -> Result<Vec<u8>, EncodingError> {
    if samples.is_empty() {
        return Err(EncodingError::MissingSamples);
    }
    if sample_rate == 0 {
        return Err(EncodingError::MissingSampleRate);
    }
    if channels == 0 {
        return Err(EncodingError::MissingChannels);
    }

    let mut out = Vec::with_capacity(samples.len() * 2);
    match samples {
        Samples::Int16(s) => {
            for &sample in s {
                out.extend_from_slice(&sample.to_le_bytes());
            }
        }
        Samples::Float32(s) => {
            for &sample in s {
                out.extend_from_slice(&float_to_i16(sample).to_le_bytes());
            }
        }
    }
    Ok(out)
}

/// Asymmetric float → i16 conversion: negative values scale by 0x8000,
/// non-negative by 0x7FFF, truncating toward zero.
pub fn float_to_i16(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}
