//! Audio side of the pipeline
//!
//! This module holds the inbound block types, the lookback ring buffer and
//! the WAVE encoder. Nothing here captures audio; blocks come from an
//! external audio graph at a fixed cadence.

mod block;
mod lookback;
pub mod wave;

use thiserror::Error;

pub use block::{AudioBlock, SampleKind, Samples};
pub use lookback::{LookbackBuffer, RingBuffer};
pub use wave::{EncodingError, WaveHeader, WaveSpec};

/// Input block disagrees with the configured input contract
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatMismatchError {
    #[error("Sample-rate mismatch! Should be '{expected}' is '{actual}'")]
    SampleRate { expected: u32, actual: u32 },
    #[error("Array type mismatch! Input samples are of type '{}' but expected: {}", actual.as_str(), expected.as_str())]
    SampleKind {
        expected: SampleKind,
        actual: SampleKind,
    },
}

impl FormatMismatchError {
    pub fn name(&self) -> &'static str {
        "FormatMismatchError"
    }

    /// Check a block against the configured rate and element kind
    pub fn check(block: &AudioBlock, sample_rate: u32, kind: SampleKind) -> Result<(), Self> {
        if block.sample_rate != sample_rate {
            return Err(FormatMismatchError::SampleRate {
                expected: sample_rate,
                actual: block.sample_rate,
            });
        }
        if block.kind() != kind {
            return Err(FormatMismatchError::SampleKind {
                expected: kind,
                actual: block.kind(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_check() {
        let block = AudioBlock::int16(vec![0; 4], 16000);
        assert!(FormatMismatchError::check(&block, 16000, SampleKind::Int16).is_ok());

        let err = FormatMismatchError::check(&block, 48000, SampleKind::Int16).unwrap_err();
        assert!(err.to_string().contains("48000"));

        let err = FormatMismatchError::check(&block, 16000, SampleKind::Float32).unwrap_err();
        assert!(matches!(err, FormatMismatchError::SampleKind { .. }));
        assert!(err.to_string().contains("Float32"));
    }
}
