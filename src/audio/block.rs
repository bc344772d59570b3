//! PCM blocks as delivered by the external audio graph
//!
//! Blocks are mono and fixed-size. The element type is either 16-bit integer
//! or 32-bit float; the configured kind is checked once against the first block.

use serde::{Deserialize, Serialize};

/// Element type of incoming samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleKind {
    Int16,
    Float32,
}

impl SampleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SampleKind::Int16 => "Int16",
            SampleKind::Float32 => "Float32",
        }
    }
}

/// Sample payload of one block
#[derive(Debug, Clone, PartialEq)]
pub enum Samples {
    Int16(Vec<i16>),
    Float32(Vec<f32>),
}

impl Samples {
    pub fn kind(&self) -> SampleKind {
        match self {
            Samples::Int16(_) => SampleKind::Int16,
            Samples::Float32(_) => SampleKind::Float32,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Samples::Int16(s) => s.len(),
            Samples::Float32(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One block of mono PCM at a nominal sample rate
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBlock {
    pub samples: Samples,
    pub sample_rate: u32,
}

impl AudioBlock {
    pub fn int16(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples: Samples::Int16(samples),
            sample_rate,
        }
    }

    pub fn float32(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: Samples::Float32(samples),
            sample_rate,
        }
    }

    pub fn kind(&self) -> SampleKind {
        self.samples.kind()
    }

    /// Duration of this block in milliseconds
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.samples.len() as u64 * 1000) / self.sample_rate as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_kind_and_duration() {
        let block = AudioBlock::int16(vec![0i16; 1600], 16000);
        assert_eq!(block.kind(), SampleKind::Int16);
        assert_eq!(block.duration_ms(), 100);

        let block = AudioBlock::float32(vec![0.0; 512], 16000);
        assert_eq!(block.kind(), SampleKind::Float32);
        assert_eq!(block.duration_ms(), 32);
    }

    #[test]
    fn test_zero_rate_duration() {
        let block = AudioBlock::int16(vec![0i16; 10], 0);
        assert_eq!(block.duration_ms(), 0);
    }
}
