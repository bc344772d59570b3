//! Chunk accumulator for the open-gate recording
//!
//! Holds the WAVE-encoded chunks produced since the gate opened and tracks
//! how many of them were already handed to the socket. Chunk 0 of a cycle is
//! a 44-byte header sized for the ceiling, chunk 1 is the optional lookback
//! splice, everything after is one chunk per audio block.
//!
//! # Bookkeeping
//!
//! In continuous mode the list becomes a sliding window: chunks are dropped
//! from the front and counted in `shifted_count`. Positions are compared in
//! "normalized" form (`len + shifted_count`) so that rotation never causes a
//! chunk to be sent twice or skipped.
//!
//! # Memory Budget
//!
//! Default ceiling is 5 MiB of PCM: 5,242,880 bytes / (2 × 512 samples)
//! = 5,120 chunks of 1 KB each at 16kHz (~164 seconds).

use std::io::Cursor;

use crate::audio::wave::{self, EncodingError, WaveSpec};
use crate::audio::{LookbackBuffer, Samples};

/// Whether a chunk carries the header or PCM payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    Header,
    Pcm,
}

/// One immutable encoded unit of audio
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    kind: ChunkKind,
    bytes: Vec<u8>,
}

impl Chunk {
    fn header(bytes: Vec<u8>) -> Self {
        Self {
            kind: ChunkKind::Header,
            bytes,
        }
    }

    fn pcm(bytes: Vec<u8>) -> Self {
        Self {
            kind: ChunkKind::Pcm,
            bytes,
        }
    }

    pub fn kind(&self) -> ChunkKind {
        self.kind
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Ordered chunk list with sent/shifted counters
///
/// Thread-safety: This struct is NOT internally synchronized. It is owned by
/// a single `GateController`.
#[derive(Debug)]
pub struct CaptureAccumulator {
    spec: WaveSpec,
    block_size: usize,
    max_chunks: usize,
    continuous: bool,
    chunks: Vec<Chunk>,
    sent_count: usize,
    shifted_count: usize,
    sent_bytes: usize,
    lookback_consumed: bool,
}

impl CaptureAccumulator {
    /// Create an accumulator
    ///
    /// # Arguments
    /// * `spec` - Output format (mono 16-bit at the input sample rate)
    /// * `block_size` - Samples per inbound block, used to size the placeholder header
    /// * `max_chunks` - Ceiling in chunks (0 disables the ceiling)
    /// * `continuous` - Rotate at the ceiling instead of stopping
    pub fn new(spec: WaveSpec, block_size: usize, max_chunks: usize, continuous: bool) -> Self {
        Self {
            spec,
            block_size,
            max_chunks,
            continuous,
            chunks: Vec::new(),
            sent_count: 0,
            shifted_count: 0,
            sent_bytes: 0,
            lookback_consumed: false,
        }
    }

    /// Start a new cycle: forget all chunks and counters
    pub fn on_gate_open(&mut self) {
        self.chunks.clear();
        self.sent_count = 0;
        self.shifted_count = 0;
        self.sent_bytes = 0;
        self.lookback_consumed = false;
    }

    /// Encode a block and append it
    ///
    /// On the first chunk of a cycle this also writes the placeholder header and,
    /// once per cycle, splices in whatever the lookback buffer holds. The header
    /// declares the ceiling size because the real length is unknown while
    /// streaming; `to_wave()` recomputes it for complete exports.
    ///
    /// An encoding error drops only the block's own chunk.
    pub fn append_block(
        &mut self,
        samples: &Samples,
        lookback: Option<&mut LookbackBuffer>,
    ) -> Result<(), EncodingError> {
        if self.chunks.is_empty() && self.shifted_count == 0 {
            let declared = self.max_chunks.saturating_mul(self.block_size);
            let header = wave::build_header(&self.spec, declared);
            self.chunks.push(Chunk::header(header.to_vec()));

            if !self.lookback_consumed {
                self.lookback_consumed = true;
                if let Some(pre_roll) = lookback.and_then(|lb| lb.drain()) {
                    match wave::encode(&pre_roll, self.spec.sample_rate, self.spec.channels) {
                        Ok(bytes) => {
                            log::debug!("CaptureAccumulator: lookback splice ({} samples)", pre_roll.len());
                            self.chunks.push(Chunk::pcm(bytes));
                        }
                        Err(e) => log::warn!("CaptureAccumulator: lookback dropped: {}", e),
                    }
                }
            }
        }

        let bytes = wave::encode(samples, self.spec.sample_rate, self.spec.channels)?;
        self.chunks.push(Chunk::pcm(bytes));
        Ok(())
    }

    /// True when a non-continuous recording reached its ceiling
    pub fn check_ceiling(&self) -> bool {
        !self.continuous && self.max_chunks > 0 && self.chunks.len() >= self.max_chunks
    }

    /// Drop the oldest chunks beyond the ceiling (continuous mode only)
    ///
    /// Returns the number of chunks dropped.
    pub fn rotate_if_over_ceiling(&mut self) -> usize {
        if !self.continuous || self.max_chunks == 0 || self.chunks.len() < self.max_chunks {
            return 0;
        }
        let shift = self.chunks.len() - self.max_chunks;
        if shift > 0 {
            self.chunks.drain(..shift);
            self.shifted_count += shift;
        }
        shift
    }

    /// Chunks not yet sent, given external sent/shifted counters
    pub fn pending_chunks_since(&self, sent_count: usize, shifted_count: usize) -> &[Chunk] {
        let normalized = self.chunks.len() + shifted_count;
        if sent_count >= normalized {
            return &[];
        }
        let rest = (normalized - sent_count).min(self.chunks.len());
        &self.chunks[self.chunks.len() - rest..]
    }

    /// Chunks not yet sent
    pub fn pending_chunks(&self) -> &[Chunk] {
        self.pending_chunks_since(self.sent_count, self.shifted_count)
    }

    /// Concatenated bytes of the unsent suffix
    pub fn pending_bytes(&self) -> Vec<u8> {
        self.pending_chunks()
            .iter()
            .flat_map(|c| c.bytes().iter().copied())
            .collect()
    }

    /// Take the unsent suffix for transmission and mark it as sent
    ///
    /// Returns `None` if there is nothing new.
    pub fn take_pending(&mut self) -> Option<Vec<u8>> {
        let normalized = self.chunks.len() + self.shifted_count;
        if self.sent_count >= normalized {
            return None;
        }
        let rest = normalized - self.sent_count;
        if rest > self.chunks.len() {
            log::warn!(
                "CaptureAccumulator: {} chunks rotated out before they were sent",
                rest - self.chunks.len()
            );
        }

        let bytes = self.pending_bytes();
        self.sent_count = normalized;
        self.sent_bytes += bytes.len();

        if bytes.is_empty() {
            None
        } else {
            Some(bytes)
        }
    }

    /// Materialize the whole recording as a WAVE file with an exact header
    ///
    /// Returns `None` if no PCM was recorded this cycle.
    pub fn to_wave(&self) -> Result<Option<Vec<u8>>, EncodingError> {
        let mut pcm = self
            .chunks
            .iter()
            .filter(|c| c.kind() == ChunkKind::Pcm)
            .flat_map(|c| c.bytes().chunks_exact(2))
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .peekable();
        if pcm.peek().is_none() {
            return Ok(None);
        }

        let mut cursor = Cursor::new(Vec::with_capacity(wave::HEADER_LEN + self.byte_length()));
        {
            let mut writer = hound::WavWriter::new(&mut cursor, self.spec.to_hound())?;
            for sample in pcm {
                writer.write_sample(sample)?;
            }
            writer.finalize()?;
        }
        Ok(Some(cursor.into_inner()))
    }

    /// Total bytes of the chunks currently held
    pub fn byte_length(&self) -> usize {
        self.chunks.iter().map(Chunk::len).sum()
    }

    /// Bytes handed to the transport since the gate opened
    pub fn sent_bytes(&self) -> usize {
        self.sent_bytes
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn sent_count(&self) -> usize {
        self.sent_count
    }

    pub fn shifted_count(&self) -> usize {
        self.shifted_count
    }

    pub fn max_chunks(&self) -> usize {
        self.max_chunks
    }

    pub fn is_continuous(&self) -> bool {
        self.continuous
    }

    pub fn spec(&self) -> &WaveSpec {
        &self.spec
    }
}
