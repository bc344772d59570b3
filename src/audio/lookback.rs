//! Lookback ring buffer
//!
//! Keeps the most recent samples while the gate is closed so that the start of
//! an utterance is not lost. Writes never fail: when full, the oldest samples
//! are overwritten.
//!
//! # Memory Budget
//!
//! At 16kHz mono with 500ms lookback:
//! - 8,000 samples × 2 bytes (int16) = 16 KB

use ringbuf::traits::{Consumer, Observer, RingBuffer as _};
use ringbuf::HeapRb;

use super::block::{SampleKind, Samples};

/// Fixed-capacity circular sample store
pub struct RingBuffer<T> {
    rb: HeapRb<T>,
    channels: u16,
}

impl<T: Copy + Default> RingBuffer<T> {
    /// Create a buffer holding `capacity` samples (at least one)
    pub fn new(capacity: usize, channels: u16) -> Self {
        Self {
            rb: HeapRb::new(capacity.max(1)),
            channels,
        }
    }

    pub fn capacity(&self) -> usize {
        self.rb.capacity().get()
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Number of samples ready to be pulled (never above capacity)
    pub fn frames_available(&self) -> usize {
        self.rb.occupied_len()
    }

    /// Write samples, overwriting the oldest when full
    ///
    /// Blocks larger than the capacity are written in capacity-sized pieces,
    /// so only the newest `capacity` samples survive.
    pub fn push(&mut self, samples: &[T]) {
        let capacity = self.capacity();
        for piece in samples.chunks(capacity) {
            self.rb.push_slice_overwrite(piece);
        }
    }

    /// Copy up to `target.len()` of the oldest samples into `target`
    ///
    /// Returns the number of samples actually copied.
    pub fn pull(&mut self, target: &mut [T]) -> usize {
        self.rb.pop_slice(target)
    }

    fn drain_vec(&mut self) -> Vec<T> {
        let mut out = vec![T::default(); self.frames_available()];
        let n = self.pull(&mut out);
        out.truncate(n);
        out
    }
}

impl<T> std::fmt::Debug for RingBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.rb.capacity())
            .field("occupied", &self.rb.occupied_len())
            .field("channels", &self.channels)
            .finish()
    }
}

/// Ring buffer typed by the configured input element kind
#[derive(Debug)]
pub enum LookbackBuffer {
    Int16(RingBuffer<i16>),
    Float32(RingBuffer<f32>),
}

impl LookbackBuffer {
    /// Lookback capacity in samples for a duration at a sample rate
    pub fn samples_for(lookback_ms: u32, sample_rate: u32) -> usize {
        ((f64::from(lookback_ms) / 1000.0) * f64::from(sample_rate)).round() as usize
    }

    pub fn new(kind: SampleKind, capacity: usize) -> Self {
        match kind {
            SampleKind::Int16 => LookbackBuffer::Int16(RingBuffer::new(capacity, 1)),
            SampleKind::Float32 => LookbackBuffer::Float32(RingBuffer::new(capacity, 1)),
        }
    }

    pub fn kind(&self) -> SampleKind {
        match self {
            LookbackBuffer::Int16(_) => SampleKind::Int16,
            LookbackBuffer::Float32(_) => SampleKind::Float32,
        }
    }

    pub fn capacity(&self) -> usize {
        match self {
            LookbackBuffer::Int16(rb) => rb.capacity(),
            LookbackBuffer::Float32(rb) => rb.capacity(),
        }
    }

    pub fn frames_available(&self) -> usize {
        match self {
            LookbackBuffer::Int16(rb) => rb.frames_available(),
            LookbackBuffer::Float32(rb) => rb.frames_available(),
        }
    }

    pub fn push(&mut self, samples: &Samples) {
        match (self, samples) {
            (LookbackBuffer::Int16(rb), Samples::Int16(s)) => rb.push(s),
            (LookbackBuffer::Float32(rb), Samples::Float32(s)) => rb.push(s),
            (rb, s) => log::debug!(
                "Lookback: ignoring {} block for {} buffer",
                s.kind().as_str(),
                rb.kind().as_str()
            ),
        }
    }

    /// Pull every available sample, or `None` when empty
    pub fn drain(&mut self) -> Option<Samples> {
        if self.frames_available() == 0 {
            return None;
        }
        Some(match self {
            LookbackBuffer::Int16(rb) => Samples::Int16(rb.drain_vec()),
            LookbackBuffer::Float32(rb) => Samples::Float32(rb.drain_vec()),
        })
    }
}
