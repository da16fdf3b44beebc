//! Fixed-capacity sample history
//!
//! Keeps the most recent samples for late joiners and windowed queries.
//! Once full, every append evicts the oldest sample.

use super::Sample;
use ringbuf::traits::{Consumer, Observer, RingBuffer};
use ringbuf::HeapRb;

/// Bounded FIFO of processed samples in arrival order
pub struct SampleBuffer {
    ring: HeapRb<Sample>,
}

impl SampleBuffer {
    /// Create a buffer holding at most `capacity` samples (minimum 1)
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: HeapRb::new(capacity.max(1)),
        }
    }

    /// Append a sample, evicting the oldest when full
    pub fn append(&mut self, sample: Sample) {
        self.ring.push_overwrite(sample);
    }

    /// Samples with `timestamp >= latest - window_secs`, oldest first
    ///
    /// The window is anchored at the most recent sample, not the wall clock,
    /// so a paused source still answers with its last stretch of data.
    pub fn window_since(&self, window_secs: f64) -> Vec<Sample> {
        let Some(latest) = self.latest() else {
            return Vec::new();
        };
        let cutoff = latest.timestamp - window_secs;
        self.ring
            .iter()
            .filter(|s| s.timestamp >= cutoff)
            .copied()
            .collect()
    }

    /// All buffered samples, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.ring.iter()
    }

    /// Most recently appended sample
    pub fn latest(&self) -> Option<Sample> {
        let (head, tail) = self.ring.as_slices();
        tail.last().or(head.last()).copied()
    }

    /// Drop every buffered sample
    pub fn clear(&mut self) {
        self.ring.clear();
    }

    pub fn len(&self) -> usize {
        self.ring.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity().get()
    }
}

impl std::fmt::Debug for SampleBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleBuffer")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}
