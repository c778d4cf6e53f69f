//! Streaming sample buffer.
//!
//! The production ring lives outside this crate; the core only needs write,
//! read, and bytes-ready against the trait. [`MemoryBuffer`] is the bounded
//! in-memory implementation the device uses by default and the tests drive.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

/// Sample transport between the acquisition engine and the application.
pub trait SampleBuffer: Send {
    /// Append samples, returning how many were accepted. A short count means
    /// the buffer is full and the writer overflowed.
    fn write_samples(&mut self, samples: &[u32]) -> usize;

    /// Move up to `out.len()` samples out, returning how many were read.
    fn read_samples(&mut self, out: &mut [u32]) -> usize;

    /// Samples currently queued.
    fn samples_ready(&self) -> usize;

    /// Bytes currently queued (samples are 4 bytes on this interface).
    fn bytes_ready(&self) -> usize {
        self.samples_ready() * 4
    }
}

/// Bounded FIFO of samples.
#[derive(Debug)]
pub struct MemoryBuffer {
    queue: VecDeque<u32>,
    capacity: usize,
}

impl MemoryBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl SampleBuffer for MemoryBuffer {
    fn write_samples(&mut self, samples: &[u32]) -> usize {
        let room = self.capacity - self.queue.len();
        let n = samples.len().min(room);
        self.queue.extend(&samples[..n]);
        n
    }

    fn read_samples(&mut self, out: &mut [u32]) -> usize {
        let n = out.len().min(self.queue.len());
        for slot in out[..n].iter_mut() {
            if let Some(v) = self.queue.pop_front() {
                *slot = v;
            }
        }
        n
    }

    fn samples_ready(&self) -> usize {
        self.queue.len()
    }
}

/// Shared handle to a sample buffer, one per direction.
pub type SharedBuffer = Arc<Mutex<dyn SampleBuffer>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let mut buf = MemoryBuffer::new(8);
        assert_eq!(buf.write_samples(&[1, 2, 3]), 3);
        assert_eq!(buf.samples_ready(), 3);
        assert_eq!(buf.bytes_ready(), 12);
        let mut out = [0u32; 2];
        assert_eq!(buf.read_samples(&mut out), 2);
        assert_eq!(out, [1, 2]);
        assert_eq!(buf.samples_ready(), 1);
    }

    #[test]
    fn test_short_write_on_full() {
        let mut buf = MemoryBuffer::new(4);
        assert_eq!(buf.write_samples(&[1, 2, 3]), 3);
        assert_eq!(buf.write_samples(&[4, 5, 6]), 1);
        let mut out = [0u32; 8];
        assert_eq!(buf.read_samples(&mut out), 4);
        assert_eq!(&out[..4], &[1, 2, 3, 4]);
    }
}
