use crate::message::CanMessage;
use alloc::vec;
use alloc::vec::Vec;

/// Fixed-capacity circular buffer of frames.
///
/// Capacity is chosen by [`init_with_size`](Self::init_with_size) and never changes until the
/// next call to it or to [`free`](Self::free). The queue does no locking of its own; the driver
/// only touches it inside a critical section.
#[derive(Default)]
pub struct FrameQueue {
    buffer: Vec<CanMessage>,
    read_index: usize,
    count: usize,
    peak_count: usize,
}

impl FrameQueue {
    pub const fn new() -> Self {
        Self {
            buffer: Vec::new(),
            read_index: 0,
            count: 0,
            peak_count: 0,
        }
    }

    /// Drops any previous storage, allocates room for `size` frames and resets all counters.
    pub fn init_with_size(&mut self, size: usize) {
        self.buffer = vec![CanMessage::default(); size];
        self.read_index = 0;
        self.count = 0;
        self.peak_count = 0;
    }

    /// Appends a frame; returns `false` and leaves the queue untouched if it is full.
    pub fn append(&mut self, message: CanMessage) -> bool {
        let size = self.buffer.len();
        if self.count >= size {
            return false;
        }
        let mut write_index = self.read_index + self.count;
        if write_index >= size {
            write_index -= size;
        }
        self.buffer[write_index] = message;
        self.count += 1;
        if self.peak_count < self.count {
            self.peak_count = self.count;
        }
        true
    }

    /// Removes the oldest frame.
    pub fn remove(&mut self) -> Option<CanMessage> {
        if self.count == 0 {
            return None;
        }
        let message = self.buffer[self.read_index];
        self.count -= 1;
        self.read_index += 1;
        if self.read_index == self.buffer.len() {
            self.read_index = 0;
        }
        Some(message)
    }

    /// Releases the storage. The queue rejects every append until re-initialized.
    pub fn free(&mut self) {
        self.buffer = Vec::new();
        self.read_index = 0;
        self.count = 0;
        self.peak_count = 0;
    }

    #[inline]
    pub fn reset_peak_count(&mut self) {
        self.peak_count = self.count;
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.count == self.buffer.len()
    }

    /// Highest `count` seen since init or the last [`reset_peak_count`](Self::reset_peak_count).
    #[inline]
    pub fn peak_count(&self) -> usize {
        self.peak_count
    }
}
