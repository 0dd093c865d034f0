//! Triple-buffered frame storage for decoder-to-renderer hand-off.
//!
//! Three pre-allocated [`FrameBuffer`]s rotate between roles:
//!
//! - **Back buffer**: the decoder writes the next frame here
//! - **Middle buffer**: latest completed frame, ready to swap
//! - **Front buffer**: the renderer reads from here
//!
//! The decoder and the renderer never hold the same buffer, so a display read
//! can never observe a frame that is still being written. Role changes are a
//! single atomic compare-exchange on a packed index byte.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::{ArcMutexGuard, Mutex, RawMutex};

use crate::frame_buffer::FrameBuffer;
use crate::video::VideoFormat;

/// Exclusive access to one buffer, independent of the borrow of its owner.
pub(crate) type SlotGuard = ArcMutexGuard<RawMutex, FrameBuffer>;

/// Buffer index constants for atomic state management.
const BACK: u8 = 0;
const MIDDLE: u8 = 1;
const FRONT: u8 = 2;

/// Internal state tracking which buffer is which.
/// Packed as: (back_idx << 4) | (middle_idx << 2) | front_idx
struct BufferState(AtomicU8);

impl BufferState {
    fn new() -> Self {
        Self(AtomicU8::new(Self::pack(
            BACK as usize,
            MIDDLE as usize,
            FRONT as usize,
        )))
    }

    fn unpack(packed: u8) -> (usize, usize, usize) {
        let back = ((packed >> 4) & 0x3) as usize;
        let middle = ((packed >> 2) & 0x3) as usize;
        let front = (packed & 0x3) as usize;
        (back, middle, front)
    }

    fn pack(back: usize, middle: usize, front: usize) -> u8 {
        ((back as u8) << 4) | ((middle as u8) << 2) | (front as u8)
    }

    /// Swaps back and middle (producer, after a completed write).
    fn swap_back_middle(&self) -> usize {
        self.update(|back, middle, front| (middle, back, front)).0
    }

    /// Swaps middle and front (consumer, before a read).
    fn swap_middle_front(&self) -> usize {
        self.update(|back, middle, front| (back, front, middle)).2
    }

    /// Applies `f` atomically and returns the new (back, middle, front).
    fn update<F>(&self, f: F) -> (usize, usize, usize)
    where
        F: Fn(usize, usize, usize) -> (usize, usize, usize),
    {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            let (back, middle, front) = Self::unpack(current);
            let next = f(back, middle, front);
            match self.0.compare_exchange_weak(
                current,
                Self::pack(next.0, next.1, next.2),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }

    fn current(&self) -> (usize, usize, usize) {
        Self::unpack(self.0.load(Ordering::Acquire))
    }
}

/// Three rotating frame buffers of one format.
pub struct TripleBuffer {
    buffers: [Arc<Mutex<FrameBuffer>>; 3],
    state: BufferState,
    /// Set when the middle buffer holds a frame the reader has not taken yet
    new_frame_available: AtomicBool,
}

impl TripleBuffer {
    /// Allocates three buffers for `format`.
    pub fn new(format: VideoFormat) -> Self {
        Self {
            buffers: [
                Arc::new(Mutex::new(FrameBuffer::new(format))),
                Arc::new(Mutex::new(FrameBuffer::new(format))),
                Arc::new(Mutex::new(FrameBuffer::new(format))),
            ],
            state: BufferState::new(),
            new_frame_available: AtomicBool::new(false),
        }
    }

    /// Locks the back buffer for writing.
    ///
    /// Only the producer calls this, so the back index cannot move while the
    /// guard is held.
    pub(crate) fn lock_back(&self) -> SlotGuard {
        let (back, _, _) = self.state.current();
        self.buffers[back].lock_arc()
    }

    /// Publishes the back buffer as the newest complete frame.
    ///
    /// May run while the writer still holds the guard from
    /// [`Self::lock_back`]; a reader that swaps to that buffer blocks on its
    /// mutex until the guard is dropped.
    pub(crate) fn commit(&self) {
        self.state.swap_back_middle();
        self.new_frame_available.store(true, Ordering::Release);
    }

    /// Takes the newest complete frame, if one arrived since the last read.
    pub(crate) fn read(&self) -> Option<SlotGuard> {
        if !self.new_frame_available.swap(false, Ordering::AcqRel) {
            return None;
        }
        let front = self.state.swap_middle_front();
        Some(self.buffers[front].lock_arc())
    }

    /// Returns true if a frame is waiting to be read.
    pub fn has_new_frame(&self) -> bool {
        self.new_frame_available.load(Ordering::Acquire)
    }

    /// Returns the shared handles to all three buffers.
    pub(crate) fn slots(&self) -> &[Arc<Mutex<FrameBuffer>>; 3] {
        &self.buffers
    }
}
