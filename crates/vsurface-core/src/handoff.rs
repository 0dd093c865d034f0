//! Decoder-to-renderer frame hand-off.
//!
//! [`FrameHandoff`] owns the negotiated frame buffers and is the only
//! synchronization point between the decoder thread and the render thread:
//!
//! ```text
//! decoder:  lock() ──► write pixels ──► drop guard (commit) ──► publish()
//!                                                                  │ rate gate
//!                                                                  ▼
//! render:                               DisplaySink::pump() ◄── ready notice
//! ```
//!
//! Committing a frame never notifies the renderer by itself; only a publish
//! that passes the rate gate does. At most one ready notice is ever pending,
//! and the renderer always reads the newest committed frame, so intermediate
//! frames are skipped rather than queued.
//!
//! # Buffering modes
//!
//! - [`BufferingMode::Triple`]: the writer fills the back buffer while the
//!   renderer holds the front buffer. Neither side waits and a display read
//!   can never observe a partially written frame.
//! - [`BufferingMode::Single`]: one buffer shared under a mutex. A third of the
//!   memory, still tear-free, but the decoder's `lock()` waits while the
//!   renderer copies the frame out.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;

use crate::config::{BufferingMode, HandoffConfig};
use crate::frame_buffer::FrameBuffer;
use crate::metrics::HandoffMetrics;
use crate::rate_gate::RateGate;
use crate::triple_buffer::{SlotGuard, TripleBuffer};
use crate::video::VideoFormat;

/// Marker sent to the render thread when a frame is worth displaying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyFrame {
    /// Monotonic publish sequence number
    pub seq: u64,
    /// When the publish was accepted
    pub published_at: Instant,
}

/// Callback used to wake the render loop (e.g. request a repaint).
pub type Waker = Arc<dyn Fn() + Send + Sync>;

/// Buffers for one negotiated format.
enum FrameSlots {
    Single {
        buffer: Arc<Mutex<FrameBuffer>>,
        fresh: AtomicBool,
    },
    Triple(TripleBuffer),
}

impl FrameSlots {
    fn new(mode: BufferingMode, format: VideoFormat) -> Self {
        match mode {
            BufferingMode::Single => FrameSlots::Single {
                buffer: Arc::new(Mutex::new(FrameBuffer::new(format))),
                fresh: AtomicBool::new(false),
            },
            BufferingMode::Triple => FrameSlots::Triple(TripleBuffer::new(format)),
        }
    }

    fn lock_write(&self) -> SlotGuard {
        match self {
            FrameSlots::Single { buffer, .. } => buffer.lock_arc(),
            FrameSlots::Triple(triple) => triple.lock_back(),
        }
    }

    fn commit(&self) {
        match self {
            FrameSlots::Single { fresh, .. } => fresh.store(true, Ordering::Release),
            FrameSlots::Triple(triple) => triple.commit(),
        }
    }

    fn read(&self) -> Option<SlotGuard> {
        match self {
            FrameSlots::Single { buffer, fresh } => fresh
                .swap(false, Ordering::AcqRel)
                .then(|| buffer.lock_arc()),
            FrameSlots::Triple(triple) => triple.read(),
        }
    }

    fn handles(&self) -> Vec<Arc<Mutex<FrameBuffer>>> {
        match self {
            FrameSlots::Single { buffer, .. } => vec![Arc::clone(buffer)],
            FrameSlots::Triple(triple) => triple.slots().iter().map(Arc::clone).collect(),
        }
    }
}

/// The currently negotiated output.
struct Output {
    format: VideoFormat,
    slots: Arc<FrameSlots>,
}

/// Exclusive write access to the current write buffer.
///
/// Dereferences to the frame's pixel bytes. Dropping the guard (or calling
/// [`FrameWriteGuard::unlock`]) ends the write and commits the frame; it does
/// not notify the renderer.
pub struct FrameWriteGuard {
    slots: Arc<FrameSlots>,
    buffer: SlotGuard,
}

impl FrameWriteGuard {
    /// Returns the format of the buffer being written.
    pub fn format(&self) -> VideoFormat {
        self.buffer.format()
    }

    /// Returns the bytes per row.
    pub fn pitch(&self) -> usize {
        self.buffer.format().pitch()
    }

    /// Returns the raw start address of the buffer.
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.buffer.as_mut_ptr()
    }

    /// Ends the write epoch.
    pub fn unlock(self) {}
}

impl Deref for FrameWriteGuard {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buffer.as_slice()
    }
}

impl DerefMut for FrameWriteGuard {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buffer.as_mut_slice()
    }
}

impl Drop for FrameWriteGuard {
    fn drop(&mut self) {
        // The buffer lock is released right after this body runs; a reader
        // that swaps to this buffer in between waits on its mutex.
        self.slots.commit();
    }
}

/// Read access to a committed frame.
pub struct FrameReadGuard {
    buffer: SlotGuard,
}

impl Deref for FrameReadGuard {
    type Target = FrameBuffer;

    fn deref(&self) -> &FrameBuffer {
        &self.buffer
    }
}

/// Synchronization boundary between the decoder and the renderer.
pub struct FrameHandoff {
    mode: BufferingMode,
    /// Negotiated buffers; `None` means "no output"
    output: Mutex<Option<Output>>,
    /// Cleared by the decoder's cleanup callback until the next negotiation
    attached: AtomicBool,
    /// Bumped on every negotiation and release
    format_epoch: AtomicU64,
    /// Current session generation; callbacks from other generations are ignored
    generation: AtomicU64,
    ready_seq: AtomicU64,
    gate: RateGate,
    ready_tx: Sender<ReadyFrame>,
    ready_rx: Receiver<ReadyFrame>,
    waker: Mutex<Option<Waker>>,
    metrics: HandoffMetrics,
}

impl FrameHandoff {
    /// Creates a hand-off with no negotiated output.
    pub fn new(config: &HandoffConfig) -> Self {
        // Capacity 1: a second notice while one is pending is coalesced.
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        Self {
            mode: config.mode,
            output: Mutex::new(None),
            attached: AtomicBool::new(false),
            format_epoch: AtomicU64::new(0),
            generation: AtomicU64::new(0),
            ready_seq: AtomicU64::new(0),
            gate: RateGate::new(config.publish_interval),
            ready_tx,
            ready_rx,
            waker: Mutex::new(None),
            metrics: HandoffMetrics::new(),
        }
    }

    /// Returns the buffering mode.
    pub fn mode(&self) -> BufferingMode {
        self.mode
    }

    /// Returns the shared counters.
    pub fn metrics(&self) -> &HandoffMetrics {
        &self.metrics
    }

    /// Returns the negotiated format, or `None` in the "no output" state.
    pub fn format(&self) -> Option<VideoFormat> {
        self.output.lock().as_ref().map(|o| o.format)
    }

    /// Returns the format epoch, bumped on every buffer (re)allocation or release.
    pub fn format_epoch(&self) -> u64 {
        self.format_epoch.load(Ordering::Acquire)
    }

    /// Returns the sequence number of the last accepted publish.
    pub fn ready_seq(&self) -> u64 {
        self.ready_seq.load(Ordering::Acquire)
    }

    /// Returns the total bytes currently allocated for frame buffers.
    pub fn allocated_bytes(&self) -> usize {
        self.output
            .lock()
            .as_ref()
            .map(|o| o.format.frame_size() * self.mode.buffer_count() as usize)
            .unwrap_or(0)
    }

    /// Registers a callback invoked after each ready notice is queued.
    pub fn set_waker(&self, waker: Option<Waker>) {
        *self.waker.lock() = waker;
    }

    /// Returns a receiver for ready notices.
    pub fn ready_receiver(&self) -> Receiver<ReadyFrame> {
        self.ready_rx.clone()
    }

    // =========================================================================
    // Session generation
    // =========================================================================

    /// Returns the current session generation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Starts a new generation, invalidating callbacks registered earlier.
    pub fn advance_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    // =========================================================================
    // Buffer lifecycle (driven by negotiation and teardown)
    // =========================================================================

    /// Replaces the current buffers with fresh ones for `format`.
    ///
    /// The previous buffers are released (waiting for an in-flight write or
    /// read to finish) before the new ones become visible to writers.
    pub(crate) fn install(&self, format: VideoFormat) {
        let mut output = self.output.lock();
        if let Some(old) = output.take() {
            Self::wait_and_drop(old);
        }
        *output = Some(Output {
            format,
            slots: Arc::new(FrameSlots::new(self.mode, format)),
        });
        self.attached.store(true, Ordering::Release);
        drop(output);

        self.format_epoch.fetch_add(1, Ordering::AcqRel);
        self.gate.reset();
        tracing::debug!(
            "Allocated {} {:?} buffer(s) for {}",
            self.mode.buffer_count(),
            self.mode,
            format
        );
    }

    /// Releases all frame buffers, entering the "no output" state.
    ///
    /// Returns true if buffers were released.
    pub fn release_buffers(&self) -> bool {
        let mut output = self.output.lock();
        let Some(old) = output.take() else {
            return false;
        };
        let format = old.format;
        Self::wait_and_drop(old);
        drop(output);

        self.attached.store(false, Ordering::Release);
        self.format_epoch.fetch_add(1, Ordering::AcqRel);
        tracing::debug!("Released frame buffers for {}", format);
        true
    }

    /// Drops `old` once no writer or reader holds any of its buffers.
    fn wait_and_drop(old: Output) {
        for handle in old.slots.handles() {
            drop(handle.lock());
        }
        drop(old);
    }

    /// Stops accepting writes until the next negotiation; buffers are kept so
    /// the last frame can still be displayed.
    ///
    /// Ignored unless `generation` is still current. The check runs under the
    /// output lock so a late cleanup cannot detach a newer session's output.
    pub(crate) fn detach(&self, generation: u64) -> bool {
        let _output = self.output.lock();
        if self.generation() != generation {
            return false;
        }
        if self.attached.swap(false, Ordering::AcqRel) {
            tracing::debug!("Video output detached by decoder");
        }
        true
    }

    // =========================================================================
    // Producer side
    // =========================================================================

    /// Claims the current write buffer.
    ///
    /// Never allocates. Returns `None` only when no valid format is
    /// negotiated (or the decoder released its output).
    pub fn lock(&self) -> Option<FrameWriteGuard> {
        self.lock_if(|| true)
    }

    /// [`Self::lock`] on behalf of session `generation`.
    ///
    /// Returns `None` once another session has started, even if this call
    /// raced the switch: buffers installed for a newer session are never
    /// handed to an older one.
    pub(crate) fn lock_for(&self, generation: u64) -> Option<FrameWriteGuard> {
        self.lock_if(|| {
            let current = self.generation() == generation;
            if !current {
                self.metrics.record_stale_callback();
            }
            current
        })
    }

    fn lock_if(&self, admit: impl FnOnce() -> bool) -> Option<FrameWriteGuard> {
        if !self.attached.load(Ordering::Acquire) {
            self.metrics.record_lock_without_output();
            return None;
        }
        // Acquired under the output lock so a concurrent release waits for
        // this write instead of racing it.
        let output = self.output.lock();
        if !admit() {
            return None;
        }
        let Some(current) = output.as_ref() else {
            self.metrics.record_lock_without_output();
            return None;
        };
        let slots = Arc::clone(&current.slots);
        let buffer = slots.lock_write();
        drop(output);

        self.metrics.record_lock();
        Some(FrameWriteGuard { slots, buffer })
    }

    /// Rate-gated publish: forwards a ready notice only if a full publish
    /// interval has elapsed since the last accepted one.
    ///
    /// Returns true if a notice was forwarded (or merged into a pending one).
    pub fn publish(&self) -> bool {
        self.publish_at(Instant::now())
    }

    /// [`Self::publish`] with an explicit timestamp.
    pub fn publish_at(&self, now: Instant) -> bool {
        if self.output.lock().is_none() {
            return false;
        }
        if !self.gate.try_pass_at(now) {
            self.metrics.record_publish_dropped();
            tracing::trace!("Publish dropped by rate gate");
            return false;
        }
        self.notify(now)
    }

    /// Forwards a ready notice regardless of the rate gate.
    pub fn force_publish(&self) -> bool {
        if self.output.lock().is_none() {
            return false;
        }
        self.notify(Instant::now())
    }

    fn notify(&self, now: Instant) -> bool {
        let seq = self.ready_seq.fetch_add(1, Ordering::AcqRel) + 1;
        self.metrics.record_publish_accepted();
        match self.ready_tx.try_send(ReadyFrame {
            seq,
            published_at: now,
        }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.metrics.record_notice_coalesced();
                return true;
            }
            Err(TrySendError::Disconnected(_)) => return false,
        }
        // Run outside the lock so the waker may call back into `set_waker`.
        let waker = self.waker.lock().clone();
        if let Some(waker) = waker {
            waker();
        }
        true
    }

    // =========================================================================
    // Consumer side
    // =========================================================================

    /// Takes the newest committed frame if one arrived since the last read.
    pub(crate) fn read_latest(&self) -> Option<FrameReadGuard> {
        let output = self.output.lock();
        let slots = Arc::clone(&output.as_ref()?.slots);
        let buffer = slots.read();
        drop(output);
        buffer.map(|buffer| FrameReadGuard { buffer })
    }

    /// Returns a weak handle to the first buffer of the current output.
    #[cfg(test)]
    fn first_buffer(&self) -> Option<std::sync::Weak<Mutex<FrameBuffer>>> {
        let output = self.output.lock();
        let handles = output.as_ref()?.slots.handles();
        handles.first().map(Arc::downgrade)
    }
}
