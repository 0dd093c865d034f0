//! Frame hand-off counters.
//!
//! Lock-free counters updated from both the decoder thread and the render
//! thread. Take a [`HandoffMetricsSnapshot`] to read a consistent-enough view
//! for logging and tests.
//!
//! ```ignore
//! let snap = handoff.metrics().snapshot();
//! tracing::info!("published {} / dropped {}", snap.publishes_accepted, snap.publishes_dropped);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Shared hand-off counters.
#[derive(Clone, Default)]
pub struct HandoffMetrics {
    inner: Arc<HandoffMetricsInner>,
}

#[derive(Default)]
struct HandoffMetricsInner {
    /// Write buffers handed to the decoder
    frames_locked: AtomicU64,
    /// Lock calls that found no negotiated output
    locks_without_output: AtomicU64,
    /// Publishes that passed the rate gate
    publishes_accepted: AtomicU64,
    /// Publishes dropped by the rate gate
    publishes_dropped: AtomicU64,
    /// Accepted publishes merged into an already pending notice
    notices_coalesced: AtomicU64,
    /// Callbacks ignored because their session generation is stale
    stale_callbacks: AtomicU64,
    /// Successful negotiations
    negotiations: AtomicU64,
    /// Rejected negotiations
    negotiations_rejected: AtomicU64,
    /// Frames uploaded to a texture
    frames_displayed: AtomicU64,
    /// Textures (re)created
    textures_created: AtomicU64,
}

macro_rules! counter {
    ($record:ident, $field:ident) => {
        pub(crate) fn $record(&self) {
            self.inner.$field.fetch_add(1, Ordering::Relaxed);
        }
    };
}

impl HandoffMetrics {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    counter!(record_lock, frames_locked);
    counter!(record_lock_without_output, locks_without_output);
    counter!(record_publish_accepted, publishes_accepted);
    counter!(record_publish_dropped, publishes_dropped);
    counter!(record_notice_coalesced, notices_coalesced);
    counter!(record_stale_callback, stale_callbacks);
    counter!(record_negotiation, negotiations);
    counter!(record_negotiation_rejected, negotiations_rejected);
    counter!(record_frame_displayed, frames_displayed);
    counter!(record_texture_created, textures_created);

    /// Returns a point-in-time copy of all counters.
    pub fn snapshot(&self) -> HandoffMetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        let i = &self.inner;
        HandoffMetricsSnapshot {
            frames_locked: load(&i.frames_locked),
            locks_without_output: load(&i.locks_without_output),
            publishes_accepted: load(&i.publishes_accepted),
            publishes_dropped: load(&i.publishes_dropped),
            notices_coalesced: load(&i.notices_coalesced),
            stale_callbacks: load(&i.stale_callbacks),
            negotiations: load(&i.negotiations),
            negotiations_rejected: load(&i.negotiations_rejected),
            frames_displayed: load(&i.frames_displayed),
            textures_created: load(&i.textures_created),
        }
    }
}

/// Point-in-time copy of [`HandoffMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandoffMetricsSnapshot {
    pub frames_locked: u64,
    pub locks_without_output: u64,
    pub publishes_accepted: u64,
    pub publishes_dropped: u64,
    pub notices_coalesced: u64,
    pub stale_callbacks: u64,
    pub negotiations: u64,
    pub negotiations_rejected: u64,
    pub frames_displayed: u64,
    pub textures_created: u64,
}

impl HandoffMetricsSnapshot {
    /// Fraction of publishes dropped by the rate gate (0.0 when none were made).
    pub fn drop_ratio(&self) -> f64 {
        let total = self.publishes_accepted + self.publishes_dropped;
        if total == 0 {
            return 0.0;
        }
        self.publishes_dropped as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_shared_between_clones() {
        let metrics = HandoffMetrics::new();
        let decoder_side = metrics.clone();

        decoder_side.record_lock();
        decoder_side.record_publish_accepted();
        decoder_side.record_publish_dropped();
        decoder_side.record_publish_dropped();
        metrics.record_frame_displayed();

        let snap = metrics.snapshot();
        assert_eq!(snap.frames_locked, 1);
        assert_eq!(snap.publishes_accepted, 1);
        assert_eq!(snap.publishes_dropped, 2);
        assert_eq!(snap.frames_displayed, 1);
        assert!((snap.drop_ratio() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_drop_ratio() {
        assert_eq!(HandoffMetricsSnapshot::default().drop_ratio(), 0.0);
    }
}
