//! Decoder format negotiation.
//!
//! When the decoder announces the size of the stream it is about to produce,
//! [`FormatNegotiator::negotiate`] fixes the pixel layout to RGBA, computes
//! pitch and line count, and (re)allocates the hand-off buffers.

use std::sync::Arc;

use crate::handoff::FrameHandoff;
use crate::video::{PixelLayout, VideoError, VideoFormat};

/// Result code reported to the decoder when a format is rejected.
pub const NEGOTIATION_REJECTED: u32 = 0;

/// Output parameters agreed with the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiated {
    /// Pixel layout the decoder must produce
    pub layout: PixelLayout,
    /// The full negotiated format
    pub format: VideoFormat,
    /// Bytes per row
    pub pitch: u32,
    /// Number of rows
    pub lines: u32,
    /// Number of buffers allocated
    pub buffer_count: u32,
}

/// Converts a negotiation outcome into the decoder's numeric result code:
/// the number of allocated buffers, or [`NEGOTIATION_REJECTED`].
pub fn negotiation_result_code(result: &Result<Negotiated, VideoError>) -> u32 {
    match result {
        Ok(negotiated) => negotiated.buffer_count,
        Err(_) => NEGOTIATION_REJECTED,
    }
}

/// Agrees on an output format with the decoder and sizes the frame buffers.
#[derive(Clone)]
pub struct FormatNegotiator {
    handoff: Arc<FrameHandoff>,
}

impl FormatNegotiator {
    pub fn new(handoff: Arc<FrameHandoff>) -> Self {
        Self { handoff }
    }

    /// Negotiates an RGBA output of `width` x `height`.
    ///
    /// On success any previous buffers are released before new ones of
    /// exactly `pitch * lines` bytes are allocated, and the render thread is
    /// notified so it can recreate its texture. A zero or oversized
    /// dimension is rejected and leaves the hand-off with no output, so later
    /// `lock()` calls return `None`.
    pub fn negotiate(&self, width: u32, height: u32) -> Result<Negotiated, VideoError> {
        let format = match VideoFormat::rgba(width, height) {
            Ok(format) => format,
            Err(e) => {
                self.handoff.release_buffers();
                self.handoff.metrics().record_negotiation_rejected();
                tracing::warn!("Rejected video format {}x{}: {}", width, height, e);
                return Err(e);
            }
        };

        self.handoff.install(format);
        self.handoff.metrics().record_negotiation();
        // Let the render thread rebuild its texture before the first frame.
        self.handoff.force_publish();

        let buffer_count = self.handoff.mode().buffer_count();
        tracing::info!(
            "Negotiated {} ({} buffer(s), pitch {})",
            format,
            buffer_count,
            format.pitch()
        );

        Ok(Negotiated {
            layout: format.layout,
            format,
            pitch: format.pitch() as u32,
            lines: format.lines() as u32,
            buffer_count,
        })
    }
}
