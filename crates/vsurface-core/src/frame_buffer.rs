//! Fixed-size pixel buffer the decoder writes into.

use crate::video::VideoFormat;

/// A contiguous, pre-allocated frame of `width * height * 4` bytes.
///
/// The allocation is made once per negotiated format and is never resized;
/// a new format gets a new `FrameBuffer`.
pub struct FrameBuffer {
    format: VideoFormat,
    data: Box<[u8]>,
}

impl FrameBuffer {
    /// Allocates a zeroed buffer for `format`.
    pub fn new(format: VideoFormat) -> Self {
        Self {
            format,
            data: vec![0u8; format.frame_size()].into_boxed_slice(),
        }
    }

    /// Returns the format this buffer was sized for.
    pub fn format(&self) -> VideoFormat {
        self.format
    }

    /// Returns the buffer length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true for an empty buffer (never the case for a valid format).
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the pixel bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Returns the pixel bytes for writing.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Returns the stable start address of the pixel data.
    ///
    /// Decoders that write through raw pointers get the same address for
    /// every frame of a format.
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.data.as_mut_ptr()
    }
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("format", &self.format)
            .field("len", &self.data.len())
            .finish()
    }
}
