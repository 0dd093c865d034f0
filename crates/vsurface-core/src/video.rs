//! Core video surface types: pixel layout, negotiated format, playback state
//! and the crate-wide error type.

/// Largest width or height accepted during format negotiation.
pub const MAX_DIMENSION: u32 = 16384;

/// Pixel layout of the frame buffers handed to the decoder.
///
/// Fixed to a single packed layout so the display path never converts or
/// reallocates after negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelLayout {
    /// RGBA 32-bit, one plane
    Rgba,
}

impl PixelLayout {
    /// Returns the number of bytes per pixel.
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelLayout::Rgba => 4,
        }
    }
}

/// A negotiated video format.
///
/// Immutable once chosen. A different format means new buffers and a new
/// texture, never an in-place resize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VideoFormat {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Pixel layout
    pub layout: PixelLayout,
}

impl VideoFormat {
    /// Validates the requested dimensions and builds an RGBA format.
    pub fn rgba(width: u32, height: u32) -> Result<Self, VideoError> {
        if width == 0 || height == 0 {
            return Err(VideoError::Negotiation(format!(
                "zero-sized format requested ({width}x{height})"
            )));
        }
        if width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(VideoError::Negotiation(format!(
                "format {width}x{height} exceeds the {MAX_DIMENSION}px limit"
            )));
        }
        // MAX_DIMENSION keeps width * height * 4 within 1 GiB, which fits
        // usize on 32-bit targets.
        Ok(Self {
            width,
            height,
            layout: PixelLayout::Rgba,
        })
    }

    /// Bytes per row.
    pub fn pitch(&self) -> usize {
        self.width as usize * self.layout.bytes_per_pixel()
    }

    /// Number of rows.
    pub fn lines(&self) -> usize {
        self.height as usize
    }

    /// Total bytes of one frame (`width * height * 4`).
    pub fn frame_size(&self) -> usize {
        self.pitch() * self.lines()
    }
}

impl std::fmt::Display for VideoFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{} {:?}", self.width, self.height, self.layout)
    }
}

/// Playback state of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    /// No session, nothing playing
    #[default]
    Idle,
    /// A session is being opened
    Starting,
    /// Actively playing
    Playing,
    /// Paused by the user
    Paused,
    /// The decoder reached end of stream; last frame stays visible
    Ended,
    /// Playback stopped after a decoder error
    Stopped,
}

impl PlaybackState {
    /// Returns true if a media session is bound in this state.
    pub fn has_session(&self) -> bool {
        matches!(
            self,
            PlaybackState::Starting | PlaybackState::Playing | PlaybackState::Paused
        )
    }

    /// Returns true if video is currently playing.
    pub fn is_playing(&self) -> bool {
        matches!(self, PlaybackState::Playing)
    }
}

/// Playback speed multiplier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackRate(f32);

impl PlaybackRate {
    /// Speeds offered by the UI dropdown, in display order.
    pub const PRESETS: [f32; 6] = [0.5, 0.75, 1.0, 1.25, 1.5, 2.0];

    /// Normal speed.
    pub const NORMAL: PlaybackRate = PlaybackRate(1.0);

    /// Creates a rate from a positive, finite multiplier.
    pub fn new(rate: f32) -> Result<Self, VideoError> {
        if rate.is_finite() && rate > 0.0 {
            Ok(Self(rate))
        } else {
            Err(VideoError::InvalidArgument(format!(
                "playback rate must be positive and finite, got {rate}"
            )))
        }
    }

    /// Returns the preset at `index` in [`Self::PRESETS`].
    pub fn from_preset_index(index: usize) -> Option<Self> {
        Self::PRESETS.get(index).copied().map(Self)
    }

    /// Returns the multiplier.
    pub fn value(self) -> f32 {
        self.0
    }
}

impl Default for PlaybackRate {
    fn default() -> Self {
        Self::NORMAL
    }
}

/// Errors surfaced by the video surface.
#[derive(Debug, Clone, PartialEq)]
pub enum VideoError {
    /// The source locator is malformed, unsupported or points nowhere
    InvalidSource(String),
    /// The decoder announced a format that cannot be rendered
    Negotiation(String),
    /// Opening, parsing or playing a new session failed
    SessionStart(String),
    /// A command sent to the decoder engine failed
    Engine(String),
    /// Uploading a frame or creating a texture failed
    Texture(String),
    /// A caller-provided argument is out of range
    InvalidArgument(String),
    /// An operation needs a session but none is active
    NoSession,
}

impl std::fmt::Display for VideoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VideoError::InvalidSource(msg) => write!(f, "Invalid media source: {msg}"),
            VideoError::Negotiation(msg) => write!(f, "Format negotiation failed: {msg}"),
            VideoError::SessionStart(msg) => write!(f, "Failed to start playback: {msg}"),
            VideoError::Engine(msg) => write!(f, "Decoder engine error: {msg}"),
            VideoError::Texture(msg) => write!(f, "Texture error: {msg}"),
            VideoError::InvalidArgument(msg) => write!(f, "Invalid argument: {msg}"),
            VideoError::NoSession => write!(f, "No active media session"),
        }
    }
}

impl std::error::Error for VideoError {}
