//! Render-side frame presentation.
//!
//! [`DisplaySink`] lives on the render thread. Each [`DisplaySink::pump`]
//! collapses pending ready notices into one, reads the newest committed frame
//! from the hand-off and uploads it to a texture owned by a
//! [`TextureBackend`]. The texture is recreated whenever the negotiated
//! format differs from the one it was created for.

use std::sync::Arc;

use crossbeam_channel::Receiver;

use crate::config::BufferingMode;
use crate::handoff::{FrameHandoff, ReadyFrame};
use crate::video::{VideoError, VideoFormat};

/// GPU (or other) texture management used by [`DisplaySink`].
pub trait TextureBackend {
    /// Backend texture handle
    type Texture;

    /// Creates a texture able to hold frames of `format`.
    fn create_texture(&mut self, format: VideoFormat) -> Result<Self::Texture, VideoError>;

    /// Replaces the texture contents with `pixels` (`format.frame_size()` bytes).
    fn upload(&mut self, texture: &mut Self::Texture, pixels: &[u8]) -> Result<(), VideoError>;

    /// Destroys a texture created by this backend.
    fn destroy_texture(&mut self, texture: Self::Texture) {
        drop(texture);
    }
}

/// Texture kept in system memory. Used headless and in tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuTexture {
    format: VideoFormat,
    pixels: Vec<u8>,
    revision: u64,
}

impl CpuTexture {
    pub fn format(&self) -> VideoFormat {
        self.format
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Number of uploads since creation.
    pub fn revision(&self) -> u64 {
        self.revision
    }
}

/// [`TextureBackend`] producing [`CpuTexture`]s.
#[derive(Debug, Default)]
pub struct CpuTextureBackend {
    created: u64,
    destroyed: u64,
}

impl CpuTextureBackend {
    /// Number of textures currently alive.
    pub fn live_textures(&self) -> u64 {
        self.created - self.destroyed
    }
}

impl TextureBackend for CpuTextureBackend {
    type Texture = CpuTexture;

    fn create_texture(&mut self, format: VideoFormat) -> Result<CpuTexture, VideoError> {
        self.created += 1;
        Ok(CpuTexture {
            format,
            pixels: vec![0; format.frame_size()],
            revision: 0,
        })
    }

    fn upload(&mut self, texture: &mut CpuTexture, pixels: &[u8]) -> Result<(), VideoError> {
        if pixels.len() != texture.pixels.len() {
            return Err(VideoError::Texture(format!(
                "upload of {} bytes into {} texture",
                pixels.len(),
                texture.format
            )));
        }
        texture.pixels.copy_from_slice(pixels);
        texture.revision += 1;
        Ok(())
    }

    fn destroy_texture(&mut self, texture: CpuTexture) {
        self.destroyed += 1;
        drop(texture);
    }
}

/// Outcome of one [`DisplaySink::pump`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayUpdate {
    /// Nothing new to show
    Idle,
    /// A new frame was uploaded into the existing texture
    Uploaded,
    /// The texture was (re)created for a new format
    TextureRecreated,
}

/// Render-thread consumer of the frame hand-off.
pub struct DisplaySink<B: TextureBackend> {
    handoff: Arc<FrameHandoff>,
    ready_rx: Receiver<ReadyFrame>,
    backend: B,
    texture: Option<(VideoFormat, B::Texture)>,
    /// CPU copy used in single-buffer mode so the decoder is not held during upload
    staging: Vec<u8>,
}

impl<B: TextureBackend> DisplaySink<B> {
    pub fn new(handoff: Arc<FrameHandoff>, backend: B) -> Self {
        Self {
            ready_rx: handoff.ready_receiver(),
            handoff,
            backend,
            texture: None,
            staging: Vec::new(),
        }
    }

    /// Handles pending ready notices, if any.
    pub fn pump(&mut self) -> DisplayUpdate {
        let Some(ready) = self.ready_rx.try_iter().last() else {
            return DisplayUpdate::Idle;
        };
        self.on_ready(ready)
    }

    /// Presents the newest committed frame.
    ///
    /// A no-op once buffers have been released.
    pub fn on_ready(&mut self, ready: ReadyFrame) -> DisplayUpdate {
        let frame = self.handoff.read_latest();
        // The hand-off format is only consulted without a frame in hand; a
        // concurrent release holds the output lock while waiting for readers.
        let format = match frame
            .as_ref()
            .map(|f| f.format())
            .or_else(|| self.handoff.format())
        {
            Some(format) => format,
            None => {
                tracing::trace!("Ready notice after buffers were released");
                return DisplayUpdate::Idle;
            }
        };

        let recreated = match self.ensure_texture(format) {
            Ok(recreated) => recreated,
            Err(e) => {
                tracing::warn!("Failed to create texture for {}: {}", format, e);
                return DisplayUpdate::Idle;
            }
        };

        let Some(frame) = frame else {
            return if recreated {
                DisplayUpdate::TextureRecreated
            } else {
                DisplayUpdate::Idle
            };
        };

        let Self {
            backend,
            texture,
            staging,
            handoff,
            ..
        } = self;
        let Some((_, texture)) = texture.as_mut() else {
            return DisplayUpdate::Idle;
        };

        let result = match handoff.mode() {
            BufferingMode::Triple => backend.upload(texture, frame.as_slice()),
            BufferingMode::Single => {
                staging.clear();
                staging.extend_from_slice(frame.as_slice());
                drop(frame);
                backend.upload(texture, staging.as_slice())
            }
        };

        if let Err(e) = result {
            tracing::warn!("Frame upload failed: {}", e);
            return DisplayUpdate::Idle;
        }
        handoff.metrics().record_frame_displayed();
        tracing::trace!(
            "Displayed frame {} ({:?} after publish)",
            ready.seq,
            ready.published_at.elapsed()
        );

        if recreated {
            DisplayUpdate::TextureRecreated
        } else {
            DisplayUpdate::Uploaded
        }
    }

    /// Makes sure a texture exists for `format`. Returns true if one was created.
    fn ensure_texture(&mut self, format: VideoFormat) -> Result<bool, VideoError> {
        if matches!(self.texture, Some((current, _)) if current == format) {
            return Ok(false);
        }

        // Destroy before creating so two full-size textures never coexist.
        self.release_texture();
        let texture = self.backend.create_texture(format)?;
        self.texture = Some((format, texture));
        self.handoff.metrics().record_texture_created();
        tracing::debug!("Created texture for {}", format);
        Ok(true)
    }

    /// Destroys the texture. Returns true if one existed.
    pub fn release_texture(&mut self) -> bool {
        match self.texture.take() {
            Some((_, texture)) => {
                self.backend.destroy_texture(texture);
                true
            }
            None => false,
        }
    }

    /// Frees the single-buffer staging copy.
    pub fn release_staging(&mut self) {
        self.staging = Vec::new();
    }

    /// Drops ready notices that have not been handled yet.
    pub fn discard_pending(&mut self) {
        self.ready_rx.try_iter().for_each(drop);
    }

    /// Returns the current texture.
    pub fn texture(&self) -> Option<&B::Texture> {
        self.texture.as_ref().map(|(_, texture)| texture)
    }

    /// Returns the format the current texture was created for.
    pub fn texture_format(&self) -> Option<VideoFormat> {
        self.texture.as_ref().map(|(format, _)| *format)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}
