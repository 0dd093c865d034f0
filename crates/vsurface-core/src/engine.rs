//! Decoder engine boundary.
//!
//! The decoder engine (a media framework wrapper) runs its own threads. It
//! receives a [`VideoOutput`] for its video callbacks and an [`EventSink`] for
//! state events when attached to a session. Both are stamped with the session
//! generation: once the controller moves on to another session, or tears down,
//! calls through old handles are ignored.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Sender;

use crate::config::EngineOptions;
use crate::handoff::{FrameHandoff, FrameWriteGuard};
use crate::negotiator::{FormatNegotiator, Negotiated};
use crate::source::SourceLocator;
use crate::video::VideoError;

/// Events reported by the decoder engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// The media is being opened
    Opening,
    /// Network buffering progress (0-100)
    Buffering(f32),
    /// Playback started or resumed
    Playing,
    /// Playback paused
    Paused,
    /// Playback stopped
    Stopped,
    /// Media parsing finished
    Parsed {
        /// Total duration, if the media has one
        duration: Option<Duration>,
    },
    /// Media parsing failed
    ParseFailed(String),
    /// End of stream reached
    Ended,
    /// Unrecoverable decoder error
    Error(String),
}

/// An [`EngineEvent`] tagged with the session that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    pub generation: u64,
    pub event: EngineEvent,
}

/// Channel the engine reports session events through.
#[derive(Clone)]
pub struct EventSink {
    tx: Sender<SessionEvent>,
    generation: u64,
}

impl EventSink {
    pub(crate) fn new(tx: Sender<SessionEvent>, generation: u64) -> Self {
        Self { tx, generation }
    }

    /// Returns the session generation this sink belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Sends an event to the controller. Never blocks.
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.tx.send(SessionEvent {
            generation: self.generation,
            event,
        });
    }
}

/// Video callbacks handed to the decoder engine.
///
/// Maps the engine's format/lock/unlock/display/cleanup callbacks onto the
/// frame hand-off. Safe to call from any decoder thread.
#[derive(Clone)]
pub struct VideoOutput {
    handoff: Arc<FrameHandoff>,
    negotiator: FormatNegotiator,
    generation: u64,
}

impl VideoOutput {
    pub(crate) fn new(handoff: Arc<FrameHandoff>, generation: u64) -> Self {
        Self {
            negotiator: FormatNegotiator::new(Arc::clone(&handoff)),
            handoff,
            generation,
        }
    }

    /// Returns the session generation this output belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns true while the owning session is current.
    pub fn is_current(&self) -> bool {
        self.handoff.generation() == self.generation
    }

    fn check(&self, callback: &str) -> bool {
        if self.is_current() {
            return true;
        }
        self.handoff.metrics().record_stale_callback();
        tracing::trace!(
            "Ignoring stale {} callback (generation {}, current {})",
            callback,
            self.generation,
            self.handoff.generation()
        );
        false
    }

    /// Format callback: negotiates the output for a `width` x `height` stream.
    pub fn format(&self, width: u32, height: u32) -> Result<Negotiated, VideoError> {
        if !self.check("format") {
            return Err(VideoError::Negotiation("session is no longer active".into()));
        }
        self.negotiator.negotiate(width, height)
    }

    /// Lock callback: claims the write buffer for the next frame.
    pub fn lock(&self) -> Option<FrameWriteGuard> {
        if !self.check("lock") {
            return None;
        }
        self.handoff.lock_for(self.generation)
    }

    /// Display callback: publishes the last committed frame, rate-gated.
    pub fn display(&self) -> bool {
        if !self.check("display") {
            return false;
        }
        self.handoff.publish()
    }

    /// Cleanup callback: the engine is done with the output.
    ///
    /// Buffers are kept so the last frame stays displayable; they are freed
    /// on the next negotiation or at shutdown.
    pub fn cleanup(&self) {
        if self.check("cleanup") && !self.handoff.detach(self.generation) {
            self.handoff.metrics().record_stale_callback();
        }
    }
}

/// A media decoding engine.
///
/// Commands are asynchronous: the engine reports their effect through the
/// [`EventSink`] it was attached with.
pub trait DecoderEngine: Send {
    /// Registers the video callbacks and event channel for a new session.
    fn attach(&mut self, output: VideoOutput, events: EventSink);

    /// Unregisters the callbacks; the engine must stop calling them.
    fn detach(&mut self);

    /// Opens `source` as the current media with per-media `options`.
    fn open_media(&mut self, source: &SourceLocator, options: &[String])
        -> Result<(), VideoError>;

    /// Starts playback of the current media.
    fn play(&mut self) -> Result<(), VideoError>;

    /// Pauses (`true`) or resumes (`false`) playback.
    fn set_paused(&mut self, paused: bool) -> Result<(), VideoError>;

    /// Stops playback of the current media.
    fn stop(&mut self) -> Result<(), VideoError>;

    /// Seeks to an absolute position.
    fn seek(&mut self, position: Duration) -> Result<(), VideoError>;

    /// Sets the playback speed multiplier.
    fn set_rate(&mut self, _rate: f32) -> Result<(), VideoError> {
        Ok(()) // Default no-op for engines without rate control
    }

    /// Returns the media duration if the engine knows it.
    fn duration(&self) -> Option<Duration> {
        None
    }

    /// Releases the current media.
    fn release_media(&mut self) -> Result<(), VideoError> {
        Ok(())
    }

    /// Releases the engine itself. Called once, right before it is dropped.
    fn release(&mut self) -> Result<(), VideoError> {
        Ok(())
    }
}

/// Creates a decoder engine from construction options.
pub type EngineFactory<E> = Box<dyn FnMut(&EngineOptions) -> Result<E, VideoError> + Send>;
