//! Playback controller (UI-thread facade).
//!
//! [`PlaybackController`] owns the decoder engine, the frame hand-off and the
//! display sink, and drives the session lifecycle:
//!
//! ```text
//! start()                       Idle/Ended/Stopped/Paused/Playing → Starting → Playing
//! toggle_play_pause(false)      Playing → Paused
//! toggle_play_pause(true)       Paused  → Playing
//! engine Ended                  Playing/Paused → Ended    (last frame stays visible)
//! engine Error                  Playing/Paused → Stopped
//! shutdown()                    any → Idle                (everything released)
//! ```
//!
//! All methods run on the UI thread. Engine events are queued by the decoder
//! threads and applied in [`PlaybackController::update`], which also pumps the
//! display sink; call it once per rendered frame.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::config::{EngineOptions, PlayerConfig};
use crate::display::{DisplaySink, DisplayUpdate, TextureBackend};
use crate::engine::{
    DecoderEngine, EngineEvent, EngineFactory, EventSink, SessionEvent, VideoOutput,
};
use crate::handoff::FrameHandoff;
use crate::metrics::HandoffMetricsSnapshot;
use crate::source::SourceLocator;
use crate::teardown::TeardownReport;
use crate::video::{PlaybackRate, PlaybackState, VideoError, VideoFormat};

/// Capacity of the controller's outgoing event queue.
const EVENT_QUEUE_CAPACITY: usize = 256;

/// Converts a seek percentage into an absolute position.
///
/// Resolution is one millisecond. The percentage is not clamped; negative or
/// NaN results saturate to zero.
pub fn seek_target(duration: Duration, percent: f64) -> Duration {
    let target_ms = duration.as_millis() as f64 * percent / 100.0;
    Duration::from_millis(target_ms as u64)
}

/// Metadata parsing progress of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParseState {
    #[default]
    Pending,
    Parsed,
    Failed,
}

/// The media currently bound to the engine.
#[derive(Debug, Clone)]
pub struct MediaSession {
    source: SourceLocator,
    generation: u64,
    parse: ParseState,
    duration: Option<Duration>,
}

impl MediaSession {
    fn new(source: SourceLocator, generation: u64) -> Self {
        Self {
            source,
            generation,
            parse: ParseState::Pending,
            duration: None,
        }
    }

    pub fn source(&self) -> &SourceLocator {
        &self.source
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn parse_state(&self) -> ParseState {
        self.parse
    }

    /// Duration reported by parsing, if known.
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }
}

/// Notifications for the UI.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    /// The playback state changed
    StateChanged(PlaybackState),
    /// A new texture was created for this format
    TextureChanged(VideoFormat),
    /// An engine event of the current session
    Engine(EngineEvent),
    /// A failure the UI should surface
    Error(VideoError),
}

/// UI-facing playback controller.
///
/// Generic over the decoder engine `E` and the texture backend `B`.
pub struct PlaybackController<E: DecoderEngine, B: TextureBackend> {
    config: PlayerConfig,
    factory: EngineFactory<E>,
    /// Created lazily on the first start, released at shutdown
    engine: Option<E>,
    handoff: Arc<FrameHandoff>,
    sink: DisplaySink<B>,
    session: Option<MediaSession>,
    state: PlaybackState,
    rate: PlaybackRate,
    engine_tx: Sender<SessionEvent>,
    engine_rx: Receiver<SessionEvent>,
    events_tx: Sender<ControllerEvent>,
    events_rx: Receiver<ControllerEvent>,
}

impl<E: DecoderEngine, B: TextureBackend> PlaybackController<E, B> {
    /// Creates an idle controller. No engine exists until the first [`start`](Self::start).
    pub fn new<F>(config: PlayerConfig, factory: F, backend: B) -> Self
    where
        F: FnMut(&EngineOptions) -> Result<E, VideoError> + Send + 'static,
    {
        let handoff = Arc::new(FrameHandoff::new(&config.handoff));
        let sink = DisplaySink::new(Arc::clone(&handoff), backend);
        let (engine_tx, engine_rx) = crossbeam_channel::unbounded();
        let (events_tx, events_rx) = crossbeam_channel::bounded(EVENT_QUEUE_CAPACITY);
        Self {
            rate: config.initial_rate,
            config,
            factory: Box::new(factory),
            engine: None,
            handoff,
            sink,
            session: None,
            state: PlaybackState::Idle,
            engine_tx,
            engine_rx,
            events_tx,
            events_rx,
        }
    }

    // =========================================================================
    // Session lifecycle
    // =========================================================================

    /// Starts playing `locator` (URL or local path).
    ///
    /// Validation happens first; an invalid locator is rejected without
    /// touching the current session. Any running session is torn down
    /// before the new one is opened. On failure the partial session is torn
    /// down and the controller returns to `Idle`.
    pub fn start(&mut self, locator: &str) -> Result<(), VideoError> {
        let source = match SourceLocator::parse(locator) {
            Ok(source) => source,
            Err(e) => {
                tracing::warn!("Rejected source '{}': {}", locator, e);
                return Err(e);
            }
        };

        self.end_session("replaced by new source");

        if let Err(e) = self.begin_session(source) {
            tracing::error!("Failed to start playback: {}", e);
            self.end_session("start failed");
            self.set_state(PlaybackState::Idle);
            self.emit(ControllerEvent::Error(e.clone()));
            return Err(e);
        }
        Ok(())
    }

    fn begin_session(&mut self, source: SourceLocator) -> Result<(), VideoError> {
        let session_start = |e: VideoError| VideoError::SessionStart(e.to_string());

        self.set_state(PlaybackState::Starting);

        if self.engine.is_none() {
            let engine = (self.factory)(&self.config.engine).map_err(session_start)?;
            tracing::info!("Decoder engine created");
            self.engine = Some(engine);
        }

        let generation = self.handoff.advance_generation();
        self.session = Some(MediaSession::new(source.clone(), generation));
        tracing::info!("Starting session {} for {}", generation, source);

        let media_args = self.config.media.to_args();
        let rate = self.rate.value();
        {
            let engine = self.engine.as_mut().ok_or(VideoError::NoSession)?;
            engine.attach(
                VideoOutput::new(Arc::clone(&self.handoff), generation),
                EventSink::new(self.engine_tx.clone(), generation),
            );
            engine.open_media(&source, &media_args).map_err(session_start)?;
            engine.set_rate(rate).map_err(session_start)?;
            engine.play().map_err(session_start)?;
        }

        self.set_state(PlaybackState::Playing);
        Ok(())
    }

    /// Unbinds the current session from the engine. Frame buffers and the
    /// texture are kept.
    fn end_session(&mut self, reason: &str) {
        let Some(session) = self.session.take() else {
            return;
        };
        tracing::debug!("Ending session {} ({})", session.generation, reason);

        // Invalidate callbacks first so nothing from this session lands after.
        self.handoff.advance_generation();

        if let Some(engine) = self.engine.as_mut() {
            if let Err(e) = engine.stop() {
                tracing::warn!("Engine stop failed: {}", e);
            }
            engine.detach();
            if let Err(e) = engine.release_media() {
                tracing::warn!("Engine media release failed: {}", e);
            }
        }
    }

    // =========================================================================
    // Transport controls
    // =========================================================================

    /// Pauses (`resume == false`) or resumes (`resume == true`) playback.
    ///
    /// Idempotent: asking for the state already in effect does nothing.
    /// Returns true if the state changed.
    pub fn toggle_play_pause(&mut self, resume: bool) -> Result<bool, VideoError> {
        match (self.state, resume) {
            (PlaybackState::Playing, false) => {
                self.engine_mut()?.set_paused(true)?;
                // Show the newest frame even if its publish was rate-gated.
                self.handoff.force_publish();
                self.set_state(PlaybackState::Paused);
                Ok(true)
            }
            (PlaybackState::Paused, true) => {
                let rate = self.rate.value();
                let engine = self.engine_mut()?;
                engine.set_paused(false)?;
                engine.set_rate(rate)?;
                self.set_state(PlaybackState::Playing);
                Ok(true)
            }
            (state, resume) => {
                tracing::debug!("Ignoring toggle (resume={}) in state {:?}", resume, state);
                Ok(false)
            }
        }
    }

    /// Sets the playback speed; applied to the engine if a session is active.
    pub fn set_playback_rate(&mut self, rate: PlaybackRate) -> Result<(), VideoError> {
        self.rate = rate;
        if self.session.is_some() {
            if let Some(engine) = self.engine.as_mut() {
                engine.set_rate(rate.value())?;
            }
        }
        tracing::debug!("Playback rate set to {}", rate.value());
        Ok(())
    }

    /// Selects one of [`PlaybackRate::PRESETS`] by index.
    pub fn select_rate_preset(&mut self, index: usize) -> Result<PlaybackRate, VideoError> {
        let rate = PlaybackRate::from_preset_index(index).ok_or_else(|| {
            VideoError::InvalidArgument(format!("no playback rate preset at index {index}"))
        })?;
        self.set_playback_rate(rate)?;
        Ok(rate)
    }

    /// Seeks to `percent` of the media duration.
    ///
    /// Returns the target position, or `None` if the duration is unknown
    /// (live streams, or parsing not finished).
    pub fn seek(&mut self, percent: f64) -> Result<Option<Duration>, VideoError> {
        let session = self.session.as_ref().ok_or(VideoError::NoSession)?;
        let duration = session
            .duration
            .or_else(|| self.engine.as_ref().and_then(|e| e.duration()));
        let Some(duration) = duration else {
            tracing::debug!("Seek to {}% ignored: duration unknown", percent);
            return Ok(None);
        };

        let target = seek_target(duration, percent);
        self.engine_mut()?.seek(target)?;
        tracing::debug!("Seek to {}% -> {:?}", percent, target);
        Ok(Some(target))
    }

    // =========================================================================
    // Per-frame update
    // =========================================================================

    /// Applies queued engine events and presents the newest frame.
    pub fn update(&mut self) -> DisplayUpdate {
        while let Ok(event) = self.engine_rx.try_recv() {
            self.handle_engine_event(event);
        }

        let update = self.sink.pump();
        if update == DisplayUpdate::TextureRecreated {
            if let Some(format) = self.sink.texture_format() {
                self.emit(ControllerEvent::TextureChanged(format));
            }
        }
        update
    }

    fn handle_engine_event(&mut self, event: SessionEvent) {
        let SessionEvent { generation, event } = event;
        let Some(session) = self.session.as_mut().filter(|s| s.generation == generation) else {
            self.handoff.metrics().record_stale_callback();
            tracing::trace!("Dropping {:?} from stale session {}", event, generation);
            return;
        };

        match &event {
            EngineEvent::Parsed { duration } => {
                session.parse = ParseState::Parsed;
                session.duration = *duration;
                tracing::info!("Media parsed, duration {:?}", duration);
            }
            EngineEvent::ParseFailed(reason) => {
                session.parse = ParseState::Failed;
                tracing::warn!("Media parsing failed: {}", reason);
            }
            EngineEvent::Ended => {
                tracing::info!("End of stream");
                self.handoff.force_publish();
                self.end_session("end of stream");
                self.set_state(PlaybackState::Ended);
            }
            EngineEvent::Error(message) => {
                tracing::error!("Decoder error: {}", message);
                self.end_session("decoder error");
                self.set_state(PlaybackState::Stopped);
                self.emit(ControllerEvent::Error(VideoError::Engine(message.clone())));
            }
            _ => {}
        }

        self.emit(ControllerEvent::Engine(event));
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Releases everything in a fixed order. Safe to call repeatedly.
    ///
    /// Each step runs even if an earlier one fails or panics; failures are
    /// logged and listed in the returned report.
    pub fn shutdown(&mut self) -> TeardownReport {
        let mut report = TeardownReport::default();
        let had_session = self.session.is_some();

        report.run("stop playback", || match (self.engine.as_mut(), had_session) {
            (Some(engine), true) => engine.stop(),
            _ => Ok(()),
        });
        report.run("release media", || {
            match (self.engine.as_mut(), self.session.take()) {
                (Some(engine), Some(_)) => engine.release_media(),
                _ => Ok(()),
            }
        });
        report.run("unregister callbacks", || {
            self.handoff.advance_generation();
            if let Some(engine) = self.engine.as_mut() {
                engine.detach();
            }
            Ok(())
        });
        report.run("release frame buffers", || {
            self.handoff.release_buffers();
            Ok(())
        });
        report.run("release texture", || {
            self.sink.discard_pending();
            self.sink.release_texture();
            Ok(())
        });
        report.run("release staging image", || {
            self.sink.release_staging();
            Ok(())
        });
        report.run("release engine", || match self.engine.take() {
            Some(mut engine) => engine.release(),
            None => Ok(()),
        });

        self.set_state(PlaybackState::Idle);

        if report.is_clean() {
            tracing::debug!("Shutdown complete");
        } else {
            tracing::warn!("Shutdown finished with failures: {:?}", report.failed_steps());
        }
        report
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn rate(&self) -> PlaybackRate {
        self.rate
    }

    pub fn session(&self) -> Option<&MediaSession> {
        self.session.as_ref()
    }

    /// Returns the texture showing the current frame.
    pub fn texture(&self) -> Option<&B::Texture> {
        self.sink.texture()
    }

    pub fn sink(&self) -> &DisplaySink<B> {
        &self.sink
    }

    pub fn handoff(&self) -> &Arc<FrameHandoff> {
        &self.handoff
    }

    pub fn engine(&self) -> Option<&E> {
        self.engine.as_ref()
    }

    /// Returns a receiver for UI notifications.
    pub fn events(&self) -> Receiver<ControllerEvent> {
        self.events_rx.clone()
    }

    pub fn metrics(&self) -> HandoffMetricsSnapshot {
        self.handoff.metrics().snapshot()
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn engine_mut(&mut self) -> Result<&mut E, VideoError> {
        self.engine.as_mut().ok_or(VideoError::NoSession)
    }

    fn set_state(&mut self, state: PlaybackState) {
        if self.state == state {
            return;
        }
        tracing::debug!("Playback state {:?} -> {:?}", self.state, state);
        self.state = state;
        self.emit(ControllerEvent::StateChanged(state));
    }

    fn emit(&self, event: ControllerEvent) {
        if let Err(TrySendError::Full(event)) = self.events_tx.try_send(event) {
            tracing::debug!("Event queue full, dropping {:?}", event);
        }
    }
}

impl<E: DecoderEngine, B: TextureBackend> Drop for PlaybackController<E, B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seek_target() {
        let duration = Duration::from_millis(200_000);
        assert_eq!(seek_target(duration, 50.0), Duration::from_millis(100_000));
        assert_eq!(seek_target(duration, 0.0), Duration::ZERO);
        assert_eq!(seek_target(duration, 100.0), duration);
    }

    #[test]
    fn test_seek_target_is_not_clamped() {
        let duration = Duration::from_millis(10_000);
        assert_eq!(seek_target(duration, 150.0), Duration::from_millis(15_000));
        assert_eq!(seek_target(duration, -20.0), Duration::ZERO);
        assert_eq!(seek_target(duration, f64::NAN), Duration::ZERO);
    }
}
