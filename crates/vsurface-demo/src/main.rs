//! vsurface Demo Application
//!
//! Drives a [`PlaybackController`] headless with a synthetic decoder that
//! renders a moving gradient at 60 fps. The render loop runs at display rate,
//! pauses and resumes once, seeks to the middle, and shuts down after the
//! stream ends.
//!
//! ```text
//! RUST_LOG=debug cargo run -p vsurface-demo -- [url-or-path]
//! ```

use std::error::Error;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use vsurface_core::{
    negotiation_result_code, ControllerEvent, CpuTextureBackend, DecoderEngine, DisplayUpdate,
    EngineEvent, EngineOptions, EventSink, PlaybackController, PlayerConfig, PlaybackState,
    SourceLocator, VideoError, VideoOutput,
};

/// Source used when none is given on the command line.
const DEFAULT_SOURCE: &str = "https://download.blender.org/peach/bigbuckbunny_movies/BigBuckBunny_320x180.mp4";

const PATTERN_WIDTH: u32 = 640;
const PATTERN_HEIGHT: u32 = 360;
const PATTERN_FPS: u64 = 60;
/// Length of the synthetic stream.
const PATTERN_DURATION: Duration = Duration::from_secs(4);

/// State shared between [`PatternEngine`] and its decode thread.
#[derive(Default)]
struct PatternShared {
    paused: AtomicBool,
    stop: AtomicBool,
    /// Next frame index to render
    frame: AtomicU64,
    /// Playback rate in thousandths
    rate_milli: AtomicU64,
}

/// Fake decoder engine producing a test pattern on its own thread.
struct PatternEngine {
    output: Option<VideoOutput>,
    events: Option<EventSink>,
    shared: Arc<PatternShared>,
    thread: Option<JoinHandle<()>>,
}

impl PatternEngine {
    fn new(options: &EngineOptions) -> Result<Self, VideoError> {
        tracing::info!("Pattern engine created with {:?}", options.to_args());
        let shared = PatternShared::default();
        shared.rate_milli.store(1000, Ordering::Relaxed);
        Ok(Self {
            output: None,
            events: None,
            shared: Arc::new(shared),
            thread: None,
        })
    }

    fn total_frames() -> u64 {
        PATTERN_DURATION.as_millis() as u64 * PATTERN_FPS / 1000
    }

    fn join(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

fn decode_loop(output: VideoOutput, events: EventSink, shared: Arc<PatternShared>) {
    events.emit(EngineEvent::Opening);
    let negotiated = output.format(PATTERN_WIDTH, PATTERN_HEIGHT);
    tracing::debug!(
        "Format callback returned {}",
        negotiation_result_code(&negotiated)
    );
    if let Err(e) = negotiated {
        events.emit(EngineEvent::Error(e.to_string()));
        return;
    }
    events.emit(EngineEvent::Parsed {
        duration: Some(PATTERN_DURATION),
    });
    events.emit(EngineEvent::Playing);

    let total = PatternEngine::total_frames();
    while !shared.stop.load(Ordering::Acquire) {
        if shared.paused.load(Ordering::Acquire) {
            std::thread::sleep(Duration::from_millis(5));
            continue;
        }

        let index = shared.frame.fetch_add(1, Ordering::AcqRel);
        if index >= total {
            events.emit(EngineEvent::Ended);
            break;
        }

        if let Some(mut frame) = output.lock() {
            let pitch = frame.pitch();
            let shift = (index * 4) as usize;
            for (y, row) in frame.chunks_exact_mut(pitch).enumerate() {
                for (x, pixel) in row.chunks_exact_mut(4).enumerate() {
                    pixel[0] = ((x + shift) & 0xff) as u8;
                    pixel[1] = (y & 0xff) as u8;
                    pixel[2] = (index & 0xff) as u8;
                    pixel[3] = 0xff;
                }
            }
            frame.unlock();
        }
        output.display();

        let rate = shared.rate_milli.load(Ordering::Relaxed).max(1);
        std::thread::sleep(Duration::from_micros(1_000_000_000 / (PATTERN_FPS * rate)));
    }

    output.cleanup();
}

impl DecoderEngine for PatternEngine {
    fn attach(&mut self, output: VideoOutput, events: EventSink) {
        self.output = Some(output);
        self.events = Some(events);
    }

    fn detach(&mut self) {
        self.output = None;
        self.events = None;
    }

    fn open_media(&mut self, source: &SourceLocator, options: &[String]) -> Result<(), VideoError> {
        tracing::info!("Opening {} with {:?}", source, options);
        self.join();
        self.shared.stop.store(false, Ordering::Release);
        self.shared.paused.store(false, Ordering::Release);
        self.shared.frame.store(0, Ordering::Release);
        Ok(())
    }

    fn play(&mut self) -> Result<(), VideoError> {
        let (Some(output), Some(events)) = (self.output.clone(), self.events.clone()) else {
            return Err(VideoError::Engine("play without attached output".into()));
        };
        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("pattern-decoder".into())
            .spawn(move || decode_loop(output, events, shared))
            .map_err(|e| VideoError::Engine(format!("failed to spawn decoder: {e}")))?;
        self.thread = Some(handle);
        Ok(())
    }

    fn set_paused(&mut self, paused: bool) -> Result<(), VideoError> {
        self.shared.paused.store(paused, Ordering::Release);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), VideoError> {
        self.join();
        Ok(())
    }

    fn seek(&mut self, position: Duration) -> Result<(), VideoError> {
        let frame = position.as_millis() as u64 * PATTERN_FPS / 1000;
        self.shared.frame.store(frame, Ordering::Release);
        Ok(())
    }

    fn set_rate(&mut self, rate: f32) -> Result<(), VideoError> {
        self.shared
            .rate_milli
            .store((rate * 1000.0) as u64, Ordering::Relaxed);
        Ok(())
    }

    fn duration(&self) -> Option<Duration> {
        Some(PATTERN_DURATION)
    }
}

impl Drop for PatternEngine {
    fn drop(&mut self) {
        self.join();
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("vsurface_core=debug".parse()?)
                .add_directive("vsurface_demo=debug".parse()?),
        )
        .init();

    let source = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_SOURCE.to_string());

    let mut controller = PlaybackController::new(
        PlayerConfig::default(),
        PatternEngine::new,
        CpuTextureBackend::default(),
    );
    let events = controller.events();

    controller.start(&source)?;
    controller.select_rate_preset(3)?;

    let started = Instant::now();
    let frame_interval = Duration::from_micros(16_667);
    let mut paused_once = false;
    let mut sought = false;
    let mut uploads = 0u32;
    let mut last_report = Instant::now();

    while started.elapsed() < Duration::from_secs(10) {
        match controller.update() {
            DisplayUpdate::Idle => {}
            DisplayUpdate::Uploaded | DisplayUpdate::TextureRecreated => uploads += 1,
        }

        for event in events.try_iter() {
            match event {
                ControllerEvent::TextureChanged(format) => {
                    tracing::info!("Texture recreated for {}", format)
                }
                ControllerEvent::Error(e) => tracing::error!("Playback error: {}", e),
                ControllerEvent::StateChanged(state) => tracing::info!("State: {:?}", state),
                ControllerEvent::Engine(event) => tracing::debug!("Engine: {:?}", event),
            }
        }

        let elapsed = started.elapsed();
        if !paused_once && elapsed > Duration::from_millis(1000) {
            controller.toggle_play_pause(false)?;
            paused_once = true;
        } else if paused_once
            && controller.state() == PlaybackState::Paused
            && elapsed > Duration::from_millis(1500)
        {
            controller.toggle_play_pause(true)?;
        }
        if !sought && controller.state() == PlaybackState::Playing && paused_once {
            if let Some(target) = controller.seek(50.0)? {
                tracing::info!("Seeked to {:?}", target);
            }
            sought = true;
        }

        if last_report.elapsed() >= Duration::from_secs(1) {
            let metrics = controller.metrics();
            tracing::debug!(
                "frames locked {}, publishes {}/{}, displayed {}",
                metrics.frames_locked,
                metrics.publishes_accepted,
                metrics.publishes_accepted + metrics.publishes_dropped,
                metrics.frames_displayed
            );
            last_report = Instant::now();
        }

        if controller.state() == PlaybackState::Ended {
            break;
        }
        std::thread::sleep(frame_interval);
    }

    let metrics = controller.metrics();
    tracing::info!(
        "Uploaded {} frames, {} publishes accepted, {} dropped ({:.0}%)",
        uploads,
        metrics.publishes_accepted,
        metrics.publishes_dropped,
        metrics.drop_ratio() * 100.0
    );
    if let Some(texture) = controller.texture() {
        tracing::info!(
            "Last frame {} at revision {}",
            texture.format(),
            texture.revision()
        );
    }

    let report = controller.shutdown();
    if !report.is_clean() {
        tracing::warn!("Teardown failures: {:?}", report.failed_steps());
    }
    Ok(())
}
