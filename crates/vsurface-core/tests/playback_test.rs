//! End-to-end tests driving a [`PlaybackController`] with a scripted engine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use vsurface_core::{
    BufferingMode, ControllerEvent, CpuTextureBackend, DecoderEngine, DisplayUpdate, EngineEvent,
    EngineOptions, EventSink, HandoffConfig, PlaybackController, PlaybackRate, PlaybackState,
    PlayerConfig, SourceLocator, VideoError, VideoFormat, VideoOutput, DEFAULT_PUBLISH_INTERVAL,
};

const SOURCE_A: &str = "https://example.com/a.mp4";
const SOURCE_B: &str = "rtsp://camera.local/stream";

/// State shared between a test and the engines its factory creates.
#[derive(Default)]
struct Script {
    calls: Vec<String>,
    output: Option<VideoOutput>,
    events: Option<EventSink>,
    fail_open: bool,
    panic_on_stop: bool,
    engines_created: u32,
    engines_released: u32,
}

#[derive(Clone, Default)]
struct ScriptHandle(Arc<Mutex<Script>>);

impl ScriptHandle {
    fn output(&self) -> VideoOutput {
        self.0.lock().output.clone().expect("engine not attached")
    }

    fn events(&self) -> EventSink {
        self.0.lock().events.clone().expect("engine not attached")
    }

    fn calls(&self) -> Vec<String> {
        self.0.lock().calls.clone()
    }

    fn count(&self, call: &str) -> usize {
        self.0.lock().calls.iter().filter(|c| *c == call).count()
    }
}

struct ScriptedEngine {
    script: ScriptHandle,
}

impl ScriptedEngine {
    fn record(&self, call: impl Into<String>) {
        self.script.0.lock().calls.push(call.into());
    }
}

impl DecoderEngine for ScriptedEngine {
    fn attach(&mut self, output: VideoOutput, events: EventSink) {
        self.record("attach");
        let mut script = self.script.0.lock();
        script.output = Some(output);
        script.events = Some(events);
    }

    fn detach(&mut self) {
        self.record("detach");
    }

    fn open_media(&mut self, source: &SourceLocator, _options: &[String]) -> Result<(), VideoError> {
        self.record(format!("open({source})"));
        if self.script.0.lock().fail_open {
            return Err(VideoError::Engine("cannot open".into()));
        }
        Ok(())
    }

    fn play(&mut self) -> Result<(), VideoError> {
        self.record("play");
        Ok(())
    }

    fn set_paused(&mut self, paused: bool) -> Result<(), VideoError> {
        self.record(format!("set_paused({paused})"));
        Ok(())
    }

    fn stop(&mut self) -> Result<(), VideoError> {
        self.record("stop");
        if self.script.0.lock().panic_on_stop {
            panic!("engine stop crashed");
        }
        Ok(())
    }

    fn seek(&mut self, position: Duration) -> Result<(), VideoError> {
        self.record(format!("seek({})", position.as_millis()));
        Ok(())
    }

    fn set_rate(&mut self, rate: f32) -> Result<(), VideoError> {
        self.record(format!("set_rate({rate})"));
        Ok(())
    }

    fn release_media(&mut self) -> Result<(), VideoError> {
        self.record("release_media");
        Ok(())
    }

    fn release(&mut self) -> Result<(), VideoError> {
        self.record("release");
        self.script.0.lock().engines_released += 1;
        Ok(())
    }
}

type Controller = PlaybackController<ScriptedEngine, CpuTextureBackend>;

fn controller_with(config: PlayerConfig) -> (Controller, ScriptHandle) {
    let script = ScriptHandle::default();
    let factory_script = script.clone();
    let controller = PlaybackController::new(
        config,
        move |_options: &EngineOptions| {
            factory_script.0.lock().engines_created += 1;
            Ok(ScriptedEngine {
                script: factory_script.clone(),
            })
        },
        CpuTextureBackend::default(),
    );
    (controller, script)
}

fn controller() -> (Controller, ScriptHandle) {
    controller_with(PlayerConfig::default())
}

fn write_frame(output: &VideoOutput, value: u8) {
    let mut frame = output.lock().expect("write buffer");
    frame.fill(value);
    frame.unlock();
}

/// Starts playback and pushes one frame all the way to the texture.
fn playing_with_frame(controller: &mut Controller, script: &ScriptHandle) -> VideoOutput {
    controller.start(SOURCE_A).unwrap();
    let output = script.output();
    output.format(320, 180).unwrap();
    write_frame(&output, 7);
    assert!(output.display());
    assert_eq!(controller.update(), DisplayUpdate::TextureRecreated);
    output
}

#[test]
fn test_1080p_buffer_size() {
    let (mut controller, script) = controller();
    controller.start(SOURCE_A).unwrap();

    let negotiated = script.output().format(1920, 1080).unwrap();
    assert_eq!(negotiated.pitch, 7680);
    assert_eq!(negotiated.lines, 1080);

    let frame = script.output().lock().unwrap();
    assert_eq!(frame.len(), 8_294_400);
}

#[test]
fn test_renegotiation_replaces_buffers() {
    let (mut controller, script) = controller();
    controller.start(SOURCE_A).unwrap();
    let output = script.output();

    output.format(1280, 720).unwrap();
    let epoch = controller.handoff().format_epoch();
    output.format(1920, 1080).unwrap();

    assert!(controller.handoff().format_epoch() > epoch);
    assert_eq!(controller.handoff().allocated_bytes(), 3 * 8_294_400);
    assert_eq!(output.lock().unwrap().len(), 8_294_400);
}

#[test]
fn test_zero_width_rejected_then_lock_none() {
    let (mut controller, script) = controller();
    controller.start(SOURCE_A).unwrap();
    let output = script.output();

    assert!(output.format(0, 1080).is_err());
    assert!(output.lock().is_none());
    assert!(!output.display());
}

#[test]
fn test_rapid_publishes_give_one_update() {
    let (mut controller, script) = controller();
    controller.start(SOURCE_A).unwrap();
    let output = script.output();
    output.format(64, 64).unwrap();

    let t0 = Instant::now();
    for (i, ms) in [0u64, 5, 10, 20, 30].into_iter().enumerate() {
        write_frame(&output, i as u8);
        controller
            .handoff()
            .publish_at(t0 + Duration::from_millis(ms));
    }

    assert_ne!(controller.update(), DisplayUpdate::Idle);
    assert_eq!(controller.update(), DisplayUpdate::Idle);

    // The newest committed frame is what gets shown
    let texture = controller.texture().unwrap();
    assert!(texture.pixels().iter().all(|&b| b == 4));
}

#[test]
fn test_spaced_publishes_each_update() {
    let (mut controller, script) = controller();
    controller.start(SOURCE_A).unwrap();
    let output = script.output();
    output.format(64, 64).unwrap();

    let t0 = Instant::now();
    for k in 0..5u8 {
        write_frame(&output, k);
        assert!(controller
            .handoff()
            .publish_at(t0 + DEFAULT_PUBLISH_INTERVAL * u32::from(k)));
        assert_ne!(controller.update(), DisplayUpdate::Idle);
        assert!(controller.texture().unwrap().pixels().iter().all(|&b| b == k));
    }
    assert_eq!(controller.texture().unwrap().revision(), 5);
}

#[test]
fn test_publishes_per_second_are_bounded() {
    let (mut controller, script) = controller();
    controller.start(SOURCE_A).unwrap();
    script.output().format(16, 16).unwrap();

    // Deterministic pseudo-random offsets within one second
    let mut seed = 0x2545_f491_u64;
    let mut offsets: Vec<u64> = (0..100)
        .map(|_| {
            seed = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            (seed >> 33) % 1_000_000_000
        })
        .collect();
    offsets.sort_unstable();

    let t0 = Instant::now();
    let accepted = offsets
        .iter()
        .filter(|&&ns| controller.handoff().publish_at(t0 + Duration::from_nanos(ns)))
        .count();

    assert!(accepted >= 1);
    assert!(accepted <= 31, "{accepted} publishes accepted in one second");
}

#[test]
fn test_toggle_is_idempotent() {
    let (mut controller, script) = controller();
    controller.start(SOURCE_A).unwrap();

    assert_eq!(controller.toggle_play_pause(true), Ok(false));
    assert_eq!(controller.state(), PlaybackState::Playing);

    assert_eq!(controller.toggle_play_pause(false), Ok(true));
    assert_eq!(controller.toggle_play_pause(false), Ok(false));
    assert_eq!(controller.state(), PlaybackState::Paused);
    assert_eq!(script.count("set_paused(true)"), 1);

    assert_eq!(controller.toggle_play_pause(true), Ok(true));
    assert_eq!(controller.state(), PlaybackState::Playing);
    assert_eq!(script.count("set_paused(false)"), 1);
}

#[test]
fn test_pause_shows_latest_frame() {
    let (mut controller, script) = controller();
    let output = playing_with_frame(&mut controller, &script);

    // Committed but never published
    write_frame(&output, 9);
    assert_eq!(controller.update(), DisplayUpdate::Idle);

    controller.toggle_play_pause(false).unwrap();
    assert_eq!(controller.update(), DisplayUpdate::Uploaded);
    assert!(controller.texture().unwrap().pixels().iter().all(|&b| b == 9));
}

#[test]
fn test_end_of_stream_keeps_last_frame() {
    let (mut controller, script) = controller();
    playing_with_frame(&mut controller, &script);

    script.events().emit(EngineEvent::Ended);
    controller.update();

    assert_eq!(controller.state(), PlaybackState::Ended);
    assert!(controller.session().is_none());
    assert!(controller.handoff().format().is_some());
    let texture = controller.texture().expect("last frame stays visible");
    assert!(texture.pixels().iter().all(|&b| b == 7));
    assert_eq!(script.count("release_media"), 1);
    assert_eq!(script.count("release"), 0);
}

#[test]
fn test_engine_error_stops_playback() {
    let (mut controller, script) = controller();
    controller.start(SOURCE_A).unwrap();
    let events = controller.events();

    script
        .events()
        .emit(EngineEvent::Error("network unreachable".into()));
    controller.update();

    assert_eq!(controller.state(), PlaybackState::Stopped);
    assert!(controller.session().is_none());
    assert!(events.try_iter().any(|e| matches!(
        e,
        ControllerEvent::Error(VideoError::Engine(ref msg)) if msg == "network unreachable"
    )));
}

#[test]
fn test_shutdown_twice() {
    let (mut controller, script) = controller();
    playing_with_frame(&mut controller, &script);

    let first = controller.shutdown();
    assert!(first.is_clean());
    assert_eq!(controller.state(), PlaybackState::Idle);
    assert!(controller.texture().is_none());
    assert!(controller.handoff().format().is_none());
    assert_eq!(controller.handoff().allocated_bytes(), 0);
    assert!(controller.engine().is_none());
    assert_eq!(controller.sink().backend().live_textures(), 0);

    let calls = script.calls();
    let second = controller.shutdown();
    assert!(second.is_clean());
    assert_eq!(script.calls(), calls);
    assert_eq!(script.0.lock().engines_released, 1);
}

#[test]
fn test_shutdown_order() {
    let (mut controller, script) = controller();
    playing_with_frame(&mut controller, &script);
    let before = script.calls().len();

    controller.shutdown();
    assert_eq!(
        script.calls()[before..],
        ["stop", "release_media", "detach", "release"]
    );
}

#[test]
fn test_shutdown_continues_after_panic() {
    let (mut controller, script) = controller();
    playing_with_frame(&mut controller, &script);
    script.0.lock().panic_on_stop = true;

    let report = controller.shutdown();
    assert_eq!(report.failed_steps(), &["stop playback"]);
    assert!(controller.texture().is_none());
    assert!(controller.handoff().format().is_none());
    assert_eq!(script.0.lock().engines_released, 1);
}

#[test]
fn test_callbacks_after_shutdown_are_ignored() {
    let (mut controller, script) = controller();
    let output = playing_with_frame(&mut controller, &script);
    controller.shutdown();

    assert!(output.lock().is_none());
    assert!(!output.display());
    assert!(output.format(640, 480).is_err());
    assert!(controller.handoff().format().is_none());
    assert_eq!(controller.update(), DisplayUpdate::Idle);
}

#[test]
fn test_seek_by_percent() {
    let (mut controller, script) = controller();
    controller.start(SOURCE_A).unwrap();

    // Duration unknown until parsing completes
    assert_eq!(controller.seek(50.0), Ok(None));

    script.events().emit(EngineEvent::Parsed {
        duration: Some(Duration::from_millis(200_000)),
    });
    controller.update();

    assert_eq!(
        controller.seek(50.0),
        Ok(Some(Duration::from_millis(100_000)))
    );
    assert_eq!(script.count("seek(100000)"), 1);
}

#[test]
fn test_seek_without_session() {
    let (mut controller, _script) = controller();
    assert_eq!(controller.seek(10.0), Err(VideoError::NoSession));
}

#[test]
fn test_rate_presets() {
    let (mut controller, script) = controller();
    controller.start(SOURCE_A).unwrap();

    let rate = controller.select_rate_preset(3).unwrap();
    assert_eq!(rate.value(), 1.25);
    assert_eq!(controller.rate(), rate);
    assert_eq!(script.count("set_rate(1.25)"), 1);

    assert!(matches!(
        controller.select_rate_preset(PlaybackRate::PRESETS.len()),
        Err(VideoError::InvalidArgument(_))
    ));
    assert_eq!(controller.rate().value(), 1.25);
}

#[test]
fn test_rate_applies_to_next_session() {
    let (mut controller, script) = controller();
    controller
        .set_playback_rate(PlaybackRate::new(2.0).unwrap())
        .unwrap();
    assert_eq!(script.count("set_rate(2)"), 0);

    controller.start(SOURCE_A).unwrap();
    assert_eq!(script.count("set_rate(2)"), 1);
}

#[test]
fn test_stale_generation_is_noop() {
    let (mut controller, script) = controller();
    controller.start(SOURCE_A).unwrap();
    let old_output = script.output();
    let old_events = script.events();
    old_output.format(64, 64).unwrap();

    controller.start(SOURCE_B).unwrap();
    assert!(!old_output.is_current());
    assert!(old_output.lock().is_none());
    assert!(!old_output.display());

    old_events.emit(EngineEvent::Ended);
    controller.update();
    assert_eq!(controller.state(), PlaybackState::Playing);
    assert!(controller.metrics().stale_callbacks >= 3);

    // The new session's callbacks still work
    let output = script.output();
    output.format(64, 64).unwrap();
    assert!(output.lock().is_some());
}

#[test]
fn test_invalid_source_does_not_touch_session() {
    let (mut controller, script) = controller();
    controller.start(SOURCE_A).unwrap();
    let generation = controller.session().unwrap().generation();
    let calls = script.calls();

    for bad in ["", "gopher://example.com/x", "/definitely/not/here.mp4"] {
        assert!(matches!(
            controller.start(bad),
            Err(VideoError::InvalidSource(_))
        ));
    }

    assert_eq!(controller.state(), PlaybackState::Playing);
    assert_eq!(controller.session().unwrap().generation(), generation);
    assert_eq!(script.calls(), calls);
}

#[test]
fn test_failed_open_returns_to_idle() {
    let (mut controller, script) = controller();
    let events = controller.events();
    script.0.lock().fail_open = true;

    assert!(matches!(
        controller.start(SOURCE_A),
        Err(VideoError::SessionStart(_))
    ));
    assert_eq!(controller.state(), PlaybackState::Idle);
    assert!(controller.session().is_none());
    assert!(events
        .try_iter()
        .any(|e| matches!(e, ControllerEvent::Error(VideoError::SessionStart(_)))));

    script.0.lock().fail_open = false;
    controller.start(SOURCE_A).unwrap();
    assert_eq!(controller.state(), PlaybackState::Playing);
}

#[test]
fn test_start_after_shutdown_creates_engine() {
    let (mut controller, script) = controller();
    controller.start(SOURCE_A).unwrap();
    controller.shutdown();
    controller.start(SOURCE_B).unwrap();

    assert_eq!(script.0.lock().engines_created, 2);
    assert_eq!(controller.state(), PlaybackState::Playing);
}

#[test]
fn test_local_file_source() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("clip.mp4");
    std::fs::write(&file, b"\0\0\0\x18ftypmp42").unwrap();

    let (mut controller, script) = controller();
    controller.start(file.to_str().unwrap()).unwrap();
    assert!(!controller.session().unwrap().source().is_network());
    assert_eq!(script.count(&format!("open({})", file.display())), 1);
}

#[test]
fn test_single_buffer_mode() {
    let (mut controller, script) = controller_with(PlayerConfig {
        handoff: HandoffConfig {
            mode: BufferingMode::Single,
            ..Default::default()
        },
        ..Default::default()
    });
    let output = playing_with_frame(&mut controller, &script);
    assert_eq!(controller.handoff().allocated_bytes(), 320 * 180 * 4);

    write_frame(&output, 3);
    controller.handoff().force_publish();
    assert_eq!(controller.update(), DisplayUpdate::Uploaded);
    assert!(controller.texture().unwrap().pixels().iter().all(|&b| b == 3));
}

#[test]
fn test_decoder_thread_handoff() {
    let (mut controller, script) = controller();
    controller.start(SOURCE_A).unwrap();
    let output = script.output();
    output.format(32, 32).unwrap();

    let writer = std::thread::spawn(move || {
        for i in 0..200u32 {
            write_frame(&output, (i % 251) as u8);
            output.display();
        }
    });

    while !writer.is_finished() {
        controller.update();
        if let Some(texture) = controller.texture() {
            // Every pixel of an uploaded frame comes from the same write
            let first = texture.pixels()[0];
            assert!(texture.pixels().iter().all(|&b| b == first));
        }
    }
    writer.join().unwrap();
}

/// Writes and publishes frames through `output` until `stop` is set.
/// Returns the number of frames it managed to lock.
fn spawn_writer(output: VideoOutput, stop: Arc<AtomicBool>) -> JoinHandle<u32> {
    std::thread::spawn(move || {
        let mut locked = 0u32;
        let mut value = 0u8;
        while !stop.load(Ordering::Acquire) {
            if let Some(mut frame) = output.lock() {
                frame.fill(value);
                locked += 1;
            }
            output.display();
            value = value.wrapping_add(1) % 100;
        }
        output.cleanup();
        locked
    })
}

#[test]
fn test_restart_and_shutdown_with_writers_in_flight() {
    let (mut controller, script) = controller();
    controller.start(SOURCE_A).unwrap();
    let old_output = script.output();
    old_output.format(32, 32).unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let old_writer = spawn_writer(old_output.clone(), Arc::clone(&stop));
    for _ in 0..20 {
        controller.update();
        std::thread::sleep(Duration::from_millis(1));
    }

    // Replace the session while the old decoder thread is still writing
    controller.start(SOURCE_B).unwrap();
    let output = script.output();
    output.format(16, 16).unwrap();
    write_frame(&output, 200);
    controller.update();

    // Nothing from the old session reaches the new buffers
    let texture = controller.texture().unwrap();
    assert_eq!(texture.format(), VideoFormat::rgba(16, 16).unwrap());
    assert!(texture.pixels().iter().all(|&b| b == 200));

    // Shut down while a writer of the current session is mid-flight
    let writer = spawn_writer(output.clone(), Arc::clone(&stop));
    std::thread::sleep(Duration::from_millis(5));
    let report = controller.shutdown();
    assert!(report.is_clean());
    assert_eq!(controller.handoff().allocated_bytes(), 0);
    assert!(output.lock().is_none());
    assert!(old_output.lock().is_none());

    stop.store(true, Ordering::Release);
    assert!(old_writer.join().unwrap() > 0);
    writer.join().unwrap();

    assert_eq!(controller.state(), PlaybackState::Idle);
    assert_eq!(controller.update(), DisplayUpdate::Idle);
    assert!(controller.metrics().stale_callbacks > 0);
}
