//! vsurface-core: embedded video playback surface.
//!
//! Bridges a third-party decoder engine that pushes frames from its own
//! threads to a UI that owns a texture. It contains:
//!
//! - Core types: [`video`], [`frame_buffer`], [`source`], [`config`]
//! - Decoder side: [`engine`] (callbacks and engine trait), [`negotiator`]
//! - Synchronization: [`handoff`], [`triple_buffer`], [`rate_gate`], [`metrics`]
//! - Render side: [`display`]
//! - Lifecycle: [`player`], [`teardown`]
//!
//! The decoder writes frames through [`engine::VideoOutput`]; the render loop
//! calls [`player::PlaybackController::update`] once per frame and draws
//! [`player::PlaybackController::texture`].

pub mod config;
pub mod display;
pub mod engine;
pub mod frame_buffer;
pub mod handoff;
pub mod metrics;
pub mod negotiator;
pub mod player;
pub mod rate_gate;
pub mod source;
pub mod teardown;
pub mod triple_buffer;
pub mod video;

pub use config::{BufferingMode, EngineOptions, HandoffConfig, MediaOptions, PlayerConfig};
pub use display::{CpuTexture, CpuTextureBackend, DisplaySink, DisplayUpdate, TextureBackend};
pub use engine::{DecoderEngine, EngineEvent, EngineFactory, EventSink, SessionEvent, VideoOutput};
pub use frame_buffer::FrameBuffer;
pub use handoff::{FrameHandoff, FrameReadGuard, FrameWriteGuard, ReadyFrame};
pub use metrics::{HandoffMetrics, HandoffMetricsSnapshot};
pub use negotiator::{negotiation_result_code, FormatNegotiator, Negotiated};
pub use player::{ControllerEvent, MediaSession, ParseState, PlaybackController};
pub use rate_gate::{RateGate, DEFAULT_PUBLISH_INTERVAL};
pub use source::SourceLocator;
pub use teardown::TeardownReport;
pub use video::{PixelLayout, PlaybackRate, PlaybackState, VideoError, VideoFormat};
