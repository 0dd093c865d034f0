//! Player configuration.
//!
//! Everything the decoder engine receives is rendered into opaque option
//! strings here; the core never interprets them.

use std::time::Duration;

use crate::rate_gate::DEFAULT_PUBLISH_INTERVAL;
use crate::video::PlaybackRate;

/// How frames are buffered between the decoder and the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferingMode {
    /// Three rotating buffers. The renderer never reads a buffer the decoder
    /// is writing, and neither side waits on the other.
    #[default]
    Triple,
    /// One shared buffer. Uses a third of the memory; the decoder and the
    /// renderer serialize on it, so the decoder may wait for one render-side
    /// copy.
    Single,
}

impl BufferingMode {
    /// Number of frame buffers allocated per negotiated format.
    pub fn buffer_count(self) -> u32 {
        match self {
            BufferingMode::Triple => 3,
            BufferingMode::Single => 1,
        }
    }
}

/// Frame hand-off configuration.
#[derive(Debug, Clone)]
pub struct HandoffConfig {
    /// Buffering strategy
    pub mode: BufferingMode,
    /// Minimum spacing between forwarded ready notices
    pub publish_interval: Duration,
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            mode: BufferingMode::default(),
            publish_interval: DEFAULT_PUBLISH_INTERVAL,
        }
    }
}

/// Options passed once when the decoder engine is constructed.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Network input cache
    pub network_caching_ms: u32,
    /// Live capture cache
    pub live_caching_ms: u32,
    /// Output (stream-out) cache
    pub output_caching_ms: u32,
    /// Upper bound on adaptive-streaming variant width
    pub adaptive_max_width: u32,
    /// Upper bound on adaptive-streaming variant height
    pub adaptive_max_height: u32,
    /// Let the engine reconnect dropped HTTP streams
    pub http_reconnect: bool,
    /// Extra engine arguments appended verbatim
    pub extra_args: Vec<String>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            network_caching_ms: 1000,
            live_caching_ms: 1000,
            output_caching_ms: 300,
            adaptive_max_width: 1920,
            adaptive_max_height: 1080,
            http_reconnect: true,
            extra_args: Vec::new(),
        }
    }
}

impl EngineOptions {
    /// Renders the options as an engine argument list.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            format!("--network-caching={}", self.network_caching_ms),
            format!("--live-caching={}", self.live_caching_ms),
            format!("--output-caching={}", self.output_caching_ms),
            format!("--adaptive-maxwidth={}", self.adaptive_max_width),
            format!("--adaptive-maxheight={}", self.adaptive_max_height),
        ];
        if self.http_reconnect {
            args.push("--http-reconnect".to_string());
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

/// Options attached to each media when it is opened.
#[derive(Debug, Clone)]
pub struct MediaOptions {
    /// Per-media network cache
    pub network_caching_ms: u32,
    /// Tolerated clock jitter before resync
    pub clock_jitter_ms: u32,
    /// Clock synchronisation mode (0 = default, 1 = enabled, -1 = disabled)
    pub clock_synchro: i32,
}

impl Default for MediaOptions {
    fn default() -> Self {
        Self {
            network_caching_ms: 1000,
            clock_jitter_ms: 0,
            clock_synchro: 0,
        }
    }
}

impl MediaOptions {
    /// Renders the options as per-media arguments.
    pub fn to_args(&self) -> Vec<String> {
        vec![
            format!(":network-caching={}", self.network_caching_ms),
            format!(":clock-jitter={}", self.clock_jitter_ms),
            format!(":clock-synchro={}", self.clock_synchro),
        ]
    }
}

/// Top-level configuration for a [`PlaybackController`](crate::player::PlaybackController).
#[derive(Debug, Clone, Default)]
pub struct PlayerConfig {
    /// Engine construction options
    pub engine: EngineOptions,
    /// Per-media options
    pub media: MediaOptions,
    /// Frame hand-off settings
    pub handoff: HandoffConfig,
    /// Rate applied to the first session
    pub initial_rate: PlaybackRate,
}
