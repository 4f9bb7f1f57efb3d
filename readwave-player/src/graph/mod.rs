//! Audio graph capability abstraction
//!
//! The crossfade algorithm is written against this capability trait rather
//! than any concrete platform audio API: sources and gain controls are
//! created, connected, and automated on the graph's own clock. The default
//! backend is [`CpalAudioGraph`] (cpal output, symphonia decode); tests
//! substitute a mock with a virtual clock.
//!
//! Scheduled gain automation is the load-bearing capability: a crossfade is
//! pre-scheduled as a sequence of timed gain values, so the fade itself never
//! depends on application-level polling.

mod backend;
pub mod decode;
pub mod mixer;
pub mod output;

pub use backend::{CpalAudioGraph, CpalGraphFactory};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::error::Result;

/// Handle to an audio source node owned by one graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(Uuid);

impl SourceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SourceId {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a gain control node owned by one graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GainId(Uuid);

impl GainId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GainId {
    fn default() -> Self {
        Self::new()
    }
}

/// One step of a scheduled gain automation curve, timed on the graph clock
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainPoint {
    /// Graph-clock instant at which the value takes effect
    pub at: Duration,
    /// Gain multiplier, 0.0..=1.0
    pub value: f32,
}

/// Platform audio backend capability.
///
/// One graph backs exactly one playback session; the engine that owns it is
/// the only mutator. `open` may be refused on platforms that gate audio
/// start behind a user gesture (`Error::PlaybackBlocked`, recoverable);
/// `close` releases the device and invalidates every node.
#[async_trait]
pub trait AudioGraph: Send + Sync {
    /// Open the underlying audio device/context. Idempotent.
    async fn open(&self) -> Result<()>;

    fn is_open(&self) -> bool;

    /// Fetch and decode a locator into a new stopped source node.
    async fn create_source(&self, locator: &str) -> Result<SourceId>;

    /// Create an independently controllable gain path into the shared output.
    fn create_gain_control(&self) -> Result<GainId>;

    /// Route a source through a gain path.
    fn connect(&self, source: SourceId, gain: GainId) -> Result<()>;

    /// Set a gain immediately, discarding any scheduled automation.
    fn set_gain(&self, gain: GainId, value: f32) -> Result<()>;

    /// Replace a gain path's automation with a pre-scheduled curve,
    /// evaluated against [`AudioGraph::now`].
    fn schedule_gain(&self, gain: GainId, points: Vec<GainPoint>) -> Result<()>;

    /// Master gain applied after all gain paths (volume/mute control).
    fn set_master_gain(&self, value: f32) -> Result<()>;

    /// Start or resume a source from its held position.
    fn start_source(&self, source: SourceId) -> Result<()>;

    /// Pause a source, holding its position.
    fn pause_source(&self, source: SourceId) -> Result<()>;

    /// Move a source's position.
    fn seek_source(&self, source: SourceId, position: Duration) -> Result<()>;

    /// Stop a source and reset its position to zero.
    fn stop_source(&self, source: SourceId) -> Result<()>;

    /// Release a source node and its resources. Unknown ids are ignored so
    /// teardown paths never fail.
    fn release_source(&self, source: SourceId);

    /// Release a gain path. Unknown ids are ignored.
    fn release_gain(&self, gain: GainId);

    /// Current position of a source, if it exists.
    fn position(&self, source: SourceId) -> Option<Duration>;

    /// Decoded duration of a source, if it exists.
    fn duration(&self, source: SourceId) -> Option<Duration>;

    /// The graph's own clock, which gain automation is scheduled against.
    fn now(&self) -> Duration;

    /// Stop everything and release the device. Idempotent.
    async fn close(&self) -> Result<()>;
}

/// Shared handle to a graph backend
pub type SharedGraph = Arc<dyn AudioGraph>;

/// Produces a fresh graph per playback session.
///
/// The arbiter holds one factory and creates a graph for every engine it
/// constructs, so a disposed session never shares nodes with its successor.
pub trait GraphFactory: Send + Sync {
    fn create(&self) -> SharedGraph;
}
