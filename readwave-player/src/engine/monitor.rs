//! Background monitor task for one playback session
//!
//! The tick decides *when* things happen: progress reports, preload start,
//! crossfade start, end-of-track handling. The crossfade itself is
//! pre-scheduled gain automation on the graph clock, so a late tick never
//! distorts a fade already in flight.

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use super::CrossfadeEngine;

/// Spawn the periodic monitor for the engine's session.
pub(super) fn spawn(engine: CrossfadeEngine) -> JoinHandle<()> {
    tokio::spawn(run(engine))
}

async fn run(engine: CrossfadeEngine) {
    let mut tick = tokio::time::interval(engine.options.tick_interval());
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    debug!(session = %engine.session_id(), "Playback monitor started");

    loop {
        tick.tick().await;
        if engine.is_disposed() {
            break;
        }
        if let Err(e) = engine.tick().await {
            warn!(session = %engine.session_id(), "Monitor tick failed: {}", e);
            engine.emit_error(&e);
        }
    }

    debug!(session = %engine.session_id(), "Playback monitor stopped");
}
