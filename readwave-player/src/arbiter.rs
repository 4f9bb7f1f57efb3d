//! Playback arbiter - the single application-wide entry point
//!
//! **Responsibilities:**
//! - Guarantee at most one live playback session: disposing the previous
//!   engine always completes before the next one is constructed
//! - Republish engine events on an application-wide bus so any number of UI
//!   surfaces (mini player, full player, timeline) observe one session
//! - Own the [`PlaybackState`] snapshot; every mutation funnels through one
//!   merge function that notifies subscribers only on structural change
//!
//! The arbiter is an explicitly constructed, dependency-injected instance
//! held once at application root, not a global. It holds a
//! [`GraphFactory`] so every engine gets a fresh audio graph and a disposed
//! session never shares nodes with its successor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::broadcast;
use tokio::sync::Mutex as TokioMutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use readwave_common::{EventBus, PlaybackMode, PlaybackState, PlayerEvent, Track};

use crate::config::CrossfadeOptions;
use crate::engine::CrossfadeEngine;
use crate::error::{Error, Result};
use crate::graph::GraphFactory;

/// Diagnostics snapshot for tooling; not part of the functional contract.
#[derive(Debug, Clone)]
pub struct Diagnostics {
    pub state: PlaybackState,
    /// Session id of the live engine, if any
    pub active_session: Option<Uuid>,
    pub subscriber_count: usize,
}

/// State + bus shared with the event-forwarding task
struct Shared {
    bus: EventBus,
    state: StdMutex<PlaybackState>,
}

impl Shared {
    /// Merge a partial update into the state and notify subscribers only if
    /// the result differs structurally from the previous snapshot.
    fn update_state(&self, apply: impl FnOnce(&mut PlaybackState)) {
        let changed = {
            let mut state = self.state.lock().unwrap();
            let old = state.clone();
            apply(&mut state);
            if *state != old {
                Some(state.clone())
            } else {
                None
            }
        };
        if let Some(state) = changed {
            self.bus.emit_lossy(PlayerEvent::state_changed(state));
        }
    }

    /// Fold one engine event into the snapshot and republish it
    /// application-wide. Never panics out of the forwarding task.
    fn handle_engine_event(&self, event: PlayerEvent) {
        match &event {
            PlayerEvent::TrackChanged { index, .. } => {
                let index = *index;
                self.update_state(|state| state.current_track_index = index);
            }
            PlayerEvent::Progress {
                position, duration, ..
            } => {
                let (position, duration) = (*position, *duration);
                self.update_state(|state| {
                    state.current_time = position;
                    state.duration = duration;
                });
            }
            PlayerEvent::PlaylistEnded { .. } => {
                self.update_state(|state| state.is_playing = false);
            }
            PlayerEvent::Error { message, .. } => {
                warn!("Playback error: {}", message);
            }
            PlayerEvent::StateChanged { .. } => {
                // State snapshots originate here, never from the engine
                return;
            }
        }
        self.bus.emit_lossy(event);
    }
}

/// The live engine plus the playlist it was started with
struct ActiveSession {
    engine: Option<CrossfadeEngine>,
    playlist: Vec<Track>,
    forward_task: Option<JoinHandle<()>>,
}

/// Clears the initializing flag on every exit path, including errors.
struct InitGuard(Arc<AtomicBool>);

impl Drop for InitGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// The only object the rest of the application talks to for playback.
pub struct PlaybackArbiter {
    shared: Arc<Shared>,
    graph_factory: Arc<dyn GraphFactory>,
    default_options: CrossfadeOptions,
    active: TokioMutex<ActiveSession>,
    initializing: Arc<AtomicBool>,
}

impl PlaybackArbiter {
    pub fn new(graph_factory: impl GraphFactory + 'static) -> Self {
        Self::with_options(graph_factory, CrossfadeOptions::default())
    }

    pub fn with_options(
        graph_factory: impl GraphFactory + 'static,
        default_options: CrossfadeOptions,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                bus: EventBus::new(256),
                state: StdMutex::new(PlaybackState::default()),
            }),
            graph_factory: Arc::new(graph_factory),
            default_options,
            active: TokioMutex::new(ActiveSession {
                engine: None,
                playlist: Vec::new(),
                forward_task: None,
            }),
            initializing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Current state snapshot.
    pub fn state(&self) -> PlaybackState {
        self.shared.state.lock().unwrap().clone()
    }

    /// Subscribe to application-wide playback events. Any number of UI
    /// surfaces may subscribe; dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.shared.bus.subscribe()
    }

    /// Start a playlist session, replacing any existing session.
    ///
    /// Duplicate calls while a start is already in flight are ignored, so a
    /// rapid double-invocation yields exactly one engine. The previous
    /// session is fully disposed before the new engine exists.
    pub async fn play_playlist(
        &self,
        tracks: Vec<Track>,
        start_index: usize,
        options: Option<CrossfadeOptions>,
    ) -> Result<()> {
        if self.initializing.swap(true, Ordering::AcqRel) {
            warn!("Playback start already in progress, ignoring duplicate request");
            return Ok(());
        }
        let _guard = InitGuard(Arc::clone(&self.initializing));

        if tracks.is_empty() {
            return Err(Error::EmptyPlaylist);
        }
        if start_index >= tracks.len() {
            return Err(Error::IndexOutOfRange {
                index: start_index,
                len: tracks.len(),
            });
        }

        info!(
            "Starting playlist: {} tracks from index {}",
            tracks.len(),
            start_index
        );

        let mut active = self.active.lock().await;
        self.cleanup_existing(&mut active).await;

        let graph = self.graph_factory.create();
        let engine = CrossfadeEngine::new(
            graph,
            options.unwrap_or_else(|| self.default_options.clone()),
        );

        // Wire the engine bus into the application-wide bus before playback
        // starts so no early event is missed
        let mut rx = engine.subscribe();
        let shared = Arc::clone(&self.shared);
        let forward_task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => shared.handle_engine_event(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("Event forwarder lagged, skipped {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        self.shared.update_state(|state| {
            state.playlist_length = tracks.len();
            state.current_track_index = start_index;
            state.mode = PlaybackMode::Playlist;
        });

        active.playlist = tracks.clone();
        active.engine = Some(engine.clone());
        active.forward_task = Some(forward_task);
        drop(active);

        match engine.play(tracks, start_index).await {
            Ok(()) => {
                self.shared.update_state(|state| state.is_playing = true);
                info!("Playlist playback started");
                Ok(())
            }
            Err(e) => {
                // The engine stays wired so a recoverable failure (autoplay
                // block, flaky load) can be retried without re-arbitration
                self.shared
                    .bus
                    .emit_lossy(PlayerEvent::error(e.to_string(), e.is_recoverable()));
                Err(e)
            }
        }
    }

    /// Play one standalone track (no crossfading).
    pub async fn play_track(&self, track: Track) -> Result<()> {
        let options = CrossfadeOptions {
            duration_ms: 0,
            ..self.default_options.clone()
        };
        self.play_playlist(vec![track], 0, Some(options)).await?;
        self.shared
            .update_state(|state| state.mode = PlaybackMode::Single);
        Ok(())
    }

    /// Pause the active session; no-op without one or when already paused.
    pub async fn pause(&self) -> Result<()> {
        let Some(engine) = self.engine_handle().await else {
            return Ok(());
        };
        if !self.state().is_playing {
            return Ok(());
        }
        engine.pause().await?;
        self.shared.update_state(|state| state.is_playing = false);
        Ok(())
    }

    /// Resume the active session; no-op without one or when already playing.
    pub async fn resume(&self) -> Result<()> {
        let Some(engine) = self.engine_handle().await else {
            return Ok(());
        };
        if self.state().is_playing {
            return Ok(());
        }
        engine.resume().await?;
        self.shared.update_state(|state| state.is_playing = true);
        Ok(())
    }

    pub async fn toggle_play_pause(&self) -> Result<()> {
        if self.state().is_playing {
            self.pause().await
        } else {
            self.resume().await
        }
    }

    /// Skip to the next track; no-op at the last index.
    pub async fn skip_to_next(&self) -> Result<()> {
        let Some(engine) = self.engine_handle().await else {
            return Ok(());
        };
        if !self.state().has_next() {
            return Ok(());
        }
        engine.skip_to_next().await?;
        self.sync_index(&engine).await;
        Ok(())
    }

    /// Skip to the previous track, or restart the current one when more
    /// than 5 seconds have elapsed.
    pub async fn skip_to_previous(&self) -> Result<()> {
        let Some(engine) = self.engine_handle().await else {
            return Ok(());
        };
        engine.skip_to_previous().await?;
        self.sync_index(&engine).await;
        Ok(())
    }

    /// Restart the current playlist at an arbitrary index.
    ///
    /// Unlike the clamped skip operations, an out-of-range index is an
    /// explicit error and leaves all state untouched.
    pub async fn skip_to_track(&self, index: usize) -> Result<()> {
        let len = self.state().playlist_length;
        if index >= len {
            return Err(Error::IndexOutOfRange { index, len });
        }

        let playlist = self.active.lock().await.playlist.clone();
        debug!("Skipping to track {}", index);
        self.play_playlist(playlist, index, None).await
    }

    /// Stop and dispose everything, resetting the state to idle.
    pub async fn stop_all(&self) -> Result<()> {
        info!("Stopping all playback");
        let mut active = self.active.lock().await;
        self.cleanup_existing(&mut active).await;
        active.playlist.clear();
        drop(active);

        self.shared.update_state(|state| {
            *state = PlaybackState::default();
        });
        Ok(())
    }

    /// The track the snapshot currently points at, if any.
    pub async fn current_track(&self) -> Option<Track> {
        let index = self.state().current_track_index;
        self.active.lock().await.playlist.get(index).cloned()
    }

    /// Diagnostics snapshot for tooling (optional instrumentation).
    pub async fn diagnostics(&self) -> Diagnostics {
        let active_session = self
            .active
            .lock()
            .await
            .engine
            .as_ref()
            .map(|engine| engine.session_id());
        Diagnostics {
            state: self.state(),
            active_session,
            subscriber_count: self.shared.bus.subscriber_count(),
        }
    }

    // ----- internals -----

    async fn engine_handle(&self) -> Option<CrossfadeEngine> {
        self.active.lock().await.engine.clone()
    }

    /// Pull the authoritative index from the engine after a skip so callers
    /// observe the new position as soon as the call returns.
    async fn sync_index(&self, engine: &CrossfadeEngine) {
        let index = engine.current_index().await;
        self.shared
            .update_state(|state| state.current_track_index = index);
    }

    /// Dispose the previous session completely before anything else runs.
    async fn cleanup_existing(&self, active: &mut ActiveSession) {
        if let Some(engine) = active.engine.take() {
            debug!("Disposing previous session {}", engine.session_id());
            engine.dispose().await;
        }
        if let Some(task) = active.forward_task.take() {
            task.abort();
        }
        self.shared.update_state(|state| {
            state.is_playing = false;
            state.current_time = 0.0;
            state.duration = 0.0;
        });
    }
}
