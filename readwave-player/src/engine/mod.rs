//! Crossfade engine - one uninterrupted playback session
//!
//! **Responsibilities:**
//! - Drive playback of one playlist: current/next source slots over two
//!   independently controllable gain paths
//! - Schedule equal-power crossfades as pre-scheduled gain automation on the
//!   graph clock, with duration adapted to the musical content
//! - Preload the upcoming track ahead of the transition window
//! - Fast (non-crossfaded) skips with boundary clamping
//! - Idempotent disposal that cancels every in-flight continuation
//!
//! A session moves `Idle → Loading → Playing → {PreloadingNext →
//! Crossfading → Playing}* → Ended`; `Disposed` is reachable from every
//! state and terminal. The engine knows nothing about other sessions; the
//! arbiter guarantees at most one engine is alive.

mod monitor;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex as TokioMutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use readwave_common::{EventBus, PlayerEvent, Track};

use crate::adaptive::crossfade_duration_ms;
use crate::config::CrossfadeOptions;
use crate::error::{Error, Result};
use crate::graph::{GainPoint, SharedGraph, SourceId};

/// Threshold below which skip-to-previous restarts the current track instead
/// of moving to the prior index
const PREVIOUS_RESTART_THRESHOLD: Duration = Duration::from_secs(5);

/// Backoff unit between track load attempts
const LOAD_RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Session state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Loading,
    Playing,
    PreloadingNext,
    Crossfading,
    Ended,
    Disposed,
}

/// One loaded source routed through its own gain path
#[derive(Debug)]
struct Slot {
    source: SourceId,
    gain: crate::graph::GainId,
    track: Track,
    index: usize,
}

/// Mutable session data guarded by one lock
struct Session {
    playlist: Vec<Track>,
    current_index: usize,
    /// Index the session will advance into next; moves past entries whose
    /// preload failed
    next_index: usize,
    current: Option<Slot>,
    /// Preloaded upcoming slot, silent until its crossfade starts
    next: Option<Slot>,
    /// Outgoing slot during an active crossfade
    fading_out: Option<Slot>,
    next_loading: bool,
    underrun_reported: bool,
    ended: bool,
    /// Bumped on every swap/teardown so stale deferred work is discarded
    generation: u64,
}

impl Session {
    fn empty() -> Self {
        Self {
            playlist: Vec::new(),
            current_index: 0,
            next_index: 0,
            current: None,
            next: None,
            fading_out: None,
            next_loading: false,
            underrun_reported: false,
            ended: false,
            generation: 0,
        }
    }
}

struct VolumeControl {
    /// 0.0..=1.0
    volume: f32,
    muted: bool,
}

impl VolumeControl {
    fn effective(&self) -> f32 {
        if self.muted {
            0.0
        } else {
            self.volume
        }
    }
}

/// One playback session over an [`AudioGraph`](crate::graph::AudioGraph).
///
/// Cloning is cheap and yields another handle to the same session; the
/// monitor task and deferred continuations hold clones.
#[derive(Clone)]
pub struct CrossfadeEngine {
    session_id: Uuid,
    graph: SharedGraph,
    options: CrossfadeOptions,
    bus: Arc<EventBus>,
    session: Arc<TokioMutex<Session>>,
    disposed: Arc<AtomicBool>,
    crossfading: Arc<AtomicBool>,
    playing: Arc<AtomicBool>,
    state: Arc<StdMutex<EngineState>>,
    monitor: Arc<StdMutex<Option<JoinHandle<()>>>>,
    volume: Arc<StdMutex<VolumeControl>>,
}

impl CrossfadeEngine {
    pub fn new(graph: SharedGraph, options: CrossfadeOptions) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            graph,
            options,
            bus: Arc::new(EventBus::new(256)),
            session: Arc::new(TokioMutex::new(Session::empty())),
            disposed: Arc::new(AtomicBool::new(false)),
            crossfading: Arc::new(AtomicBool::new(false)),
            playing: Arc::new(AtomicBool::new(false)),
            state: Arc::new(StdMutex::new(EngineState::Idle)),
            monitor: Arc::new(StdMutex::new(None)),
            volume: Arc::new(StdMutex::new(VolumeControl {
                volume: 0.7,
                muted: false,
            })),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Subscribe to this session's events. Dropping the receiver
    /// unsubscribes.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PlayerEvent> {
        self.bus.subscribe()
    }

    pub fn state(&self) -> EngineState {
        *self.state.lock().unwrap()
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub async fn current_index(&self) -> usize {
        self.session.lock().await.current_index
    }

    pub async fn playlist_len(&self) -> usize {
        self.session.lock().await.playlist.len()
    }

    fn set_state(&self, state: EngineState) {
        let mut current = self.state.lock().unwrap();
        // Disposed is terminal; a stale continuation never resurrects it
        if *current == EngineState::Disposed && state != EngineState::Disposed {
            return;
        }
        *current = state;
    }

    fn emit_error(&self, error: &Error) {
        self.bus
            .emit_lossy(PlayerEvent::error(error.to_string(), error.is_recoverable()));
    }

    /// Start playback of `tracks` at `start_index`.
    ///
    /// Lazily opens the audio graph; a platform that gates audio start
    /// behind a user gesture surfaces `Error::PlaybackBlocked`, which the
    /// caller should treat as retryable.
    pub async fn play(&self, tracks: Vec<Track>, start_index: usize) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::Disposed);
        }
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
            session = %self.session_id,
            "Starting playback: {} tracks from index {}",
            tracks.len(),
            start_index
        );
        self.set_state(EngineState::Loading);

        if let Err(e) = self.graph.open().await {
            self.set_state(EngineState::Idle);
            return Err(e);
        }
        self.apply_volume();

        // Replace any leftovers from an earlier play on this engine
        {
            let mut session = self.session.lock().await;
            session.generation += 1;
            self.teardown_slots(&mut session);
            session.playlist = tracks;
            session.current_index = start_index;
            session.next_index = start_index + 1;
            session.ended = false;
            session.underrun_reported = false;
        }
        self.crossfading.store(false, Ordering::Release);

        let track = {
            let session = self.session.lock().await;
            session.playlist[start_index].clone()
        };

        let slot = match self.load_slot(&track, start_index).await {
            Ok(slot) => slot,
            Err(e) => {
                self.set_state(EngineState::Idle);
                return Err(e);
            }
        };

        if self.is_disposed() {
            self.release_slot(&slot);
            return Err(Error::Disposed);
        }

        if let Err(e) = self
            .graph
            .set_gain(slot.gain, 1.0)
            .and_then(|_| self.graph.start_source(slot.source))
        {
            self.release_slot(&slot);
            self.set_state(EngineState::Idle);
            return Err(e);
        }

        {
            let mut session = self.session.lock().await;
            session.current = Some(slot);
        }

        self.playing.store(true, Ordering::Release);
        self.set_state(EngineState::Playing);
        self.bus
            .emit_lossy(PlayerEvent::track_changed(start_index, track));

        let mut monitor = self.monitor.lock().unwrap();
        if let Some(handle) = monitor.take() {
            handle.abort();
        }
        *monitor = Some(monitor::spawn(self.clone()));

        Ok(())
    }

    /// Pause the session; a no-op when already paused.
    pub async fn pause(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::Disposed);
        }
        if !self.playing.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        let session = self.session.lock().await;
        if let Some(slot) = &session.current {
            self.graph.pause_source(slot.source)?;
        }
        // Mid-crossfade the outgoing source is still audible; hold it too
        if let Some(slot) = &session.fading_out {
            self.graph.pause_source(slot.source)?;
        }
        debug!(session = %self.session_id, "Paused");
        Ok(())
    }

    /// Resume from the held position; a no-op when already playing.
    pub async fn resume(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::Disposed);
        }
        if self.is_playing() {
            return Ok(());
        }

        let session = self.session.lock().await;
        if let Some(slot) = &session.current {
            self.graph.start_source(slot.source)?;
            if let Some(out) = &session.fading_out {
                self.graph.start_source(out.source)?;
            }
            drop(session);
            self.playing.store(true, Ordering::Release);
            debug!(session = %self.session_id, "Resumed");
        }
        Ok(())
    }

    /// Advance to the next track with a fast swap. No-op at the last index.
    pub async fn skip_to_next(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::Disposed);
        }
        let mut session = self.session.lock().await;
        if session.current.is_none() || session.current_index + 1 >= session.playlist.len() {
            return Ok(());
        }
        let target = session.current_index + 1;
        self.fast_swap(&mut session, target).await
    }

    /// Restart the current track when more than 5 seconds have elapsed,
    /// otherwise move to the prior index. No-op at the first index.
    pub async fn skip_to_previous(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::Disposed);
        }
        let mut session = self.session.lock().await;
        let Some(slot) = session.current.as_ref() else {
            return Ok(());
        };

        let elapsed = self.graph.position(slot.source).unwrap_or_default();
        if elapsed > PREVIOUS_RESTART_THRESHOLD {
            self.graph.seek_source(slot.source, Duration::ZERO)?;
            debug!(session = %self.session_id, "Restarted current track");
            return Ok(());
        }

        if session.current_index == 0 {
            return Ok(());
        }
        let target = session.current_index - 1;
        self.fast_swap(&mut session, target).await
    }

    /// Set master volume, 0-100.
    pub fn set_volume(&self, volume: u32) -> Result<()> {
        {
            let mut control = self.volume.lock().unwrap();
            control.volume = (volume.min(100) as f32) / 100.0;
        }
        self.apply_volume();
        Ok(())
    }

    pub fn set_muted(&self, muted: bool) {
        self.volume.lock().unwrap().muted = muted;
        self.apply_volume();
    }

    pub fn toggle_mute(&self) {
        let muted = {
            let mut control = self.volume.lock().unwrap();
            control.muted = !control.muted;
            control.muted
        };
        debug!(session = %self.session_id, "Mute {}", if muted { "on" } else { "off" });
        self.apply_volume();
    }

    fn apply_volume(&self) {
        if !self.graph.is_open() {
            return;
        }
        let effective = self.volume.lock().unwrap().effective();
        if let Err(e) = self.graph.set_master_gain(effective) {
            warn!(session = %self.session_id, "Failed to apply volume: {}", e);
        }
    }

    /// Tear the session down: stop all sources, release every node, close
    /// the graph, cancel the monitor. Idempotent and safe from any state.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(session = %self.session_id, "Disposing playback session");

        if let Some(handle) = self.monitor.lock().unwrap().take() {
            handle.abort();
        }
        self.playing.store(false, Ordering::Release);
        self.crossfading.store(false, Ordering::Release);

        {
            let mut session = self.session.lock().await;
            session.generation += 1;
            self.teardown_slots(&mut session);
            session.playlist.clear();
            session.next_loading = false;
        }

        if let Err(e) = self.graph.close().await {
            warn!(session = %self.session_id, "Graph close failed during dispose: {}", e);
        }
        self.set_state(EngineState::Disposed);
    }

    // ----- internals -----

    /// Stop and release every slot the session still holds.
    fn teardown_slots(&self, session: &mut Session) {
        for slot in [
            session.current.take(),
            session.next.take(),
            session.fading_out.take(),
        ]
        .into_iter()
        .flatten()
        {
            self.release_slot(&slot);
        }
    }

    /// Stop a slot's source and release its nodes; teardown never fails.
    fn release_slot(&self, slot: &Slot) {
        let _ = self.graph.stop_source(slot.source);
        self.graph.release_source(slot.source);
        self.graph.release_gain(slot.gain);
    }

    /// Fetch, decode, and wire a track into a silent slot, retrying with
    /// linear backoff before surfacing a load failure.
    async fn load_slot(&self, track: &Track, index: usize) -> Result<Slot> {
        let retries = self.options.load_retries.max(1);
        let mut last_error: Option<Error> = None;

        for attempt in 1..=retries {
            if self.is_disposed() {
                return Err(Error::Disposed);
            }
            match self.graph.create_source(&track.url).await {
                Ok(source) => {
                    let gain = self.graph.create_gain_control()?;
                    self.graph.connect(source, gain)?;
                    self.graph.set_gain(gain, 0.0)?;
                    return Ok(Slot {
                        source,
                        gain,
                        track: track.clone(),
                        index,
                    });
                }
                Err(e) => {
                    if attempt < retries {
                        warn!(
                            session = %self.session_id,
                            "Track load failed (attempt {}/{}), retrying: {}",
                            attempt, retries, e
                        );
                        tokio::time::sleep(LOAD_RETRY_BACKOFF * attempt).await;
                    }
                    last_error = Some(e);
                }
            }
        }

        let reason = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown".into());
        Err(Error::Load {
            locator: track.url.clone(),
            reason,
        })
    }

    /// Non-crossfaded jump to `target`: stop current, load target, play.
    async fn fast_swap(&self, session: &mut Session, target: usize) -> Result<()> {
        // A skip interrupts any active crossfade outright
        if self.crossfading.swap(false, Ordering::AcqRel) {
            if let Some(out) = session.fading_out.take() {
                self.release_slot(&out);
            }
        }
        if let Some(next) = session.next.take() {
            self.release_slot(&next);
        }
        session.next_loading = false;
        session.generation += 1;

        let old = session.current.take();
        if let Some(slot) = &old {
            let _ = self.graph.stop_source(slot.source);
        }

        let track = session.playlist[target].clone();
        let slot = match self.load_slot(&track, target).await {
            Ok(slot) => slot,
            Err(e) => {
                // Keep the stopped slot installed so a retry can recover
                session.current = old;
                self.emit_error(&e);
                return Err(e);
            }
        };

        if self.is_disposed() {
            self.release_slot(&slot);
            if let Some(old_slot) = &old {
                self.release_slot(old_slot);
            }
            return Err(Error::Disposed);
        }

        if let Some(old_slot) = &old {
            self.release_slot(old_slot);
        }

        self.graph.set_gain(slot.gain, 1.0)?;
        self.graph.start_source(slot.source)?;

        session.current = Some(slot);
        session.current_index = target;
        session.next_index = target + 1;
        session.ended = false;
        session.underrun_reported = false;
        self.playing.store(true, Ordering::Release);
        self.set_state(EngineState::Playing);
        self.bus
            .emit_lossy(PlayerEvent::track_changed(target, track));
        debug!(session = %self.session_id, "Fast swap to track {}", target);
        Ok(())
    }

    /// Background preload of the track at `target` into the idle slot.
    async fn preload(&self, target: usize, track: Track, generation: u64) {
        debug!(session = %self.session_id, "Preloading track {}", target);
        match self.load_slot(&track, target).await {
            Ok(slot) => {
                if self.is_disposed() {
                    self.release_slot(&slot);
                    return;
                }
                let mut session = self.session.lock().await;
                if session.generation != generation || session.next_index != target {
                    // The session moved on while we were loading
                    self.release_slot(&slot);
                    return;
                }
                session.next = Some(slot);
                session.next_loading = false;
                if self.state() == EngineState::PreloadingNext {
                    self.set_state(EngineState::Playing);
                }
                debug!(session = %self.session_id, "Track {} preloaded", target);
            }
            Err(e) => {
                warn!(session = %self.session_id, "Preload of track {} failed: {}", target, e);
                self.emit_error(&e);
                if self.is_disposed() {
                    return;
                }
                let mut session = self.session.lock().await;
                if session.generation != generation {
                    return;
                }
                session.next_loading = false;
                // Skip past the failed entry; the next tick retries with the
                // following track or lets the playlist end after the current
                session.next_index = target + 1;
            }
        }
    }

    /// Begin the equal-power crossfade into the preloaded slot.
    ///
    /// The gain curves are pre-scheduled on the graph clock; after the
    /// adaptive duration elapses a deferred completion stops the outgoing
    /// source and finishes the slot swap.
    async fn begin_crossfade(&self, session: &mut Session) -> Result<()> {
        // Re-entrancy guard: triggers that fire mid-crossfade are ignored
        if self.crossfading.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let Some(incoming) = session.next.take() else {
            self.crossfading.store(false, Ordering::Release);
            return Ok(());
        };
        let (outgoing_gain, duration_ms) = match session.current.as_ref() {
            Some(outgoing) => (
                outgoing.gain,
                crossfade_duration_ms(
                    &outgoing.track,
                    &incoming.track,
                    self.options.duration_ms,
                    session.current_index,
                    incoming.index,
                    session.playlist.len(),
                ),
            ),
            None => {
                session.next = Some(incoming);
                self.crossfading.store(false, Ordering::Release);
                return Ok(());
            }
        };
        let duration = Duration::from_millis(duration_ms);

        let now = self.graph.now();
        let steps = self.options.fade_steps.max(1);
        let curve = self.options.fade_curve;
        let mut fade_out = Vec::with_capacity(steps as usize + 1);
        let mut fade_in = Vec::with_capacity(steps as usize + 1);
        for step in 0..=steps {
            let progress = step as f32 / steps as f32;
            let at = now + duration.mul_f64(step as f64 / steps as f64);
            fade_out.push(GainPoint {
                at,
                value: curve.fade_out(progress),
            });
            fade_in.push(GainPoint {
                at,
                value: curve.fade_in(progress),
            });
        }

        let started = self
            .graph
            .schedule_gain(outgoing_gain, fade_out)
            .and_then(|_| self.graph.schedule_gain(incoming.gain, fade_in))
            .and_then(|_| self.graph.start_source(incoming.source));
        if let Err(e) = started {
            // Roll the transition back; the session keeps playing the
            // current track and the preloaded slot stays usable
            let _ = self.graph.set_gain(outgoing_gain, 1.0);
            let _ = self.graph.set_gain(incoming.gain, 0.0);
            session.next = Some(incoming);
            self.crossfading.store(false, Ordering::Release);
            return Err(Error::Crossfade(e.to_string()));
        }

        info!(
            session = %self.session_id,
            "Crossfading into track {} over {}ms",
            incoming.index, duration_ms
        );

        let incoming_index = incoming.index;
        let incoming_track = incoming.track.clone();
        session.fading_out = session.current.replace(incoming);
        session.current_index = incoming_index;
        session.next_index = incoming_index + 1;
        session.underrun_reported = false;
        self.set_state(EngineState::Crossfading);
        self.bus
            .emit_lossy(PlayerEvent::track_changed(incoming_index, incoming_track));

        let engine = self.clone();
        let generation = session.generation;
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            engine.finish_crossfade(generation).await;
        });

        Ok(())
    }

    /// Deferred crossfade completion: stop and release the outgoing slot.
    async fn finish_crossfade(&self, generation: u64) {
        if self.is_disposed() {
            return;
        }
        let mut session = self.session.lock().await;
        if session.generation != generation {
            // A skip or dispose already tore the fade down
            return;
        }
        if let Some(outgoing) = session.fading_out.take() {
            self.release_slot(&outgoing);
        }
        self.crossfading.store(false, Ordering::Release);
        if self.state() == EngineState::Crossfading {
            self.set_state(EngineState::Playing);
        }
        debug!(session = %self.session_id, "Crossfade complete");
    }

    /// Straight swap into the preloaded slot, used when crossfading is
    /// disabled (zero duration) or after a buffering shortfall.
    async fn promote_next(&self, session: &mut Session) -> Result<()> {
        let Some(incoming) = session.next.take() else {
            return Ok(());
        };

        if let Some(old) = session.current.take() {
            self.release_slot(&old);
        }

        self.graph.set_gain(incoming.gain, 1.0)?;
        self.graph.start_source(incoming.source)?;

        let index = incoming.index;
        let track = incoming.track.clone();
        session.current = Some(incoming);
        session.current_index = index;
        session.next_index = index + 1;
        session.underrun_reported = false;
        self.set_state(EngineState::Playing);
        self.bus.emit_lossy(PlayerEvent::track_changed(index, track));
        Ok(())
    }

    /// One monitor tick: report progress and decide whether to trigger
    /// preload, crossfade, or end-of-track handling.
    async fn tick(&self) -> Result<()> {
        if self.is_disposed() || !self.is_playing() {
            return Ok(());
        }

        let mut session = self.session.lock().await;
        if session.ended {
            return Ok(());
        }
        let Some(current) = session.current.as_ref() else {
            return Ok(());
        };

        let source = current.source;
        let fallback = Duration::from_secs_f64(current.track.duration.max(0.0));
        let position = self.graph.position(source).unwrap_or_default();
        let duration = self.graph.duration(source).unwrap_or(fallback);

        self.bus.emit_lossy(PlayerEvent::progress(
            position.as_secs_f64(),
            duration.as_secs_f64(),
        ));

        if self.crossfading.load(Ordering::Acquire) {
            return Ok(());
        }

        let remaining = duration.saturating_sub(position);

        // Preload trigger
        if session.next.is_none()
            && !session.next_loading
            && session.next_index < session.playlist.len()
            && remaining <= self.options.preload_offset()
        {
            session.next_loading = true;
            let target = session.next_index;
            let track = session.playlist[target].clone();
            let generation = session.generation;
            self.set_state(EngineState::PreloadingNext);
            let engine = self.clone();
            tokio::spawn(async move {
                engine.preload(target, track, generation).await;
            });
        }

        if remaining.is_zero() {
            if session.next.is_some() {
                // Crossfading disabled, or a shortfall resolved: swap now
                return self.promote_next(&mut session).await;
            }
            if session.next_loading {
                // Buffering shortfall: the track ran out before its
                // successor finished loading. Surface it once and wait for
                // the load; promote_next picks it up on a later tick.
                if !session.underrun_reported {
                    session.underrun_reported = true;
                    warn!(session = %self.session_id, "Buffering shortfall at track end");
                    self.bus.emit_lossy(PlayerEvent::error(
                        "Buffering shortfall: next track is still loading",
                        true,
                    ));
                }
                return Ok(());
            }
            if session.next_index >= session.playlist.len() {
                // Natural end of the playlist
                session.ended = true;
                self.playing.store(false, Ordering::Release);
                let _ = self.graph.stop_source(source);
                self.set_state(EngineState::Ended);
                info!(session = %self.session_id, "Playlist ended");
                self.bus.emit_lossy(PlayerEvent::playlist_ended());
            }
            return Ok(());
        }

        // Crossfade trigger: next track ready and inside the start window
        if session.next.is_some()
            && self.options.duration_ms > 0
            && remaining <= self.options.trigger_threshold()
        {
            return self.begin_crossfade(&mut session).await;
        }

        Ok(())
    }
}
