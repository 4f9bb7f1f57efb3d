//! Event types for the Readwave playback subsystem
//!
//! Provides the shared event definitions and the EventBus used by both the
//! crossfade engine and the playback arbiter.
//!
//! # Architecture
//!
//! - **EventBus** (`tokio::broadcast`): one-to-many event fan-out. Both
//!   layers publish on a bus of their own; the arbiter subscribes to the
//!   engine's bus and republishes on its application-wide bus.
//! - **Subscription**: `subscribe()` returns a receiver; dropping the
//!   receiver is the unsubscribe.
//!
//! Events are serializable so UI surfaces can consume them as plain data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::track::Track;

/// Playback mode exposed in the state snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackMode {
    /// One standalone track
    #[default]
    Single,
    /// Ordered multi-track session with crossfaded transitions
    Playlist,
}

/// Application-wide playback state snapshot
///
/// Owned exclusively by the playback arbiter and mutated only through its
/// internal merge function. UI components are read-only observers.
///
/// Invariant: `current_track_index < playlist_length` whenever
/// `playlist_length > 0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackState {
    pub is_playing: bool,
    pub current_track_index: usize,
    /// Current position within the current track, seconds
    pub current_time: f64,
    /// Duration of the current track, seconds
    pub duration: f64,
    pub playlist_length: usize,
    pub mode: PlaybackMode,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            is_playing: false,
            current_track_index: 0,
            current_time: 0.0,
            duration: 0.0,
            playlist_length: 0,
            mode: PlaybackMode::Single,
        }
    }
}

impl PlaybackState {
    /// Whether a later track exists to advance to
    pub fn has_next(&self) -> bool {
        self.playlist_length > 0 && self.current_track_index < self.playlist_length - 1
    }

    /// Whether an earlier track exists to move back to
    pub fn has_previous(&self) -> bool {
        self.current_track_index > 0
    }
}

/// Readwave playback events
///
/// Broadcast via [`EventBus`] by the engine (session-scoped) and the arbiter
/// (application-wide). Serialized with a `type` tag so UI surfaces can
/// dispatch on the event kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PlayerEvent {
    /// The arbiter's state snapshot changed (structural change only;
    /// identical consecutive snapshots are not re-broadcast)
    StateChanged {
        state: PlaybackState,
        timestamp: DateTime<Utc>,
    },

    /// A different track became current (session start, crossfade, or skip)
    TrackChanged {
        index: usize,
        track: Track,
        timestamp: DateTime<Utc>,
    },

    /// Periodic position report for the current track
    Progress {
        /// Seconds into the current track
        position: f64,
        /// Current track duration in seconds
        duration: f64,
        timestamp: DateTime<Utc>,
    },

    /// The last track ended naturally with nothing left to advance to.
    /// Fires exactly once per playlist traversal.
    PlaylistEnded { timestamp: DateTime<Utc> },

    /// A playback failure surfaced on the error channel
    Error {
        message: String,
        /// Whether a user-initiated retry can recover (autoplay block,
        /// load failure, buffering shortfall)
        recoverable: bool,
        timestamp: DateTime<Utc>,
    },
}

impl PlayerEvent {
    pub fn state_changed(state: PlaybackState) -> Self {
        Self::StateChanged {
            state,
            timestamp: Utc::now(),
        }
    }

    pub fn track_changed(index: usize, track: Track) -> Self {
        Self::TrackChanged {
            index,
            track,
            timestamp: Utc::now(),
        }
    }

    pub fn progress(position: f64, duration: f64) -> Self {
        Self::Progress {
            position,
            duration,
            timestamp: Utc::now(),
        }
    }

    pub fn playlist_ended() -> Self {
        Self::PlaylistEnded {
            timestamp: Utc::now(),
        }
    }

    pub fn error(message: impl Into<String>, recoverable: bool) -> Self {
        Self::Error {
            message: message.into(),
            recoverable,
            timestamp: Utc::now(),
        }
    }
}

/// Multi-subscriber event broadcaster
///
/// Thin wrapper around `tokio::sync::broadcast` shared by both playback
/// layers. Slow subscribers may miss events (broadcast semantics); state
/// snapshots are always re-derivable from the arbiter.
pub struct EventBus {
    tx: broadcast::Sender<PlayerEvent>,
    capacity: usize,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.tx.subscribe()
    }

    /// Emit an event; returns the number of subscribers reached.
    ///
    /// Returns `Err` when no subscriber is listening, so callers can decide
    /// whether a dropped event matters.
    pub fn emit(
        &self,
        event: PlayerEvent,
    ) -> Result<usize, broadcast::error::SendError<PlayerEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring the no-subscribers case.
    ///
    /// Used for periodic progress ticks where a missed event is harmless.
    pub fn emit_lossy(&self, event: PlayerEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("Event dropped: no subscribers");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eventbus_new() {
        let bus = EventBus::new(100);
        assert_eq!(bus.capacity(), 100);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_eventbus_subscribe() {
        let bus = EventBus::new(100);
        let _rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        let _rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn test_eventbus_emit_no_subscribers() {
        let bus = EventBus::new(100);
        assert!(bus.emit(PlayerEvent::playlist_ended()).is_err());
    }

    #[tokio::test]
    async fn test_eventbus_emit_with_subscriber() {
        let bus = EventBus::new(100);
        let mut rx = bus.subscribe();

        let track = Track::new("https://cdn.example.com/t3.mp3", 120.0);
        bus.emit(PlayerEvent::track_changed(3, track)).unwrap();

        match rx.recv().await.unwrap() {
            PlayerEvent::TrackChanged { index, track, .. } => {
                assert_eq!(index, 3);
                assert_eq!(track.url, "https://cdn.example.com/t3.mp3");
            }
            other => panic!("Wrong event type received: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_eventbus_emit_lossy() {
        let bus = EventBus::new(100);
        // Should not panic even without subscribers
        bus.emit_lossy(PlayerEvent::progress(1.0, 60.0));
    }

    #[test]
    fn test_state_structural_equality() {
        let a = PlaybackState::default();
        let mut b = PlaybackState::default();
        assert_eq!(a, b);

        b.current_time = 0.25;
        assert_ne!(a, b);
    }

    #[test]
    fn test_state_navigation_predicates() {
        let state = PlaybackState {
            playlist_length: 3,
            current_track_index: 2,
            ..Default::default()
        };
        assert!(!state.has_next());
        assert!(state.has_previous());

        let empty = PlaybackState::default();
        assert!(!empty.has_next());
        assert!(!empty.has_previous());
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        // Events cross to the UI layer as tagged JSON
        let json = serde_json::to_string(&PlayerEvent::playlist_ended()).unwrap();
        assert!(json.contains(r#""type":"PlaylistEnded""#));
    }
}
