//! Error types for readwave-player
//!
//! Defines the playback error taxonomy using thiserror for clear error
//! propagation between the graph backend, the engine, and the arbiter.

use thiserror::Error;

/// Main error type for the playback subsystem
#[derive(Error, Debug)]
pub enum Error {
    /// Audio subsystem could not start (device missing, stream refused)
    #[error("Audio initialization error: {0}")]
    Initialization(String),

    /// Source fetch or decode failure for a specific track
    #[error("Failed to load track {locator}: {reason}")]
    Load { locator: String, reason: String },

    /// Platform refused autonomous playback start; recoverable by retrying
    /// after an explicit user gesture
    #[error("Playback blocked by platform: {0}")]
    PlaybackBlocked(String),

    /// Failure while starting the incoming source mid-transition
    #[error("Crossfade error: {0}")]
    Crossfade(String),

    /// Track index outside the current playlist bounds
    #[error("Track index {index} out of range for playlist of {len}")]
    IndexOutOfRange { index: usize, len: usize },

    /// Playback requested on an empty playlist
    #[error("Playlist is empty")]
    EmptyPlaylist,

    /// Audio graph node fault (unknown node, graph not open)
    #[error("Audio graph error: {0}")]
    Graph(String),

    /// Audio decoding errors
    #[error("Audio decode error: {0}")]
    Decode(String),

    /// Remote locator fetch errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation on a session that has already been disposed
    #[error("Playback session already disposed")]
    Disposed,

    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether a user-initiated retry can recover from this failure.
    ///
    /// Autoplay blocks and load failures present a retry affordance in the
    /// UI; the rest are hard faults.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::PlaybackBlocked(_) | Error::Load { .. } | Error::Http(_)
        )
    }
}

/// Convenience Result type using the playback Error
pub type Result<T> = std::result::Result<T, Error>;
