//! Track and playlist types
//!
//! A [`Track`] is produced by the music-generation pipeline and is read-only
//! to the playback subsystem: a playable source locator, a duration hint, and
//! optional genre/mood/tempo metadata consumed only by adaptive-fade timing.

use serde::{Deserialize, Serialize};

/// One piece of playable audio plus fade-shaping metadata.
///
/// Immutable once constructed. The locator in `url` is treated opaquely; it
/// may be an `http(s)` URL or a local file path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Playable source locator supplied by the generation pipeline
    pub url: String,

    /// Duration hint in seconds (the decoded duration takes precedence)
    pub duration: f64,

    /// Genre label, if the generation pipeline supplied one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,

    /// Mood label used for mood-transition fade bonuses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mood: Option<String>,

    /// Tempo in BPM used for tempo-difference fade bonuses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tempo: Option<f32>,
}

impl Track {
    /// Create a track with a locator and duration hint and no metadata.
    pub fn new(url: impl Into<String>, duration: f64) -> Self {
        Self {
            url: url.into(),
            duration,
            genre: None,
            mood: None,
            tempo: None,
        }
    }
}

/// Ordered sequence of tracks; insertion order is playback order.
///
/// An empty playlist is invalid for playback start, enforced by the engine.
pub type Playlist = Vec<Track>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_metadata_defaults_to_none() {
        let track = Track::new("https://cdn.example.com/t0.mp3", 180.0);
        assert!(track.genre.is_none());
        assert!(track.mood.is_none());
        assert!(track.tempo.is_none());
    }

    #[test]
    fn test_track_deserializes_without_metadata() {
        // The generation pipeline omits metadata fields it did not infer
        let track: Track =
            serde_json::from_str(r#"{"url":"file:///tmp/a.mp3","duration":42.5}"#).unwrap();
        assert_eq!(track.duration, 42.5);
        assert!(track.tempo.is_none());
    }
}
