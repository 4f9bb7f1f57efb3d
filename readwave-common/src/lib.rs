//! # Readwave Common Library
//!
//! Shared data contract for the Readwave playback subsystem:
//! - Track and playlist types consumed from the music-generation pipeline
//! - Playback state snapshot and mode
//! - Event types (PlayerEvent enum) and the EventBus broadcast wrapper
//! - Fade curve definitions and calculations

pub mod events;
pub mod fade_curves;
pub mod track;

pub use events::{EventBus, PlaybackMode, PlaybackState, PlayerEvent};
pub use fade_curves::FadeCurve;
pub use track::{Playlist, Track};
