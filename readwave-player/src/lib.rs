//! # Readwave Player (readwave-player)
//!
//! Gapless crossfade playback engine for reading-session music.
//!
//! **Purpose:** Turn the ordered tracks generated for a reading session into
//! one continuous listening experience: load and preload audio, schedule
//! equal-power crossfades adapted to the musical content, and guarantee that
//! exactly one playback session is ever active across the application.
//!
//! **Architecture:** A [`CrossfadeEngine`] owns one session (current/next
//! source slots over two gain paths) against an [`graph::AudioGraph`]
//! backend; the [`PlaybackArbiter`] is the single application entry point
//! that arbitrates engine lifecycles and republishes events to all UI
//! subscribers.

pub mod adaptive;
pub mod arbiter;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;

pub use arbiter::{Diagnostics, PlaybackArbiter};
pub use config::CrossfadeOptions;
pub use engine::CrossfadeEngine;
pub use error::{Error, Result};
