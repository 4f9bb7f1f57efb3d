//! Crossfade and playback tunables
//!
//! All timing knobs of the engine live here with their defaults. Options can
//! be supplied per `play_playlist` call, or loaded once from a TOML file and
//! held by the arbiter.

use readwave_common::FadeCurve;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};

/// Crossfade and scheduling options for one playback session.
///
/// Unset fields fall back to their defaults, so a TOML file or caller only
/// needs to name the knobs it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossfadeOptions {
    /// Base crossfade duration in milliseconds, before adaptive adjustment.
    /// Zero disables crossfading (straight swaps at track end).
    pub duration_ms: u64,

    /// Time before track end at which the next track starts loading, seconds
    pub preload_offset_secs: f64,

    /// Safety margin added to the base duration when deciding the crossfade
    /// start instant, milliseconds. Deliberately a flat constant rather than
    /// scaling with the adaptive duration.
    pub trigger_margin_ms: u64,

    /// Number of discrete gain automation steps scheduled per fade
    pub fade_steps: u32,

    /// Fade curve pair used for the transition
    pub fade_curve: FadeCurve,

    /// Monitor tick interval, milliseconds. The tick only decides when to
    /// trigger preload/crossfade; the fade itself runs on the graph clock.
    pub tick_interval_ms: u64,

    /// Attempts per track load before the failure is surfaced
    pub load_retries: u32,
}

impl Default for CrossfadeOptions {
    fn default() -> Self {
        Self {
            duration_ms: 5_000,
            preload_offset_secs: 15.0,
            trigger_margin_ms: 1_000,
            fade_steps: 100,
            fade_curve: FadeCurve::default(),
            tick_interval_ms: 250,
            load_retries: 3,
        }
    }
}

impl CrossfadeOptions {
    /// Parse options from TOML text; unnamed fields keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load options from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn preload_offset(&self) -> Duration {
        Duration::from_secs_f64(self.preload_offset_secs.max(0.0))
    }

    /// Remaining-time threshold at which the crossfade is started once the
    /// next track is ready: base duration plus the flat trigger margin.
    pub fn trigger_threshold(&self) -> Duration {
        Duration::from_millis(self.duration_ms + self.trigger_margin_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = CrossfadeOptions::default();
        assert_eq!(opts.duration_ms, 5_000);
        assert_eq!(opts.preload_offset_secs, 15.0);
        assert_eq!(opts.trigger_margin_ms, 1_000);
        assert_eq!(opts.fade_steps, 100);
        assert_eq!(opts.fade_curve, FadeCurve::EqualPower);
    }

    #[test]
    fn test_partial_toml_overrides() {
        let opts = CrossfadeOptions::from_toml_str(
            r#"
            duration_ms = 6000
            fade_curve = "s_curve"
            "#,
        )
        .unwrap();

        assert_eq!(opts.duration_ms, 6_000);
        assert_eq!(opts.fade_curve, FadeCurve::SCurve);
        // Untouched knobs keep defaults
        assert_eq!(opts.preload_offset_secs, 15.0);
        assert_eq!(opts.load_retries, 3);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = CrossfadeOptions::from_toml_str("duration_ms = \"soon\"").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_trigger_threshold_uses_base_duration() {
        let opts = CrossfadeOptions {
            duration_ms: 5_000,
            trigger_margin_ms: 1_000,
            ..Default::default()
        };
        assert_eq!(opts.trigger_threshold(), Duration::from_millis(6_000));
    }
}
