//! Fade curve implementations for crossfading
//!
//! Provides the fade curve types used when scheduling gain automation for a
//! track transition. The default for reading sessions is the equal-power
//! curve: perceived loudness stays constant through the overlap, unlike a
//! linear fade which dips in the middle.

use serde::{Deserialize, Serialize};
use std::f32::consts::FRAC_PI_2;

/// Fade curve types for crossfading
///
/// Each curve provides a different perceptual quality:
/// - Linear: constant rate of change (precise, predictable)
/// - Exponential: slow start, fast finish (natural-sounding fade-in)
/// - Logarithmic: fast start, slow finish (natural-sounding fade-out)
/// - SCurve: smooth acceleration and deceleration (gentle, musical)
/// - EqualPower: constant perceived loudness during crossfade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FadeCurve {
    /// v(t) = t
    Linear,

    /// v(t) = t²
    Exponential,

    /// v(t) = (1-t)² for fade-out
    Logarithmic,

    /// v(t) = 0.5 × (1 - cos(π × t))
    SCurve,

    /// v(t) = sin(t × π/2); fade-out counterpart cos(t × π/2).
    /// sin²+cos²=1 keeps combined power constant through the transition.
    EqualPower,
}

impl FadeCurve {
    /// Calculate the fade-in multiplier at a normalized position.
    ///
    /// `position` runs 0.0 (start of fade) to 1.0 (end of fade); the result
    /// runs 0.0 (silence) to 1.0 (full volume). Out-of-range positions are
    /// clamped.
    pub fn fade_in(&self, position: f32) -> f32 {
        let t = position.clamp(0.0, 1.0);

        match self {
            FadeCurve::Linear => t,
            FadeCurve::Exponential => t * t,
            // Logarithmic is a fade-out shape; inverted with sqrt for fade-in
            FadeCurve::Logarithmic => t.sqrt(),
            FadeCurve::SCurve => 0.5 * (1.0 - (std::f32::consts::PI * t).cos()),
            FadeCurve::EqualPower => (t * FRAC_PI_2).sin(),
        }
    }

    /// Calculate the fade-out multiplier at a normalized position.
    ///
    /// `position` runs 0.0 (start of fade-out) to 1.0 (end); the result runs
    /// 1.0 (full volume) to 0.0 (silence).
    pub fn fade_out(&self, position: f32) -> f32 {
        let t = position.clamp(0.0, 1.0);

        match self {
            FadeCurve::Linear => 1.0 - t,
            FadeCurve::Exponential => {
                let inv = 1.0 - t;
                inv * inv
            }
            FadeCurve::Logarithmic => {
                let inv = 1.0 - t;
                inv * inv
            }
            FadeCurve::SCurve => 0.5 * (1.0 + (std::f32::consts::PI * t).cos()),
            FadeCurve::EqualPower => (t * FRAC_PI_2).cos(),
        }
    }
}

impl Default for FadeCurve {
    /// Reading sessions default to equal-power so the handoff between
    /// generated tracks never dips audibly.
    fn default() -> Self {
        FadeCurve::EqualPower
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_endpoints() {
        let curve = FadeCurve::Linear;
        assert_eq!(curve.fade_in(0.0), 0.0);
        assert_eq!(curve.fade_in(1.0), 1.0);
        assert_eq!(curve.fade_out(0.0), 1.0);
        assert_eq!(curve.fade_out(1.0), 0.0);
    }

    #[test]
    fn test_exponential_fade_in_slow_start() {
        let curve = FadeCurve::Exponential;
        assert!((curve.fade_in(0.5) - 0.25).abs() < 0.001);
        assert!(curve.fade_in(0.3) < 0.3);
    }

    #[test]
    fn test_logarithmic_fade_out_fast_start() {
        let curve = FadeCurve::Logarithmic;
        assert!((curve.fade_out(0.5) - 0.25).abs() < 0.001);
        assert!(curve.fade_out(0.3) < 0.7);
    }

    #[test]
    fn test_scurve_symmetric_midpoint() {
        let curve = FadeCurve::SCurve;
        assert!((curve.fade_in(0.5) - 0.5).abs() < 0.001);
        assert!((curve.fade_out(0.5) - 0.5).abs() < 0.001);
    }

    #[test]
    fn test_equal_power_midpoint() {
        let curve = FadeCurve::EqualPower;
        // sin(π/4) = cos(π/4) ≈ 0.707
        assert!((curve.fade_in(0.5) - 0.707).abs() < 0.01);
        assert!((curve.fade_out(0.5) - 0.707).abs() < 0.01);
    }

    #[test]
    fn test_equal_power_constant_power() {
        // Across the whole 100-step scheduling grid:
        // fade_in(p)² + fade_out(p)² = 1
        let curve = FadeCurve::EqualPower;

        for i in 0..=100 {
            let p = i as f32 / 100.0;
            let fade_in = curve.fade_in(p);
            let fade_out = curve.fade_out(p);
            let sum_of_squares = fade_in * fade_in + fade_out * fade_out;

            assert!(
                (sum_of_squares - 1.0).abs() < 0.001,
                "power deviated at p={}: {}",
                p,
                sum_of_squares
            );
        }
    }

    #[test]
    fn test_clamping() {
        let curve = FadeCurve::Linear;
        assert_eq!(curve.fade_in(-0.5), 0.0);
        assert_eq!(curve.fade_in(1.5), 1.0);
        assert_eq!(curve.fade_out(-0.5), 1.0);
        assert_eq!(curve.fade_out(1.5), 0.0);
    }

    #[test]
    fn test_default_is_equal_power() {
        assert_eq!(FadeCurve::default(), FadeCurve::EqualPower);
    }
}
