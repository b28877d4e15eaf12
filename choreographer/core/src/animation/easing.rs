//! Easing Curves
//!
//! Weight ramps for span ease-in and ease-out. Retiring spans always use
//! [`EasingFunction::SmoothStep`], the fixed S-curve.

use serde::{Deserialize, Serialize};

/// Easing functions for weight ramps
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EasingFunction {
    /// No easing (constant speed)
    Linear,

    /// S-curve `3t^2 - 2t^3`, slow start and end
    #[default]
    SmoothStep,

    /// Slow start, fast end
    EaseIn,

    /// Fast start, slow end
    EaseOut,

    /// Cubic ease in and out
    EaseInOutCubic,
}

impl EasingFunction {
    /// Map linear progress, clamped to [0, 1], onto the curve
    #[must_use]
    pub fn apply(self, t: f32) -> f32 {
        let t = t.clamp(0.0, 1.0);

        match self {
            Self::Linear => t,
            Self::SmoothStep => t * t * (3.0 - 2.0 * t),
            Self::EaseIn => t * t,
            Self::EaseOut => 1.0 - (1.0 - t).powi(2),
            Self::EaseInOutCubic => {
                if t < 0.5 {
                    4.0 * t * t * t
                } else {
                    1.0 - (-2.0 * t + 2.0).powi(3) / 2.0
                }
            }
        }
    }
}
