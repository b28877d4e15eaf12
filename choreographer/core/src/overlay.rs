//! Procedural Overlay (blink)
//!
//! Runs after the primary blend for a frame. The overlay clip repeats on its
//! own clock, measured from the animation start:
//!
//! ```text
//! |<-- clip / speed -->|<-- delay -->|<-- clip / speed -->|<-- delay -->|
//!    overwrite channels   untouched     overwrite channels   untouched
//! ```
//!
//! While active it overwrites only the channels the overlay clip drives. It
//! never looks at spans, so it survives every clip change underneath.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::animation::Pose;
use crate::clip::{Clip, FrameTime};

/// Blink timing settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlinkSettings {
    /// Whether the overlay runs at all
    pub enabled: bool,
    /// Playback speed of the overlay clip (2.0 = twice as fast)
    pub speed_multiplier: f64,
    /// Frames of rest between overlay cycles
    pub inter_cycle_delay: FrameTime,
}

impl Default for BlinkSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            speed_multiplier: 1.0,
            inter_cycle_delay: 180.0,
        }
    }
}

/// Span-independent channel override
#[derive(Clone, Debug)]
pub struct BlinkOverlay {
    /// The overlay clip
    pub clip: Arc<Clip>,
    /// Playback speed of the overlay clip
    pub speed_multiplier: f64,
    /// Frames of rest between overlay cycles
    pub inter_cycle_delay: FrameTime,
    /// Whether the overlay runs
    pub enabled: bool,
}

impl BlinkOverlay {
    /// Create an overlay with default timing
    #[must_use]
    pub fn new(clip: Arc<Clip>) -> Self {
        Self::with_settings(clip, &BlinkSettings::default())
    }

    /// Create an overlay from settings
    #[must_use]
    pub fn with_settings(clip: Arc<Clip>, settings: &BlinkSettings) -> Self {
        Self {
            clip,
            speed_multiplier: settings.speed_multiplier,
            inter_cycle_delay: settings.inter_cycle_delay.max(0.0),
            enabled: settings.enabled,
        }
    }

    /// Wall-clock length of the active portion
    #[must_use]
    pub fn active_length(&self) -> FrameTime {
        self.clip.total_length / self.speed_multiplier
    }

    /// Length of one active portion plus its rest
    #[must_use]
    pub fn period(&self) -> FrameTime {
        self.active_length() + self.inter_cycle_delay
    }

    /// Overlay clip time for a frame, `None` while resting or disabled
    #[must_use]
    pub fn sample_time(&self, now: FrameTime, animation_start: FrameTime) -> Option<FrameTime> {
        if !self.enabled || !self.clip.is_playable() || self.speed_multiplier <= 0.0 {
            return None;
        }
        let elapsed = now - animation_start;
        if elapsed < 0.0 {
            return None;
        }

        let phase = elapsed.rem_euclid(self.period());
        (phase < self.active_length()).then(|| phase * self.speed_multiplier)
    }

    /// Overwrite the overlay's channels in `pose`
    ///
    /// Returns `true` if any channel was written.
    pub fn apply(&self, now: FrameTime, animation_start: FrameTime, pose: &mut Pose) -> bool {
        let Some(time) = self.sample_time(now, animation_start) else {
            return false;
        };

        let mut wrote = false;
        for channel in self.clip.channels() {
            if let Some(value) = channel.sample(time) {
                pose.overwrite(channel.target.clone(), value);
                wrote = true;
            }
        }
        wrote
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clip::{Channel, ChannelTarget, ChannelValue, Keyframe};

    fn blink_clip() -> Arc<Clip> {
        Arc::new(Clip::new("blink", 10.0).with_channel(Channel::new(
            ChannelTarget::morph("eyes_closed"),
            vec![
                Keyframe::new(0.0, ChannelValue::Scalar(0.0)),
                Keyframe::new(5.0, ChannelValue::Scalar(1.0)),
                Keyframe::new(10.0, ChannelValue::Scalar(0.0)),
            ],
        )))
    }

    fn overlay(speed: f64, delay: FrameTime) -> BlinkOverlay {
        BlinkOverlay::with_settings(
            blink_clip(),
            &BlinkSettings {
                enabled: true,
                speed_multiplier: speed,
                inter_cycle_delay: delay,
            },
        )
    }

    #[test]
    fn test_overwrites_during_active_portion() {
        let blink = overlay(1.0, 20.0);
        let mut pose = Pose::new();
        pose.overwrite(ChannelTarget::morph("eyes_closed"), ChannelValue::Scalar(0.3));
        pose.overwrite(ChannelTarget::morph("smile"), ChannelValue::Scalar(0.8));

        assert!(blink.apply(105.0, 100.0, &mut pose));
        assert_eq!(
            pose.get(&ChannelTarget::morph("eyes_closed")),
            Some(ChannelValue::Scalar(1.0))
        );
        // Channels the overlay does not drive are left alone
        assert_eq!(
            pose.get(&ChannelTarget::morph("smile")),
            Some(ChannelValue::Scalar(0.8))
        );
    }

    #[test]
    fn test_delay_portion_leaves_pose_untouched() {
        let blink = overlay(1.0, 20.0);
        let mut pose = Pose::new();
        pose.overwrite(ChannelTarget::morph("eyes_closed"), ChannelValue::Scalar(0.3));

        assert!(!blink.apply(115.0, 100.0, &mut pose));
        assert_eq!(
            pose.get(&ChannelTarget::morph("eyes_closed")),
            Some(ChannelValue::Scalar(0.3))
        );
    }

    #[test]
    fn test_cycle_repeats_after_delay() {
        let blink = overlay(1.0, 20.0);
        assert_eq!(blink.sample_time(30.0, 0.0), Some(0.0));
        assert_eq!(blink.sample_time(35.0, 0.0), Some(5.0));
        assert_eq!(blink.sample_time(45.0, 0.0), None);
    }

    #[test]
    fn test_speed_multiplier_scales_clip_time() {
        let blink = overlay(2.0, 10.0);
        assert!((blink.active_length() - 5.0).abs() < f64::EPSILON);
        assert!((blink.period() - 15.0).abs() < f64::EPSILON);
        assert_eq!(blink.sample_time(2.5, 0.0), Some(5.0));
        assert_eq!(blink.sample_time(7.0, 0.0), None);
    }

    #[test]
    fn test_disabled_or_before_start() {
        let mut blink = overlay(1.0, 20.0);
        assert_eq!(blink.sample_time(50.0, 100.0), None);

        blink.enabled = false;
        let mut pose = Pose::new();
        assert!(!blink.apply(102.0, 100.0, &mut pose));
        assert!(pose.is_empty());
    }
}
