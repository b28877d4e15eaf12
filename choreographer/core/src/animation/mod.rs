//! Pose Blending
//!
//! The compositor samples every live span and feeds weighted samples into a
//! [`PoseBlender`]; the resulting [`Pose`] is what the renderer consumes and
//! what overlays overwrite afterwards.
//!
//! # Blend Rule
//!
//! Per channel, with summed weight `W`:
//! - `W > 1`: weights are normalized (plain weighted average)
//! - `W <= 1`: the remaining `1 - W` goes to the rest value (zero for
//!   scalars and vectors, identity for rotations), so a lone span easing in
//!   fades up from rest instead of popping to full strength

mod easing;

pub use easing::EasingFunction;

use std::collections::HashMap;

use crate::clip::{normalize_quat, ChannelTarget, ChannelValue};

/// Final channel outputs for one frame
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Pose {
    values: HashMap<ChannelTarget, ChannelValue>,
}

impl Pose {
    /// Create an empty pose
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of a channel
    #[must_use]
    pub fn get(&self, target: &ChannelTarget) -> Option<ChannelValue> {
        self.values.get(target).copied()
    }

    /// Replace a channel's value unconditionally
    pub fn overwrite(&mut self, target: ChannelTarget, value: ChannelValue) {
        self.values.insert(target, value);
    }

    /// Add a translation to a bone's position channel
    ///
    /// Returns `false` when the pose has no position for that bone.
    pub fn translate_bone(&mut self, bone: &str, offset: [f32; 3]) -> bool {
        let target = ChannelTarget::bone(bone, crate::clip::BoneProperty::Position);
        match self.values.get_mut(&target) {
            Some(ChannelValue::Vec3(p)) => {
                p[0] += offset[0];
                p[1] += offset[1];
                p[2] += offset[2];
                true
            }
            _ => false,
        }
    }

    /// Number of channels with a value
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no channel has a value
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over all channel values
    pub fn iter(&self) -> impl Iterator<Item = (&ChannelTarget, &ChannelValue)> {
        self.values.iter()
    }
}

#[derive(Clone, Copy, Debug)]
struct Accumulator {
    sum: [f32; 4],
    weight: f32,
    shape: ChannelValue,
}

/// Weighted accumulation of channel samples
#[derive(Debug, Default)]
pub struct PoseBlender {
    channels: HashMap<ChannelTarget, Accumulator>,
}

impl PoseBlender {
    /// Create an empty blender
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one weighted sample; non-positive weights are ignored
    pub fn add(&mut self, target: &ChannelTarget, value: ChannelValue, weight: f32) {
        if weight <= 0.0 || !weight.is_finite() {
            return;
        }

        let acc = self
            .channels
            .entry(target.clone())
            .or_insert_with(|| Accumulator {
                sum: [0.0; 4],
                weight: 0.0,
                shape: value,
            });

        match value {
            ChannelValue::Scalar(v) => acc.sum[0] += v * weight,
            ChannelValue::Vec3(v) => {
                for i in 0..3 {
                    acc.sum[i] += v[i] * weight;
                }
            }
            ChannelValue::Quat(q) => {
                // Keep every contribution in the hemisphere of the running sum
                let dot = acc.sum[0] * q[0] + acc.sum[1] * q[1] + acc.sum[2] * q[2] + acc.sum[3] * q[3];
                let sign = if dot < 0.0 { -1.0 } else { 1.0 };
                for i in 0..4 {
                    acc.sum[i] += q[i] * weight * sign;
                }
            }
        }
        acc.weight += weight;
    }

    /// Resolve all channels into a pose
    #[must_use]
    pub fn finish(self) -> Pose {
        let values = self
            .channels
            .into_iter()
            .map(|(target, acc)| {
                let rest_share = (1.0 - acc.weight).max(0.0);
                let norm = acc.weight.max(1.0);
                let value = match acc.shape {
                    ChannelValue::Scalar(_) => ChannelValue::Scalar(acc.sum[0] / norm),
                    ChannelValue::Vec3(_) => ChannelValue::Vec3([
                        acc.sum[0] / norm,
                        acc.sum[1] / norm,
                        acc.sum[2] / norm,
                    ]),
                    ChannelValue::Quat(_) => {
                        let mut q = acc.sum;
                        if q[3] < 0.0 {
                            q = [-q[0], -q[1], -q[2], -q[3]];
                        }
                        q[3] += rest_share;
                        ChannelValue::Quat(normalize_quat(q))
                    }
                };
                (target, value)
            })
            .collect();

        Pose { values }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clip::BoneProperty;

    fn jaw() -> ChannelTarget {
        ChannelTarget::morph("jaw_open")
    }

    #[test]
    fn test_single_partial_weight_fades_from_rest() {
        let mut blender = PoseBlender::new();
        blender.add(&jaw(), ChannelValue::Scalar(1.0), 0.25);
        let pose = blender.finish();
        assert_eq!(pose.get(&jaw()), Some(ChannelValue::Scalar(0.25)));
    }

    #[test]
    fn test_overweight_is_normalized() {
        let mut blender = PoseBlender::new();
        blender.add(&jaw(), ChannelValue::Scalar(1.0), 1.0);
        blender.add(&jaw(), ChannelValue::Scalar(0.0), 1.0);
        let pose = blender.finish();
        assert_eq!(pose.get(&jaw()), Some(ChannelValue::Scalar(0.5)));
    }

    #[test]
    fn test_zero_weight_ignored() {
        let mut blender = PoseBlender::new();
        blender.add(&jaw(), ChannelValue::Scalar(1.0), 0.0);
        assert!(blender.finish().is_empty());
    }

    #[test]
    fn test_quat_blend_is_unit_length() {
        let head = ChannelTarget::bone("head", BoneProperty::Rotation);
        let mut blender = PoseBlender::new();
        blender.add(&head, ChannelValue::Quat([0.0, 0.0, 0.0, 1.0]), 0.6);
        blender.add(&head, ChannelValue::Quat([0.0, -0.707_106_8, 0.0, -0.707_106_8]), 0.6);
        let Some(ChannelValue::Quat(q)) = blender.finish().get(&head) else {
            panic!("expected rotation");
        };
        let len = q.iter().map(|c| c * c).sum::<f32>().sqrt();
        assert!((len - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_translate_bone() {
        let root = ChannelTarget::bone("root", BoneProperty::Position);
        let mut pose = Pose::new();
        pose.overwrite(root.clone(), ChannelValue::Vec3([1.0, 0.0, 0.0]));

        assert!(pose.translate_bone("root", [0.5, 0.0, 2.0]));
        assert_eq!(pose.get(&root), Some(ChannelValue::Vec3([1.5, 0.0, 2.0])));
        assert!(!pose.translate_bone("hips", [1.0, 1.0, 1.0]));
    }
}
