//! Motion Clips
//!
//! Immutable channel data for one loaded motion clip. The scheduler never
//! looks inside a clip beyond its length and identity; the compositor and
//! the overlay evaluator sample its channels.
//!
//! # Data Model
//!
//! ```text
//! Clip
//!  ├─ bone_channels:  Channel { Bone { bone, property }, [Keyframe] }
//!  └─ morph_channels: Channel { Morph { name },          [Keyframe] }
//! ```
//!
//! Keyframes are `(time, value)` pairs in clip-local frames, sorted by time,
//! and interpolated linearly by [`Channel::sample`].

pub mod store;

pub use store::{ClipSource, ClipStore, LoadError, MemoryClipSource};

use serde::{Deserialize, Serialize};

/// Clip time and timeline time are both measured in frames
pub type FrameTime = f64;

// ============================================================================
// Identifiers
// ============================================================================

/// Clip identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClipId(pub String);

impl ClipId {
    /// Create a new clip ID from a string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the string value
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClipId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ClipId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ClipId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// ============================================================================
// Channels
// ============================================================================

/// Which bone transform component a channel drives
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BoneProperty {
    /// Translation (Vec3)
    Position,
    /// Rotation (Quat, xyzw)
    Rotation,
    /// Scale (Vec3)
    Scale,
}

/// Output channel addressed by a track
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelTarget {
    /// A skeletal bone transform component
    Bone {
        /// Bone name
        bone: String,
        /// Transform component
        property: BoneProperty,
    },
    /// A morph target (blend shape) weight
    Morph {
        /// Morph target name
        name: String,
    },
}

impl ChannelTarget {
    /// Bone channel target
    pub fn bone(bone: impl Into<String>, property: BoneProperty) -> Self {
        Self::Bone {
            bone: bone.into(),
            property,
        }
    }

    /// Morph channel target
    pub fn morph(name: impl Into<String>) -> Self {
        Self::Morph { name: name.into() }
    }

    /// Whether this target is a bone transform
    #[must_use]
    pub fn is_bone(&self) -> bool {
        matches!(self, Self::Bone { .. })
    }
}

/// A sampled channel value
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum ChannelValue {
    /// Morph weight or any other scalar
    Scalar(f32),
    /// Position or scale
    Vec3([f32; 3]),
    /// Rotation quaternion (x, y, z, w)
    Quat([f32; 4]),
}

impl ChannelValue {
    /// Rest value of the same shape (zero vector, identity rotation)
    #[must_use]
    pub fn rest_like(&self) -> Self {
        match self {
            Self::Scalar(_) => Self::Scalar(0.0),
            Self::Vec3(_) => Self::Vec3([0.0; 3]),
            Self::Quat(_) => Self::Quat([0.0, 0.0, 0.0, 1.0]),
        }
    }

    /// Linear interpolation; quaternions use normalized lerp on the
    /// shortest arc. Mismatched shapes snap to `other` past the midpoint.
    #[must_use]
    pub fn lerp(&self, other: &Self, t: f32) -> Self {
        match (self, other) {
            (Self::Scalar(a), Self::Scalar(b)) => Self::Scalar(a + (b - a) * t),
            (Self::Vec3(a), Self::Vec3(b)) => Self::Vec3([
                a[0] + (b[0] - a[0]) * t,
                a[1] + (b[1] - a[1]) * t,
                a[2] + (b[2] - a[2]) * t,
            ]),
            (Self::Quat(a), Self::Quat(b)) => {
                let dot = a[0] * b[0] + a[1] * b[1] + a[2] * b[2] + a[3] * b[3];
                let sign = if dot < 0.0 { -1.0 } else { 1.0 };
                let mut q = [0.0; 4];
                for i in 0..4 {
                    q[i] = a[i] + (b[i] * sign - a[i]) * t;
                }
                Self::Quat(normalize_quat(q))
            }
            _ => {
                if t < 0.5 {
                    *self
                } else {
                    *other
                }
            }
        }
    }
}

pub(crate) fn normalize_quat(q: [f32; 4]) -> [f32; 4] {
    let len = (q[0] * q[0] + q[1] * q[1] + q[2] * q[2] + q[3] * q[3]).sqrt();
    if len <= f32::EPSILON {
        return [0.0, 0.0, 0.0, 1.0];
    }
    [q[0] / len, q[1] / len, q[2] / len, q[3] / len]
}

/// One keyframe
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Keyframe {
    /// Clip-local time in frames
    pub time: FrameTime,
    /// Value at that time
    pub value: ChannelValue,
}

impl Keyframe {
    /// Create a keyframe
    #[must_use]
    pub const fn new(time: FrameTime, value: ChannelValue) -> Self {
        Self { time, value }
    }
}

/// A keyframed track driving one output channel
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    /// Which output this track drives
    pub target: ChannelTarget,
    /// Keyframes sorted by time
    pub keyframes: Vec<Keyframe>,
}

impl Channel {
    /// Create a channel, sorting keyframes by time
    pub fn new(target: ChannelTarget, mut keyframes: Vec<Keyframe>) -> Self {
        keyframes.sort_by(|a, b| a.time.total_cmp(&b.time));
        Self { target, keyframes }
    }

    /// Sample the channel at a clip-local time
    ///
    /// Times before the first key hold the first value, times after the
    /// last key hold the last value. Returns `None` for an empty track.
    #[must_use]
    pub fn sample(&self, time: FrameTime) -> Option<ChannelValue> {
        let first = self.keyframes.first()?;
        if time <= first.time {
            return Some(first.value);
        }
        let last = self.keyframes.last()?;
        if time >= last.time {
            return Some(last.value);
        }

        // First key strictly after `time`; guaranteed in 1..len by the checks above
        let next_idx = self.keyframes.partition_point(|k| k.time <= time);
        let prev = &self.keyframes[next_idx - 1];
        let next = &self.keyframes[next_idx];

        let span = next.time - prev.time;
        let f = if span <= 0.0 {
            0.0
        } else {
            ((time - prev.time) / span) as f32
        };
        Some(prev.value.lerp(&next.value, f))
    }

    /// Value of the last keyframe
    #[must_use]
    pub fn last_value(&self) -> Option<ChannelValue> {
        self.keyframes.last().map(|k| k.value)
    }

    /// Value of the first keyframe
    #[must_use]
    pub fn first_value(&self) -> Option<ChannelValue> {
        self.keyframes.first().map(|k| k.value)
    }
}

// ============================================================================
// Clip
// ============================================================================

/// An immutable loaded motion clip
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Clip {
    /// Clip identifier
    pub id: ClipId,
    /// Total length in frames
    pub total_length: FrameTime,
    /// Bone position/rotation/scale tracks
    pub bone_channels: Vec<Channel>,
    /// Morph weight tracks
    pub morph_channels: Vec<Channel>,
}

impl Clip {
    /// Create an empty clip of the given length
    pub fn new(id: impl Into<ClipId>, total_length: FrameTime) -> Self {
        Self {
            id: id.into(),
            total_length,
            bone_channels: Vec::new(),
            morph_channels: Vec::new(),
        }
    }

    /// Add a channel, routing it to the bone or morph list by target
    #[must_use]
    pub fn with_channel(mut self, channel: Channel) -> Self {
        if channel.target.is_bone() {
            self.bone_channels.push(channel);
        } else {
            self.morph_channels.push(channel);
        }
        self
    }

    /// Whether the clip has a usable length
    #[must_use]
    pub fn is_playable(&self) -> bool {
        self.total_length.is_finite() && self.total_length > 0.0
    }

    /// All channels, bones first
    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.bone_channels.iter().chain(self.morph_channels.iter())
    }

    /// Copy of this clip with every bone channel stripped
    #[must_use]
    pub fn morph_only(&self, id: impl Into<ClipId>) -> Self {
        Self {
            id: id.into(),
            total_length: self.total_length,
            bone_channels: Vec::new(),
            morph_channels: self.morph_channels.clone(),
        }
    }

    /// Find the channel driving a target
    #[must_use]
    pub fn channel(&self, target: &ChannelTarget) -> Option<&Channel> {
        self.channels().find(|c| &c.target == target)
    }

    /// Root translation between the first and last frame of a bone's
    /// position track, `None` when the bone has no position track
    #[must_use]
    pub fn root_displacement(&self, bone: &str) -> Option<[f32; 3]> {
        let channel = self.channel(&ChannelTarget::bone(bone, BoneProperty::Position))?;
        match (channel.first_value()?, channel.last_value()?) {
            (ChannelValue::Vec3(a), ChannelValue::Vec3(b)) => {
                Some([b[0] - a[0], b[1] - a[1], b[2] - a[2]])
            }
            _ => None,
        }
    }
}
