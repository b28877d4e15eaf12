//! Composite Stitcher
//!
//! Builds body motion for speech: a primary clip (the lip-sync track) sets
//! the target duration, and fill clips drawn from a pool are laid end to
//! end until `[0, target)` is covered. Only the final segment is ever
//! truncated.
//!
//! # Placement
//!
//! ```text
//! cursor ─►  [ seg 0 ........ )                   first: starts at 0
//!                      [ seg 1 ........ )         advance = duration - overlap
//!                                 [ seg 2 ...... )  truncated to the target
//! ```
//!
//! The next clip is picked before the cursor moves. A segment shortens its
//! advance by the transition length when that clip is a different one, or
//! the same clip configured to blend its own loop point, so the pair
//! crossfades across the overlap. Back-to-back repeats of a seamless loop
//! cost nothing.
//! The advance is never less than [`MIN_ADVANCE`], so placement always
//! terminates.

use std::collections::HashMap;
use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::clip::{Clip, ClipId, FrameTime};
use crate::state::PlaybackMode;

/// Smallest cursor advance per segment, in frames
pub const MIN_ADVANCE: FrameTime = 1.0;

/// Suffix appended to the primary clip id for its morph-only overlay
pub const OVERLAY_SUFFIX: &str = "#morph";

// ============================================================================
// Options
// ============================================================================

/// Which clips crossfade into themselves at their loop point
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopBlendPolicy {
    /// Answer for clips without an override
    pub blend_by_default: bool,
    /// Per-clip answers
    pub overrides: HashMap<ClipId, bool>,
}

impl LoopBlendPolicy {
    /// Policy where every clip blends its loop point
    #[must_use]
    pub fn always() -> Self {
        Self {
            blend_by_default: true,
            overrides: HashMap::new(),
        }
    }

    /// Set one clip's answer
    #[must_use]
    pub fn with_override(mut self, clip: impl Into<ClipId>, blend: bool) -> Self {
        self.overrides.insert(clip.into(), blend);
        self
    }

    /// Whether a clip blends into its own next iteration
    #[must_use]
    pub fn blends_loop(&self, clip: &ClipId) -> bool {
        self.overrides
            .get(clip)
            .copied()
            .unwrap_or(self.blend_by_default)
    }
}

/// Options for composite playback
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompositeOptions {
    /// Base weight of body segments
    pub fill_weight: f32,
    /// Base weight of the mouth-shape overlay
    pub morph_weight: f32,
    /// Whether the stitched track repeats
    pub mode: PlaybackMode,
}

impl Default for CompositeOptions {
    fn default() -> Self {
        Self {
            fill_weight: 1.0,
            morph_weight: 1.0,
            mode: PlaybackMode::Once,
        }
    }
}

impl CompositeOptions {
    /// Full-weight, play-once options used for speech
    #[must_use]
    pub fn full_weight() -> Self {
        Self::default()
    }

    /// Set the body weight
    #[must_use]
    pub fn with_fill_weight(mut self, weight: f32) -> Self {
        self.fill_weight = weight.clamp(0.0, 1.0);
        self
    }

    /// Set the overlay weight
    #[must_use]
    pub fn with_morph_weight(mut self, weight: f32) -> Self {
        self.morph_weight = weight.clamp(0.0, 1.0);
        self
    }

    /// Set loop or once
    #[must_use]
    pub fn with_mode(mut self, mode: PlaybackMode) -> Self {
        self.mode = mode;
        self
    }
}

/// The primary (lip-sync) clip: by id, or already-loaded data
#[derive(Clone, Debug)]
pub enum PrimarySource {
    /// Load through the clip store
    Id(ClipId),
    /// Use this clip directly
    Inline(Arc<Clip>),
}

impl PrimarySource {
    /// Identifier of the primary clip
    #[must_use]
    pub fn id(&self) -> &ClipId {
        match self {
            Self::Id(id) => id,
            Self::Inline(clip) => &clip.id,
        }
    }
}

impl From<ClipId> for PrimarySource {
    fn from(id: ClipId) -> Self {
        Self::Id(id)
    }
}

impl From<Arc<Clip>> for PrimarySource {
    fn from(clip: Arc<Clip>) -> Self {
        Self::Inline(clip)
    }
}

// ============================================================================
// Segments
// ============================================================================

/// One placed fill clip
#[derive(Clone, Debug)]
pub struct StitchedSegment {
    /// The fill clip
    pub clip: Arc<Clip>,
    /// Placement start relative to the track start
    pub start_frame: FrameTime,
    /// Placed length (the clip length, or less for the truncated tail)
    pub duration: FrameTime,
    /// How far this segment moved the write cursor
    pub actual_duration: FrameTime,
    /// Whether the segment was cut to fit the target
    pub is_truncated: bool,
    /// Clip placed before this one
    pub previous_clip_id: Option<ClipId>,
    /// Fade-in length applied when the segment becomes a span
    pub ease_in: FrameTime,
    /// Crossfade length into the next segment
    pub blend_out: FrameTime,
}

impl StitchedSegment {
    /// Placement end relative to the track start
    #[must_use]
    pub fn end_frame(&self) -> FrameTime {
        self.start_frame + self.duration
    }
}

/// A stitched track ready to become spans
#[derive(Clone, Debug)]
pub struct StitchedTrack {
    /// Body segments in placement order
    pub segments: Vec<StitchedSegment>,
    /// Morph-only copy of the primary clip
    pub overlay: Arc<Clip>,
    /// Length of the primary clip
    pub target_duration: FrameTime,
}

impl StitchedTrack {
    /// End of the overlay span, one transition past the target
    #[must_use]
    pub fn overlay_end(&self, transition_length: FrameTime) -> FrameTime {
        self.target_duration + transition_length
    }
}

// ============================================================================
// Stitcher
// ============================================================================

/// Lays fill clips over a target duration
#[derive(Clone, Debug)]
pub struct CompositeStitcher {
    transition_length: FrameTime,
    loop_policy: LoopBlendPolicy,
}

impl CompositeStitcher {
    /// Create a stitcher
    #[must_use]
    pub fn new(transition_length: FrameTime, loop_policy: LoopBlendPolicy) -> Self {
        Self {
            transition_length: transition_length.max(0.0),
            loop_policy,
        }
    }

    /// Stitch a full track for a primary clip
    #[must_use]
    pub fn build_track<R: Rng + ?Sized>(
        &self,
        primary: &Clip,
        pool: &[Arc<Clip>],
        rng: &mut R,
    ) -> StitchedTrack {
        let segments = self.stitch(primary.total_length, pool, rng);
        let overlay_id = format!("{}{OVERLAY_SUFFIX}", primary.id);
        StitchedTrack {
            segments,
            overlay: Arc::new(primary.morph_only(overlay_id)),
            target_duration: primary.total_length,
        }
    }

    /// Cover `[0, target)` with clips drawn at random from `pool`
    ///
    /// Clips shorter than [`MIN_ADVANCE`] are skipped. An empty usable pool
    /// or a non-positive target yields no segments.
    #[must_use]
    pub fn stitch<R: Rng + ?Sized>(
        &self,
        target: FrameTime,
        pool: &[Arc<Clip>],
        rng: &mut R,
    ) -> Vec<StitchedSegment> {
        let usable: Vec<Arc<Clip>> = pool
            .iter()
            .filter(|c| c.is_playable() && c.total_length >= MIN_ADVANCE)
            .cloned()
            .collect();
        if usable.len() < pool.len() {
            tracing::debug!(
                skipped = pool.len() - usable.len(),
                "Skipping fill clips too short to stitch"
            );
        }

        self.stitch_with(target, || usable.choose(rng).cloned())
    }

    /// Cover `[0, target)` with clips from a picker, in the order picked
    ///
    /// Stops early if the picker runs dry.
    pub fn stitch_with(
        &self,
        target: FrameTime,
        mut pick: impl FnMut() -> Option<Arc<Clip>>,
    ) -> Vec<StitchedSegment> {
        let mut segments: Vec<StitchedSegment> = Vec::new();
        if target.is_nan() || target <= 0.0 {
            return segments;
        }

        let mut cursor = 0.0;
        let mut next = pick();
        while cursor < target {
            let Some(clip) = next.take() else {
                tracing::warn!(cursor, target, "Fill pool exhausted before target");
                break;
            };

            let remaining = target - cursor;
            let is_truncated = clip.total_length > remaining;
            let duration = if is_truncated {
                remaining
            } else {
                clip.total_length
            };

            // The follower decides whether this segment hands over with a crossfade
            let follower = if cursor + duration < target {
                pick()
            } else {
                None
            };
            let overlap = match &follower {
                None => 0.0,
                Some(f) if f.id != clip.id => self.transition_length,
                Some(_) if self.loop_policy.blends_loop(&clip.id) => self.transition_length,
                Some(_) => 0.0,
            };
            let actual_duration = (duration - overlap).max(MIN_ADVANCE).min(duration);

            let previous_clip_id = segments.last().map(|s| s.clip.id.clone());
            segments.push(StitchedSegment {
                clip,
                start_frame: cursor,
                duration,
                actual_duration,
                is_truncated,
                previous_clip_id,
                ease_in: 0.0,
                blend_out: 0.0,
            });

            if is_truncated {
                break;
            }
            cursor += actual_duration;
            next = follower;
        }

        self.assign_envelopes(&mut segments);
        segments
    }

    /// Crossfade wherever consecutive placements overlap, and always ease
    /// into a truncated segment
    fn assign_envelopes(&self, segments: &mut [StitchedSegment]) {
        for i in 1..segments.len() {
            let overlap = segments[i - 1].end_frame() - segments[i].start_frame;
            if overlap > 0.0 {
                segments[i - 1].blend_out = overlap;
                segments[i].ease_in = overlap;
            }
        }

        for segment in segments.iter_mut().filter(|s| s.is_truncated) {
            if segment.previous_clip_id.is_some() {
                let forced = self.transition_length.min(segment.duration);
                segment.ease_in = segment.ease_in.max(forced);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn clip(id: &str, length: FrameTime) -> Arc<Clip> {
        Arc::new(Clip::new(id, length))
    }

    fn picker(order: Vec<Arc<Clip>>) -> impl FnMut() -> Option<Arc<Clip>> {
        let mut iter = order.into_iter().cycle();
        move || iter.next()
    }

    fn assert_covers(segments: &[StitchedSegment], target: FrameTime) {
        assert!(!segments.is_empty());
        assert!(segments[0].start_frame.abs() < 1e-9);
        for pair in segments.windows(2) {
            assert!(
                pair[1].start_frame <= pair[0].end_frame() + 1e-9,
                "gap between {:?} and {:?}",
                pair[0].end_frame(),
                pair[1].start_frame
            );
        }
        let end = segments.last().unwrap().end_frame();
        assert!((end - target).abs() < 1e-9, "coverage ends at {end}, target {target}");
    }

    #[test]
    fn test_different_clips_overlap_reduces_advance() {
        let stitcher = CompositeStitcher::new(20.0, LoopBlendPolicy::default());
        let segments = stitcher.stitch_with(
            130.0,
            picker(vec![clip("a", 60.0), clip("b", 60.0), clip("c", 60.0)]),
        );

        let placed: Vec<(f64, f64, bool)> = segments
            .iter()
            .map(|s| (s.start_frame, s.duration, s.is_truncated))
            .collect();
        assert_eq!(
            placed,
            vec![(0.0, 60.0, false), (40.0, 60.0, false), (80.0, 50.0, true)]
        );
        assert!((segments[0].actual_duration - 40.0).abs() < 1e-9);
        assert_covers(&segments, 130.0);
    }

    #[test]
    fn test_every_clip_change_crossfades() {
        let stitcher = CompositeStitcher::new(20.0, LoopBlendPolicy::default());
        let order = vec![
            clip("a", 60.0),
            clip("a", 60.0),
            clip("b", 45.0),
            clip("c", 30.0),
            clip("c", 30.0),
            clip("a", 60.0),
        ];
        let segments = stitcher.stitch_with(250.0, picker(order));
        assert_covers(&segments, 250.0);

        for pair in segments.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            if prev.clip.id == next.clip.id {
                continue;
            }
            let overlap = prev.end_frame() - next.start_frame;
            assert!(
                overlap > 0.0,
                "{} -> {} at {} is a hard cut",
                prev.clip.id,
                next.clip.id,
                next.start_frame
            );
            assert!((prev.blend_out - overlap).abs() < 1e-9);
            assert!(next.ease_in >= overlap - 1e-9);
        }
    }

    #[test]
    fn test_seamless_repeat_is_back_to_back() {
        let stitcher = CompositeStitcher::new(20.0, LoopBlendPolicy::default());
        let segments = stitcher.stitch_with(130.0, picker(vec![clip("a", 60.0)]));

        let starts: Vec<f64> = segments.iter().map(|s| s.start_frame).collect();
        assert_eq!(starts, vec![0.0, 60.0, 120.0]);
        assert!(segments[2].is_truncated);
        assert!((segments[2].duration - 10.0).abs() < 1e-9);
        // No geometric overlap, but the forced cut still eases in
        assert!(segments[1].ease_in.abs() < 1e-9);
        assert!((segments[2].ease_in - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_blending_repeat_overlaps() {
        let stitcher = CompositeStitcher::new(20.0, LoopBlendPolicy::always());
        let segments = stitcher.stitch_with(130.0, picker(vec![clip("a", 60.0)]));

        let starts: Vec<f64> = segments.iter().map(|s| s.start_frame).collect();
        assert_eq!(starts, vec![0.0, 40.0, 80.0]);
        assert!((segments[0].blend_out - 20.0).abs() < 1e-9);
        assert!((segments[1].ease_in - 20.0).abs() < 1e-9);
        assert!((segments[1].blend_out - 20.0).abs() < 1e-9);
        assert!((segments[2].ease_in - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_short_clip_forces_minimum_advance() {
        let stitcher = CompositeStitcher::new(20.0, LoopBlendPolicy::default());
        let segments =
            stitcher.stitch_with(30.0, picker(vec![clip("tick", 5.0), clip("tock", 5.0)]));

        for s in &segments[..segments.len() - 1] {
            assert!(s.actual_duration >= MIN_ADVANCE);
        }
        assert_covers(&segments, 30.0);
    }

    #[test]
    fn test_exact_fit_is_not_truncated() {
        let stitcher = CompositeStitcher::new(20.0, LoopBlendPolicy::default());
        let segments = stitcher.stitch_with(60.0, picker(vec![clip("a", 60.0)]));
        assert_eq!(segments.len(), 1);
        assert!(!segments[0].is_truncated);
        assert_covers(&segments, 60.0);
    }

    #[test]
    fn test_random_pools_always_cover_target() {
        let stitcher = CompositeStitcher::new(12.0, LoopBlendPolicy::default().with_override("b", true));
        let pool = vec![clip("a", 45.0), clip("b", 80.0), clip("c", 13.0), clip("d", 3.0)];
        let mut rng = StdRng::seed_from_u64(42);

        for target in [1.0, 12.5, 60.0, 333.3, 1000.0] {
            let segments = stitcher.stitch(target, &pool, &mut rng);
            assert_covers(&segments, target);
            for s in &segments {
                assert!(s.duration <= s.clip.total_length + 1e-9);
            }
            assert!(segments.iter().filter(|s| s.is_truncated).count() <= 1);
        }
    }

    #[test]
    fn test_empty_pool_or_target() {
        let stitcher = CompositeStitcher::new(20.0, LoopBlendPolicy::default());
        let mut rng = StdRng::seed_from_u64(1);
        assert!(stitcher.stitch(100.0, &[], &mut rng).is_empty());
        assert!(stitcher.stitch(0.0, &[clip("a", 10.0)], &mut rng).is_empty());
        assert!(stitcher.stitch(100.0, &[clip("z", 0.5)], &mut rng).is_empty());
    }

    #[test]
    fn test_build_track_overlay() {
        use crate::clip::{Channel, ChannelTarget, ChannelValue, Keyframe, BoneProperty};

        let primary = Clip::new("line_01", 90.0)
            .with_channel(Channel::new(
                ChannelTarget::morph("viseme_aa"),
                vec![Keyframe::new(0.0, ChannelValue::Scalar(0.0))],
            ))
            .with_channel(Channel::new(
                ChannelTarget::bone("head", BoneProperty::Rotation),
                vec![Keyframe::new(0.0, ChannelValue::Quat([0.0, 0.0, 0.0, 1.0]))],
            ));
        let stitcher = CompositeStitcher::new(20.0, LoopBlendPolicy::default());
        let track = stitcher.build_track(&primary, &[clip("gesture", 50.0)], &mut StdRng::seed_from_u64(9));

        assert_eq!(track.overlay.id.as_str(), "line_01#morph");
        assert!(track.overlay.bone_channels.is_empty());
        assert_eq!(track.overlay.morph_channels.len(), 1);
        assert!((track.overlay_end(20.0) - 110.0).abs() < 1e-9);
        assert_covers(&track.segments, 90.0);
    }
}
