//! Spans
//!
//! A [`Span`] places one clip instance on the global timeline. Its weight at
//! any time is the product of the base weight and up to three envelopes:
//!
//! ```text
//!   weight
//!     1 ┤     ┌──────────────────┐
//!       │    /                    \        ease_in   : fixed at creation
//!       │   /                      \       blend_out : fixed at creation
//!     0 ┼──┴────────────────────────┴──    ease_out  : retirement, set once
//!       start                      end
//! ```
//!
//! `end_time` is clip-local and may be shorter than the clip (truncation) or
//! longer (the final frame is held).

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::animation::EasingFunction;
use crate::clip::{Clip, FrameTime};

/// Span identifier, unique per compositor
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SpanId(pub u64);

impl std::fmt::Display for SpanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "span_{}", self.0)
    }
}

/// A retirement ease-out window, in clip-local time
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EaseOut {
    /// Local time the fade begins
    pub start: FrameTime,
    /// Local time the fade reaches zero (the span's truncated end)
    pub end: FrameTime,
    /// Fade curve
    pub easing: EasingFunction,
}

/// One timed placement of a clip
#[derive(Clone, Debug)]
pub struct Span {
    /// Identifier assigned by the scheduler
    pub id: SpanId,
    /// The placed clip (shared, never copied)
    pub clip: Arc<Clip>,
    /// Loop iteration this span belongs to
    pub cycle: u64,
    /// Global time at which clip-local time 0 plays
    pub start_offset: FrameTime,
    /// Base blend weight (0.0 to 1.0)
    pub weight: f32,
    /// Fade-in length at the start of the span
    pub ease_in: Option<FrameTime>,
    /// Crossfade length before `end_time` into the following segment
    pub blend_out: Option<FrameTime>,
    /// Curve used by `ease_in` and `blend_out`
    pub easing: EasingFunction,
    /// Clip-local end of the span
    pub end_time: FrameTime,
    ease_out: Option<EaseOut>,
}

impl Span {
    /// Create a full-weight span covering the whole clip
    pub fn new(id: SpanId, clip: Arc<Clip>, start_offset: FrameTime) -> Self {
        let end_time = clip.total_length;
        Self {
            id,
            clip,
            cycle: 0,
            start_offset,
            weight: 1.0,
            ease_in: None,
            blend_out: None,
            easing: EasingFunction::SmoothStep,
            end_time,
            ease_out: None,
        }
    }

    /// Set the cycle index
    #[must_use]
    pub fn with_cycle(mut self, cycle: u64) -> Self {
        self.cycle = cycle;
        self
    }

    /// Set the base weight
    #[must_use]
    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = weight.clamp(0.0, 1.0);
        self
    }

    /// Set the fade-in length (ignored when not positive)
    #[must_use]
    pub fn with_ease_in(mut self, length: FrameTime) -> Self {
        self.ease_in = (length > 0.0).then_some(length);
        self
    }

    /// Set the crossfade-out length (ignored when not positive)
    #[must_use]
    pub fn with_blend_out(mut self, length: FrameTime) -> Self {
        self.blend_out = (length > 0.0).then_some(length);
        self
    }

    /// Set the clip-local end time
    #[must_use]
    pub fn with_end_time(mut self, end_time: FrameTime) -> Self {
        self.end_time = end_time.max(0.0);
        self
    }

    /// Global time at which the span stops contributing
    #[must_use]
    pub fn global_end(&self) -> FrameTime {
        self.start_offset + self.end_time
    }

    /// Clip-local time for a global time (may be negative or past the end)
    #[must_use]
    pub fn local_time(&self, now: FrameTime) -> FrameTime {
        now - self.start_offset
    }

    /// Whether the span covers a global time
    #[must_use]
    pub fn is_active_at(&self, now: FrameTime) -> bool {
        let local = self.local_time(now);
        local >= 0.0 && local < self.end_time
    }

    /// Clip time to sample at a global time, `None` outside the span
    #[must_use]
    pub fn sample_time(&self, now: FrameTime) -> Option<FrameTime> {
        self.is_active_at(now)
            .then(|| self.local_time(now).min(self.clip.total_length))
    }

    /// The retirement ease-out, if one was attached
    #[must_use]
    pub fn ease_out(&self) -> Option<&EaseOut> {
        self.ease_out.as_ref()
    }

    /// Whether a retirement ease-out was attached
    #[must_use]
    pub fn is_easing_out(&self) -> bool {
        self.ease_out.is_some()
    }

    /// Cut the span short with a fade starting at `now`
    ///
    /// The end is truncated to `now + length` in local time, never extended.
    /// A span that already has an ease-out is left untouched and `false` is
    /// returned.
    pub fn begin_ease_out(
        &mut self,
        now: FrameTime,
        length: FrameTime,
        easing: EasingFunction,
    ) -> bool {
        if self.ease_out.is_some() {
            return false;
        }

        let local = self.local_time(now);
        let end = self.end_time.min(local + length.max(0.0)).max(0.0);
        let start = local.max(0.0).min(end);

        self.end_time = end;
        self.ease_out = Some(EaseOut { start, end, easing });
        true
    }

    /// Effective blend weight at a global time
    #[must_use]
    pub fn weight_at(&self, now: FrameTime) -> f32 {
        if !self.is_active_at(now) {
            return 0.0;
        }
        let local = self.local_time(now);
        let mut w = self.weight;

        if let Some(len) = self.ease_in {
            if local < len {
                w *= self.easing.apply((local / len) as f32);
            }
        }

        if let Some(len) = self.blend_out {
            let from = self.end_time - len;
            if local > from {
                w *= 1.0 - self.easing.apply(((local - from) / len) as f32);
            }
        }

        if let Some(ease) = self.ease_out {
            let len = ease.end - ease.start;
            if len > 0.0 && local > ease.start {
                w *= 1.0 - ease.easing.apply(((local - ease.start) / len) as f32);
            }
        }

        w
    }
}
