//! Timeline Compositor
//!
//! The compositor owns the live span set and the declared total duration of
//! the global timeline. The scheduler is its only writer; the render side
//! only reads it (through [`Timeline::evaluate`] or its own evaluator).

use std::collections::BTreeMap;

use crate::animation::{Pose, PoseBlender};
use crate::clip::FrameTime;

use super::span::{Span, SpanId};

/// Sink for scheduled spans
pub trait TimelineCompositor {
    /// Add a span; a span with the same id is replaced
    fn add_span(&mut self, span: Span);

    /// Remove a span, returning it if it was live
    fn remove_span(&mut self, id: SpanId) -> Option<Span>;

    /// Look up a live span
    fn span(&self, id: SpanId) -> Option<&Span>;

    /// Look up a live span mutably
    fn span_mut(&mut self, id: SpanId) -> Option<&mut Span>;

    /// Ids of every live span, in insertion order
    fn span_ids(&self) -> Vec<SpanId>;

    /// Declared total duration of the timeline
    fn total_duration(&self) -> FrameTime;

    /// Change the declared total duration
    fn set_total_duration(&mut self, duration: FrameTime);

    /// Number of live spans
    fn span_count(&self) -> usize {
        self.span_ids().len()
    }

    /// Grow the declared duration to at least `duration`; never shrinks
    ///
    /// Returns `true` if the duration changed.
    fn ensure_total_duration(&mut self, duration: FrameTime) -> bool {
        if duration > self.total_duration() {
            self.set_total_duration(duration);
            true
        } else {
            false
        }
    }
}

/// In-memory compositor with a blend evaluator
#[derive(Debug, Default)]
pub struct Timeline {
    // SpanIds are handed out monotonically, so key order is insertion order
    spans: BTreeMap<SpanId, Span>,
    total_duration: FrameTime,
}

impl Timeline {
    /// Create an empty timeline
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Iterate over live spans
    pub fn spans(&self) -> impl Iterator<Item = &Span> {
        self.spans.values()
    }

    /// Sum of span weights at a time
    #[must_use]
    pub fn total_weight_at(&self, now: FrameTime) -> f32 {
        self.spans.values().map(|s| s.weight_at(now)).sum()
    }

    /// Blend every live span at `now` into a pose
    #[must_use]
    pub fn evaluate(&self, now: FrameTime) -> Pose {
        let mut blender = PoseBlender::new();

        for span in self.spans.values() {
            let weight = span.weight_at(now);
            if weight <= 0.0 {
                continue;
            }
            let Some(time) = span.sample_time(now) else {
                continue;
            };
            for channel in span.clip.channels() {
                if let Some(value) = channel.sample(time) {
                    blender.add(&channel.target, value, weight);
                }
            }
        }

        blender.finish()
    }
}

impl TimelineCompositor for Timeline {
    fn add_span(&mut self, span: Span) {
        self.spans.insert(span.id, span);
    }

    fn remove_span(&mut self, id: SpanId) -> Option<Span> {
        self.spans.remove(&id)
    }

    fn span(&self, id: SpanId) -> Option<&Span> {
        self.spans.get(&id)
    }

    fn span_mut(&mut self, id: SpanId) -> Option<&mut Span> {
        self.spans.get_mut(&id)
    }

    fn span_ids(&self) -> Vec<SpanId> {
        self.spans.keys().copied().collect()
    }

    fn total_duration(&self) -> FrameTime {
        self.total_duration
    }

    fn set_total_duration(&mut self, duration: FrameTime) {
        self.total_duration = duration;
    }

    fn span_count(&self) -> usize {
        self.spans.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::clip::{Channel, ChannelTarget, ChannelValue, Clip, Keyframe};

    fn jaw_clip(id: &str, value: f32) -> Arc<Clip> {
        Arc::new(Clip::new(id, 100.0).with_channel(Channel::new(
            ChannelTarget::morph("jaw_open"),
            vec![
                Keyframe::new(0.0, ChannelValue::Scalar(value)),
                Keyframe::new(100.0, ChannelValue::Scalar(value)),
            ],
        )))
    }

    #[test]
    fn test_add_remove() {
        let mut timeline = Timeline::new();
        timeline.add_span(Span::new(SpanId(1), jaw_clip("a", 1.0), 0.0));
        timeline.add_span(Span::new(SpanId(2), jaw_clip("b", 1.0), 0.0));
        assert_eq!(timeline.span_ids(), vec![SpanId(1), SpanId(2)]);

        assert!(timeline.remove_span(SpanId(1)).is_some());
        assert!(timeline.remove_span(SpanId(1)).is_none());
        assert_eq!(timeline.span_count(), 1);
    }

    #[test]
    fn test_ensure_total_duration_never_shrinks() {
        let mut timeline = Timeline::new();
        assert!(timeline.ensure_total_duration(500.0));
        assert!(!timeline.ensure_total_duration(100.0));
        assert!((timeline.total_duration() - 500.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_evaluate_crossfade_midpoint() {
        let mut timeline = Timeline::new();
        let mut outgoing = Span::new(SpanId(1), jaw_clip("open", 1.0), 0.0);
        outgoing.begin_ease_out(50.0, 20.0, crate::animation::EasingFunction::Linear);
        let incoming = Span::new(SpanId(2), jaw_clip("closed", 0.0), 50.0)
            .with_ease_in(20.0);
        timeline.add_span(outgoing);
        timeline.add_span(incoming);

        let pose = timeline.evaluate(60.0);
        let Some(ChannelValue::Scalar(v)) = pose.get(&ChannelTarget::morph("jaw_open")) else {
            panic!("expected jaw value");
        };
        // outgoing weight 0.5 at value 1.0, incoming weight 0.5 at value 0.0
        assert!((v - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_evaluate_empty_outside_spans() {
        let mut timeline = Timeline::new();
        timeline.add_span(Span::new(SpanId(1), jaw_clip("a", 1.0), 10.0));
        assert!(timeline.evaluate(5.0).is_empty());
        assert!(!timeline.evaluate(15.0).is_empty());
    }
}
