//! Active playback bookkeeping and cycle span construction

use std::sync::Arc;

use crate::clip::{Clip, FrameTime};
use crate::composite::{CompositeOptions, LoopBlendPolicy, StitchedTrack};
use crate::state::PlaybackMode;
use crate::timeline::{Span, SpanId};

/// What is driving the current playback
#[derive(Clone, Debug)]
pub(super) enum PlaybackKind {
    Simple,
    Composite {
        track: StitchedTrack,
        options: CompositeOptions,
    },
}

/// Periodic clip swap within a category
#[derive(Clone, Debug)]
pub(super) struct AutoSwitch {
    pub category: String,
    pub interval: FrameTime,
    /// When the current clip started or last switched
    pub since: FrameTime,
}

/// The clip currently owning the cycle book
#[derive(Clone, Debug)]
pub(super) struct ActivePlayback {
    pub clip: Arc<Clip>,
    pub kind: PlaybackKind,
    pub looping: bool,
    pub positional: bool,
    /// Consecutive cycles crossfade into each other
    pub blends_loop: bool,
    pub animation_start: FrameTime,
    pub duration: FrameTime,
    pub cycle_length: FrameTime,
    /// Cycle 0 eases in (false only for the very first clip ever played)
    pub ease_first: bool,
    pub auto_return_started: bool,
    pub auto_switch: Option<AutoSwitch>,
}

impl ActivePlayback {
    /// Single-clip playback
    pub fn simple(
        clip: Arc<Clip>,
        mode: PlaybackMode,
        transition_length: FrameTime,
        policy: &LoopBlendPolicy,
    ) -> Self {
        let looping = mode.is_loop();
        let duration = clip.total_length;
        let overlapped = duration - transition_length;
        let blends_loop =
            looping && transition_length > 0.0 && overlapped > 0.0 && policy.blends_loop(&clip.id);

        Self {
            looping,
            positional: false,
            blends_loop,
            animation_start: 0.0,
            duration,
            cycle_length: if blends_loop { overlapped } else { duration },
            ease_first: false,
            auto_return_started: false,
            auto_switch: None,
            kind: PlaybackKind::Simple,
            clip,
        }
    }

    /// Stitched playback under a primary clip
    pub fn composite(primary: Arc<Clip>, track: StitchedTrack, options: CompositeOptions) -> Self {
        let duration = track.target_duration;
        Self {
            looping: options.mode.is_loop(),
            positional: false,
            blends_loop: false,
            animation_start: 0.0,
            duration,
            cycle_length: duration,
            ease_first: false,
            auto_return_started: false,
            auto_switch: None,
            kind: PlaybackKind::Composite { track, options },
            clip: primary,
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self.kind, PlaybackKind::Composite { .. })
    }

    /// Cycle index containing `now` (0 before the start)
    pub fn cycle_at(&self, now: FrameTime) -> u64 {
        let elapsed = now - self.animation_start;
        if elapsed <= 0.0 || self.cycle_length <= 0.0 {
            return 0;
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let cycle = (elapsed / self.cycle_length).floor() as u64;
        cycle
    }

    /// Global start of a cycle
    pub fn cycle_start(&self, cycle: u64) -> FrameTime {
        #[allow(clippy::cast_precision_loss)]
        let index = cycle as f64;
        self.animation_start + index * self.cycle_length
    }

    /// Build every span realizing one cycle
    pub fn cycle_spans(
        &self,
        cycle: u64,
        transition_length: FrameTime,
        mut next_id: impl FnMut() -> SpanId,
    ) -> Vec<Span> {
        let start = self.cycle_start(cycle);
        let entry_ease = if cycle == 0 && self.ease_first {
            transition_length
        } else {
            0.0
        };

        match &self.kind {
            PlaybackKind::Simple => {
                let ease_in = if cycle > 0 && self.blends_loop {
                    transition_length
                } else {
                    entry_ease
                };
                let mut span = Span::new(next_id(), Arc::clone(&self.clip), start)
                    .with_cycle(cycle)
                    .with_ease_in(ease_in);
                if self.blends_loop {
                    span = span.with_blend_out(transition_length);
                }
                vec![span]
            }
            PlaybackKind::Composite { track, options } => {
                let mut spans = Vec::with_capacity(track.segments.len() + 1);
                let mut overlay_ease = entry_ease;

                for (i, segment) in track.segments.iter().enumerate() {
                    let mut ease_in = segment.ease_in;
                    if i == 0 {
                        ease_in = ease_in.max(entry_ease.min(segment.duration));
                        overlay_ease = ease_in;
                    }
                    spans.push(
                        Span::new(next_id(), Arc::clone(&segment.clip), start + segment.start_frame)
                            .with_end_time(segment.duration)
                            .with_cycle(cycle)
                            .with_weight(options.fill_weight)
                            .with_ease_in(ease_in)
                            .with_blend_out(segment.blend_out),
                    );
                }

                spans.push(
                    Span::new(next_id(), Arc::clone(&track.overlay), start)
                        .with_end_time(track.overlay_end(transition_length))
                        .with_cycle(cycle)
                        .with_weight(options.morph_weight)
                        .with_ease_in(overlay_ease)
                        .with_blend_out(transition_length),
                );
                spans
            }
        }
    }
}

/// Spans eased out by a clip change, removed once `at` is reached
#[derive(Clone, Debug, Default)]
pub(super) struct PendingRetirement {
    pub at: FrameTime,
    pub spans: Vec<SpanId>,
}

impl PendingRetirement {
    /// Fold another batch in; the later deadline wins
    pub fn merge(&mut self, at: FrameTime, spans: Vec<SpanId>) {
        self.at = self.at.max(at);
        self.spans.extend(spans);
    }
}
