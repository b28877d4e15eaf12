//! Per-tick evaluation
//!
//! [`PlaybackScheduler::on_tick`] is synchronous and cannot fail: anything
//! that needs a clip load is returned as a [`Directive`] for
//! [`PlaybackScheduler::tick`] to carry out after the decision pass.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clip::{ClipId, FrameTime};
use crate::error::SchedulerError;
use crate::events::SchedulerEvent;
use crate::state::AssistantState;
use crate::timeline::{SpanId, TimelineCompositor};

use super::PlaybackScheduler;

/// Upper bound on cycles added by one tick after a large time jump
const MAX_CYCLES_PER_TICK: usize = 64;

/// Follow-up work decided during a tick
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Directive {
    /// Play the next queue entry
    DrainQueue,
    /// A one-shot finished with nothing queued
    ReturnToIdle,
    /// A speech clip finished while audio is still playing
    EnterSpeakingHold,
    /// Swap to another clip of the current category
    AutoSwitch(ClipId),
}

/// What one tick observed and changed
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TickReport {
    /// Tick time
    pub now: FrameTime,
    /// Cycle containing `now`, if a clip is playing
    pub cycle: Option<u64>,
    /// Cycles added this tick
    pub added_cycles: Vec<u64>,
    /// Cycles retired this tick
    pub retired_cycles: Vec<u64>,
    /// Spans removed by a deferred retirement this tick
    pub removed_spans: Vec<SpanId>,
    /// Follow-up work, in order
    pub directives: Vec<Directive>,
    /// The scheduler is disposed and did nothing
    pub disposed: bool,
}

impl<C: TimelineCompositor> PlaybackScheduler<C> {
    /// Run one tick's decisions without loading anything
    ///
    /// Calling it twice with the same `now` adds no spans and removes
    /// nothing the first call did not.
    pub fn on_tick(&mut self, now: FrameTime) -> TickReport {
        let mut report = TickReport {
            now,
            ..TickReport::default()
        };
        if self.check_disposed() {
            report.disposed = true;
            return report;
        }
        if self.last_tick.is_some_and(|last| now < last) {
            warn!(now, last = self.now(), "Ignoring tick that goes back in time");
            return report;
        }

        let advanced = self.last_tick.map_or(true, |last| now > last);
        self.last_tick = Some(now);
        if advanced {
            self.guard_ticks = self.guard_ticks.saturating_sub(1);
        }

        self.fire_pending_retirement(now, &mut report);

        let Some(playback) = self.current.as_ref() else {
            if self.queue_ready() {
                report.directives.push(Directive::DrainQueue);
            }
            return report;
        };
        let current_cycle = playback.cycle_at(now);
        let looping = playback.looping;
        report.cycle = Some(current_cycle);

        if looping {
            self.fill_lookahead(current_cycle, &mut report);
        }
        self.decide_interrupt(now, current_cycle, &mut report);
        self.extend_if_needed(now);
        if looping {
            self.retire_old_cycles(current_cycle, &mut report);
        }
        if report.directives.is_empty() {
            self.check_auto_switch(now, current_cycle, &mut report);
        }

        report
    }

    /// Run [`PlaybackScheduler::on_tick`] and carry out its directives
    ///
    /// Directive failures are logged and reported as
    /// [`SchedulerEvent::PlaybackFailed`]; the current clip keeps playing.
    pub async fn tick(&mut self, now: FrameTime) -> TickReport {
        let report = self.on_tick(now);
        for directive in &report.directives {
            self.apply(directive).await;
        }
        report
    }

    async fn apply(&mut self, directive: &Directive) {
        let result = match directive {
            Directive::DrainQueue => self.drain().await,
            Directive::ReturnToIdle => self.transition_to(AssistantState::Idle, None, None).await,
            Directive::EnterSpeakingHold => {
                match self
                    .transition_to(AssistantState::SpeakingHold, None, None)
                    .await
                {
                    Err(SchedulerError::Config(e)) => {
                        warn!(error = %e, "No speaking hold available, returning to idle");
                        self.transition_to(AssistantState::Idle, None, None).await
                    }
                    other => other,
                }
            }
            Directive::AutoSwitch(clip) => self.switch_clip(clip).await,
        };

        match result {
            Ok(()) | Err(SchedulerError::Disposed) => {}
            Err(e) => {
                warn!(directive = ?directive, error = %e, "Tick follow-up failed");
                let clip = match directive {
                    Directive::AutoSwitch(clip) => Some(clip.clone()),
                    _ => None,
                };
                self.events.emit(SchedulerEvent::PlaybackFailed {
                    clip,
                    reason: e.to_string(),
                });
            }
        }
    }

    /// Replace the current looping clip, keeping its auto-switch policy
    async fn switch_clip(&mut self, clip_id: &ClipId) -> crate::error::Result<()> {
        let clip = self.store.load(clip_id).await?;
        if self.check_disposed() {
            return Ok(());
        }

        let Some(playback) = self.current.as_ref() else {
            return Err(SchedulerError::Invariant("auto-switch with no current clip".into()));
        };
        let positional = playback.positional;
        let auto_switch = playback.auto_switch.clone();

        info!(clip = %clip_id, state = %self.state, "Auto-switching clip");
        self.start_simple(clip, crate::state::PlaybackMode::Loop, positional, auto_switch)
    }

    fn queue_ready(&self) -> bool {
        !self.queue.is_empty() && !self.draining && self.guard_ticks == 0
    }

    fn fire_pending_retirement(&mut self, now: FrameTime, report: &mut TickReport) {
        if !self.pending_retirement.as_ref().is_some_and(|p| now >= p.at) {
            return;
        }
        let Some(pending) = self.pending_retirement.take() else {
            return;
        };

        let removed: Vec<SpanId> = pending
            .spans
            .into_iter()
            .filter(|id| self.compositor.remove_span(*id).is_some())
            .collect();
        if removed.is_empty() {
            return;
        }

        debug!(spans = removed.len(), now, "Retired eased-out spans");
        self.events.emit(SchedulerEvent::SpansRetired {
            spans: removed.clone(),
            at: now,
        });
        report.removed_spans = removed;
    }

    /// Keep one cycle queued beyond the playing one
    fn fill_lookahead(&mut self, current_cycle: u64, report: &mut TickReport) {
        while self
            .cycles
            .last_added()
            .map_or(true, |last| current_cycle >= last)
        {
            if report.added_cycles.len() >= MAX_CYCLES_PER_TICK {
                warn!(current_cycle, "Lookahead fell behind, continuing next tick");
                break;
            }
            match self.add_next_cycle() {
                Some(cycle) => report.added_cycles.push(cycle),
                None => break,
            }
        }
    }

    fn decide_interrupt(&mut self, now: FrameTime, current_cycle: u64, report: &mut TickReport) {
        let transition = self.config.transition_length;
        let queue_ready = self.queue_ready();
        let Some(playback) = self.current.as_mut() else {
            return;
        };

        if playback.looping {
            if current_cycle >= 1 && queue_ready {
                report.directives.push(Directive::DrainQueue);
            }
            return;
        }

        // A finished one-shot whose follow-up failed still hands over to
        // queued work
        if playback.auto_return_started {
            if queue_ready {
                report.directives.push(Directive::DrainQueue);
            }
            return;
        }

        let elapsed = now - playback.animation_start;
        if elapsed < playback.duration - transition {
            return;
        }
        playback.auto_return_started = true;

        let clip = std::sync::Arc::clone(&playback.clip);
        let positional = playback.positional;
        let composite = playback.is_composite();

        if positional {
            self.resolve_locomotion(&clip);
        }

        let directive = if !self.queue.is_empty() {
            Directive::DrainQueue
        } else if composite && self.audio.is_audio_active() {
            Directive::EnterSpeakingHold
        } else {
            Directive::ReturnToIdle
        };
        info!(clip = %clip.id, now, next = ?directive, "One-shot finishing");
        report.directives.push(directive);
    }

    fn resolve_locomotion(&mut self, clip: &crate::clip::Clip) {
        let Some(delta) = clip.root_displacement(&self.config.root_bone) else {
            debug!(clip = %clip.id, bone = %self.config.root_bone, "Positional clip has no root track");
            return;
        };
        for (total, d) in self.locomotion.iter_mut().zip(delta) {
            *total += d;
        }
        info!(clip = %clip.id, ?delta, total = ?self.locomotion, "Locomotion offset resolved");
        self.events.emit(SchedulerEvent::LocomotionOffsetResolved {
            delta,
            total: self.locomotion,
        });
    }

    /// Extend the declared duration when close to running out
    fn extend_if_needed(&mut self, now: FrameTime) {
        let Some(playback) = self.current.as_ref() else {
            return;
        };
        let cycle_length = playback.cycle_length;
        let total = self.compositor.total_duration();
        let threshold = f64::from(self.config.extend_threshold_iterations) * cycle_length;

        if total - now < threshold {
            let extended =
                total.max(now) + f64::from(self.config.lookahead_iterations) * cycle_length;
            self.compositor.ensure_total_duration(extended);
            debug!(now, total = extended, "Extended timeline duration");
        }
    }

    /// Drop cycles beyond the retention window, never the one just before
    /// the playing cycle
    fn retire_old_cycles(&mut self, current_cycle: u64, report: &mut TickReport) {
        let Some(last) = self.cycles.last_added() else {
            return;
        };
        let floor = (last + 1).saturating_sub(self.config.retention_window);
        let keep_from = floor.min(current_cycle.saturating_sub(1));

        for (cycle, spans) in self.cycles.retire_below(keep_from) {
            for id in spans {
                self.compositor.remove_span(id);
            }
            debug!(cycle, "Cycle retired");
            self.events.emit(SchedulerEvent::CycleRetired { cycle });
            report.retired_cycles.push(cycle);
        }
    }

    /// Swap to another clip of the category near a cycle boundary once the
    /// interval has elapsed
    fn check_auto_switch(&mut self, now: FrameTime, current_cycle: u64, report: &mut TickReport) {
        let window = self.config.auto_switch_window;
        let Some(playback) = self.current.as_mut() else {
            return;
        };
        if !playback.looping {
            return;
        }
        let to_boundary = playback.cycle_start(current_cycle + 1) - now;
        let Some(switch) = playback.auto_switch.as_mut() else {
            return;
        };
        if now - switch.since < switch.interval || to_boundary > window {
            return;
        }

        match self.selector.random_other(&switch.category, &playback.clip.id) {
            Some(next) => {
                switch.since = now;
                report.directives.push(Directive::AutoSwitch(next));
            }
            None => {
                debug!(category = %switch.category, "No alternative clip, auto-switch disabled");
                playback.auto_switch = None;
            }
        }
    }
}
