//! Playback Scheduler
//!
//! Decides which spans are live on the timeline at every tick: it starts
//! clips, keeps one cycle of lookahead queued for looping clips, retires old
//! cycles, crossfades clip changes, stitches composite speech tracks, and
//! drains the playback queue.
//!
//! # Design
//!
//! ```text
//!  host ──► play / transition_to / queue_* (async, may load clips)
//!                     │
//!                     ▼
//!  host ──► tick(now) ──► on_tick(now) ──► TickReport { directives }
//!                     │        (sync, never fails, never loads)
//!                     ▼
//!           apply directives: drain queue, return to idle,
//!           enter speaking hold, auto-switch
//! ```
//!
//! The scheduler is the only writer of its compositor. The render side reads
//! through [`PlaybackScheduler::compositor`] or [`PlaybackScheduler::evaluate`].
//!
//! Every entry point checks the [`DisposalHandle`] first, and every load is
//! re-checked after it resolves: a scheduler disposed mid-load discards the
//! loaded clip and adds nothing.
//!
//! # Lookahead
//!
//! Looping clips keep exactly one cycle queued ahead of the playing one. When
//! playback enters the newest cycle the next is added, and cycles older than
//! `retention_window` are dropped, so at most `retention_window` cycles are
//! live once playback is under way.

mod disposal;
mod dispatch;
mod playback;
mod tick;

pub use disposal::DisposalHandle;
pub use tick::{Directive, TickReport};

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::animation::{EasingFunction, Pose};
use crate::clip::{Clip, ClipId, ClipStore, FrameTime};
use crate::composite::{CompositeOptions, CompositeStitcher, PrimarySource};
use crate::config::{SchedulerConfig, MIN_RETENTION_WINDOW};
use crate::error::{Result, SchedulerError};
use crate::events::{EventSink, SchedulerEvent};
use crate::queue::PlaybackQueue;
use crate::state::{
    AssistantState, AudioSignal, ClipSelector, PlaybackMode, SilentAudio, StateBehavior,
    StateConfigError, StateTable,
};
use crate::timeline::{CycleBook, SpanId, Timeline, TimelineCompositor};

use playback::{ActivePlayback, AutoSwitch, PendingRetirement};

/// Tick-driven playback scheduler
pub struct PlaybackScheduler<C: TimelineCompositor = Timeline> {
    config: SchedulerConfig,
    compositor: C,
    store: Arc<ClipStore>,
    selector: Arc<dyn ClipSelector>,
    audio: Arc<dyn AudioSignal>,
    states: StateTable,
    stitcher: CompositeStitcher,
    rng: StdRng,
    events: EventSink,
    disposal: DisposalHandle,
    torn_down: bool,

    state: AssistantState,
    current: Option<ActivePlayback>,
    cycles: CycleBook,
    pending_retirement: Option<PendingRetirement>,
    next_span: u64,
    has_played: bool,
    last_tick: Option<FrameTime>,
    locomotion: [f32; 3],

    queue: PlaybackQueue,
    draining: bool,
    guard_ticks: u32,
}

impl<C: TimelineCompositor> PlaybackScheduler<C> {
    /// Create a scheduler writing to `compositor`
    ///
    /// A `retention_window` below [`MIN_RETENTION_WINDOW`] is raised to it.
    pub fn new(
        compositor: C,
        store: Arc<ClipStore>,
        selector: Arc<dyn ClipSelector>,
        mut config: SchedulerConfig,
    ) -> Self {
        if config.retention_window < MIN_RETENTION_WINDOW {
            warn!(
                configured = config.retention_window,
                minimum = MIN_RETENTION_WINDOW,
                "Retention window too small, raising it"
            );
            config.retention_window = MIN_RETENTION_WINDOW;
        }
        let stitcher = CompositeStitcher::new(config.transition_length, config.loop_blend.clone());
        Self {
            compositor,
            store,
            selector,
            audio: Arc::new(SilentAudio),
            states: StateTable::default(),
            stitcher,
            rng: StdRng::from_entropy(),
            events: EventSink::disconnected(),
            disposal: DisposalHandle::new(),
            torn_down: false,
            state: AssistantState::Idle,
            current: None,
            cycles: CycleBook::new(),
            pending_retirement: None,
            next_span: 0,
            has_played: false,
            last_tick: None,
            locomotion: [0.0; 3],
            queue: PlaybackQueue::new(),
            draining: false,
            guard_ticks: 0,
            config,
        }
    }

    /// Use a custom state table
    #[must_use]
    pub fn with_states(mut self, states: StateTable) -> Self {
        self.states = states;
        self
    }

    /// Use an audio signal for the speaking-hold decision
    #[must_use]
    pub fn with_audio(mut self, audio: Arc<dyn AudioSignal>) -> Self {
        self.audio = audio;
        self
    }

    /// Make composite stitching deterministic
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Open the event channel, replacing any previous receiver
    pub fn subscribe(&mut self) -> mpsc::Receiver<SchedulerEvent> {
        let (sink, rx) = EventSink::channel(self.config.event_buffer);
        self.events = sink;
        rx
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// The timeline being written
    #[must_use]
    pub fn compositor(&self) -> &C {
        &self.compositor
    }

    /// Current assistant state
    #[must_use]
    pub fn state(&self) -> AssistantState {
        self.state
    }

    /// Clip currently owning the cycle book
    #[must_use]
    pub fn current_clip(&self) -> Option<&ClipId> {
        self.current.as_ref().map(|p| &p.clip.id)
    }

    /// Tick time the current clip started
    #[must_use]
    pub fn animation_start(&self) -> Option<FrameTime> {
        self.current.as_ref().map(|p| p.animation_start)
    }

    /// Whether the current clip repeats
    #[must_use]
    pub fn is_looping(&self) -> bool {
        self.current.as_ref().is_some_and(|p| p.looping)
    }

    /// Live cycles of the current clip
    #[must_use]
    pub fn cycles(&self) -> &CycleBook {
        &self.cycles
    }

    /// Pending queue entries
    #[must_use]
    pub fn queue(&self) -> &PlaybackQueue {
        &self.queue
    }

    /// Tick time of the last tick (0 before the first)
    #[must_use]
    pub fn now(&self) -> FrameTime {
        self.last_tick.unwrap_or(0.0)
    }

    /// Accumulated root offset from finished positional clips
    #[must_use]
    pub fn locomotion_offset(&self) -> [f32; 3] {
        self.locomotion
    }

    /// Spans waiting for their deferred removal, and when it fires
    #[must_use]
    pub fn pending_retirement(&self) -> Option<(FrameTime, &[SpanId])> {
        self.pending_retirement
            .as_ref()
            .map(|p| (p.at, p.spans.as_slice()))
    }

    /// Handle that disposes this scheduler from anywhere
    #[must_use]
    pub fn disposal_handle(&self) -> DisposalHandle {
        self.disposal.clone()
    }

    /// Whether the scheduler has been disposed
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposal.is_disposed()
    }

    // ========================================================================
    // Playback API
    // ========================================================================

    /// Start the first clip: the intro if requested and available, else idle
    ///
    /// # Errors
    ///
    /// Returns the idle transition's error; a failed intro falls back to idle.
    pub async fn initialize(&mut self, play_intro: bool) -> Result<()> {
        if self.check_disposed() {
            return Err(SchedulerError::Disposed);
        }

        if play_intro {
            match self.transition_to(AssistantState::Intro, None, None).await {
                Ok(()) => return Ok(()),
                Err(SchedulerError::Disposed) => return Err(SchedulerError::Disposed),
                Err(e) => warn!(error = %e, "Intro unavailable, starting in idle"),
            }
        }
        self.transition_to(AssistantState::Idle, None, None).await
    }

    /// Switch state and start a clip for it
    ///
    /// The clip is `clip_override` if given, resolved through the selector's
    /// names and otherwise taken as a clip id, or else a random pick from the
    /// behavior's categories. On any error the current clip keeps running.
    ///
    /// # Errors
    ///
    /// `Config` when the state has no behavior or no selectable clip, `Load`
    /// when the clip fails to load, `Disposed` after disposal.
    pub async fn transition_to(
        &mut self,
        state: AssistantState,
        behavior_override: Option<StateBehavior>,
        clip_override: Option<ClipId>,
    ) -> Result<()> {
        if self.check_disposed() {
            return Err(SchedulerError::Disposed);
        }

        let behavior = match behavior_override {
            Some(behavior) => behavior,
            None => self
                .states
                .get(state)
                .inspect_err(|e| tracing::error!(state = %state, error = %e, "Transition aborted"))?
                .clone(),
        };

        let (category, clip_id) = match clip_override {
            Some(name) => {
                let id = self.selector.by_name(name.as_str()).unwrap_or_else(|| {
                    debug!(clip = %name, "Override not in catalog, using it as a clip id");
                    name
                });
                (behavior.categories.first().cloned(), id)
            }
            None => {
                let (category, id) = behavior
                    .categories
                    .iter()
                    .find_map(|c| self.selector.random_from(c).map(|id| (c.clone(), id)))
                    .ok_or_else(|| {
                        let e = StateConfigError::EmptyCategory(behavior.categories.clone());
                        tracing::error!(state = %state, error = %e, "Transition aborted");
                        e
                    })?;
                (Some(category), id)
            }
        };

        let clip = self.store.load(&clip_id).await?;
        if self.check_disposed() {
            debug!(clip = %clip_id, "Discarding load resolved after disposal");
            return Ok(());
        }

        let auto_switch = behavior
            .auto_switch_interval
            .zip(category)
            .map(|(interval, category)| AutoSwitch {
                category,
                interval,
                since: self.now(),
            });

        self.set_state(state);
        self.start_simple(clip, behavior.mode, behavior.positional, auto_switch)
    }

    /// Play a clip with the current state's playback mode
    ///
    /// # Errors
    ///
    /// `Load` or `InvalidClip` for a bad clip, `Disposed` after disposal.
    pub async fn play(&mut self, clip_id: &ClipId) -> Result<()> {
        let mode = self
            .states
            .get(self.state)
            .map_or(PlaybackMode::Loop, |b| b.mode);
        self.play_with(clip_id, mode).await
    }

    /// Play a clip with an explicit mode
    ///
    /// # Errors
    ///
    /// `Load` or `InvalidClip` for a bad clip, `Disposed` after disposal.
    pub async fn play_with(&mut self, clip_id: &ClipId, mode: PlaybackMode) -> Result<()> {
        if self.check_disposed() {
            return Err(SchedulerError::Disposed);
        }

        let clip = self.store.load(clip_id).await?;
        if self.check_disposed() {
            debug!(clip = %clip_id, "Discarding load resolved after disposal");
            return Ok(());
        }

        self.start_simple(clip, mode, false, None)
    }

    /// Play a primary clip's mouth shapes over body motion stitched from a
    /// fill category
    ///
    /// # Errors
    ///
    /// `Load` or `InvalidClip` for a bad primary or fill clip, `Config` when
    /// the fill category has no usable clips, `Disposed` after disposal.
    pub async fn play_composite(
        &mut self,
        primary: PrimarySource,
        fill_category: &str,
        options: CompositeOptions,
    ) -> Result<()> {
        if self.check_disposed() {
            return Err(SchedulerError::Disposed);
        }

        let primary = match primary {
            PrimarySource::Id(id) => self.store.load(&id).await?,
            PrimarySource::Inline(clip) => clip,
        };
        let fill_ids = self.selector.clips_in(fill_category);
        let pool = self.store.load_all(&fill_ids).await?;
        if self.check_disposed() {
            debug!(clip = %primary.id, "Discarding composite resolved after disposal");
            return Ok(());
        }

        validate_clip(&primary)?;
        let track = self.stitcher.build_track(&primary, &pool, &mut self.rng);
        if track.segments.is_empty() {
            return Err(StateConfigError::EmptyCategory(vec![fill_category.to_string()]).into());
        }

        info!(
            clip = %primary.id,
            segments = track.segments.len(),
            target = track.target_duration,
            "Stitched composite track"
        );

        self.set_state(AssistantState::Composite);
        let playback = ActivePlayback::composite(primary, track, options);
        self.start_playback(playback);
        Ok(())
    }

    /// Request speech and play it as a full-weight composite
    ///
    /// # Errors
    ///
    /// Same as [`PlaybackScheduler::play_composite`].
    pub async fn speak(
        &mut self,
        text: &str,
        primary: PrimarySource,
        fill_category: &str,
    ) -> Result<()> {
        if self.check_disposed() {
            return Err(SchedulerError::Disposed);
        }

        info!(clip = %primary.id(), chars = text.len(), "Speaking");
        self.events.emit(SchedulerEvent::SpeechRequested {
            text: text.to_string(),
        });
        self.play_composite(primary, fill_category, CompositeOptions::full_weight())
            .await
    }

    /// Dispose: remove every span, clear the queue and the clip cache
    ///
    /// Loads still in flight finish, but their results are discarded.
    pub fn dispose(&mut self) {
        self.disposal.dispose();
        self.check_disposed();
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Returns `true` when disposed, tearing down on first notice
    fn check_disposed(&mut self) -> bool {
        if !self.disposal.is_disposed() {
            return false;
        }
        if !self.torn_down {
            self.teardown();
        }
        true
    }

    fn teardown(&mut self) {
        self.torn_down = true;

        let ids = self.compositor.span_ids();
        for id in &ids {
            self.compositor.remove_span(*id);
        }
        self.cycles.drain_all();
        self.pending_retirement = None;
        self.current = None;
        let dropped = self.queue.clear();
        self.draining = false;
        self.store.clear();

        info!(spans = ids.len(), queued = dropped, "Scheduler disposed");
        self.events.emit(SchedulerEvent::Disposed);
    }

    fn set_state(&mut self, state: AssistantState) {
        if state == self.state {
            return;
        }
        let from = std::mem::replace(&mut self.state, state);
        info!(from = %from, to = %state, "State changed");
        self.events.emit(SchedulerEvent::StateChanged { from, to: state });
    }

    fn start_simple(
        &mut self,
        clip: Arc<Clip>,
        mode: PlaybackMode,
        positional: bool,
        auto_switch: Option<AutoSwitch>,
    ) -> Result<()> {
        validate_clip(&clip)?;
        let mut playback = ActivePlayback::simple(
            clip,
            mode,
            self.config.transition_length,
            &self.config.loop_blend,
        );
        playback.positional = positional;
        playback.auto_switch = auto_switch;
        self.start_playback(playback);
        Ok(())
    }

    /// Retire whatever is playing and make `playback` current
    fn start_playback(&mut self, mut playback: ActivePlayback) {
        let now = self.now();
        self.retire_current_spans(now);
        self.cycles.drain_all();

        playback.animation_start = now;
        playback.ease_first = self.has_played;
        if let Some(switch) = playback.auto_switch.as_mut() {
            switch.since = now;
        }
        self.has_played = true;

        let iterations = if playback.looping {
            f64::from(self.config.lookahead_iterations)
        } else {
            1.0
        };
        self.compositor.ensure_total_duration(
            now + iterations * playback.cycle_length + self.config.transition_length,
        );

        info!(
            clip = %playback.clip.id,
            at = now,
            looping = playback.looping,
            cycle_length = playback.cycle_length,
            "Clip started"
        );
        self.events.emit(SchedulerEvent::ClipStarted {
            clip: playback.clip.id.clone(),
            at: now,
            looping: playback.looping,
            composite: playback.is_composite(),
        });

        self.current = Some(playback);
        self.add_next_cycle();
    }

    /// Ease out every span that is not already easing out and schedule
    /// their removal at the latest resulting end
    ///
    /// Lookahead spans that have not started yet are removed outright.
    fn retire_current_spans(&mut self, now: FrameTime) {
        let transition = self.config.transition_length;
        let mut latest = now;
        let mut retiring = Vec::new();
        let mut unstarted = Vec::new();

        for id in self.compositor.span_ids() {
            let Some(span) = self.compositor.span_mut(id) else {
                continue;
            };
            if span.start_offset > now {
                unstarted.push(id);
            } else if span.begin_ease_out(now, transition, EasingFunction::SmoothStep) {
                latest = latest.max(span.global_end());
                retiring.push(id);
            }
        }

        if !unstarted.is_empty() {
            for id in &unstarted {
                self.compositor.remove_span(*id);
            }
            debug!(spans = unstarted.len(), "Dropped lookahead spans that never started");
            self.events.emit(SchedulerEvent::SpansRetired {
                spans: unstarted,
                at: now,
            });
        }
        if retiring.is_empty() {
            return;
        }
        debug!(spans = retiring.len(), until = latest, "Easing out current spans");
        self.pending_retirement
            .get_or_insert_with(PendingRetirement::default)
            .merge(latest, retiring);
    }

    /// Add the next cycle of the current clip; returns its index
    fn add_next_cycle(&mut self) -> Option<u64> {
        let Some(playback) = self.current.as_ref() else {
            let e = SchedulerError::Invariant("add_next_cycle with no current clip".into());
            tracing::error!(error = %e, "Skipping cycle");
            return None;
        };

        let cycle = self.cycles.next_cycle();
        let start = playback.cycle_start(cycle);
        let cycle_length = playback.cycle_length;
        let next_span = &mut self.next_span;
        let spans = playback.cycle_spans(cycle, self.config.transition_length, || {
            *next_span += 1;
            SpanId(*next_span)
        });

        let count = spans.len();
        let ids: Vec<SpanId> = spans.iter().map(|s| s.id).collect();
        let cycle_end = spans
            .iter()
            .map(crate::timeline::Span::global_end)
            .fold(start, f64::max);
        for span in spans {
            self.compositor.add_span(span);
        }
        self.cycles.push(ids);

        debug!(cycle, start, spans = count, "Cycle added");
        self.events.emit(SchedulerEvent::CycleAdded {
            cycle,
            start,
            spans: count,
        });

        let threshold = f64::from(self.config.extend_threshold_iterations) * cycle_length;
        let total = self.compositor.total_duration();
        if cycle_end > total - threshold {
            let extended = total.max(cycle_end)
                + f64::from(self.config.lookahead_iterations) * cycle_length;
            self.compositor.ensure_total_duration(extended);
            debug!(total = extended, "Extended timeline duration");
        }

        Some(cycle)
    }
}

impl PlaybackScheduler<Timeline> {
    /// Blend the timeline at `now` and apply the locomotion offset
    #[must_use]
    pub fn evaluate(&self, now: FrameTime) -> Pose {
        let mut pose = self.compositor.evaluate(now);
        if self.locomotion != [0.0; 3] {
            pose.translate_bone(&self.config.root_bone, self.locomotion);
        }
        pose
    }
}

fn validate_clip(clip: &Clip) -> Result<()> {
    if clip.is_playable() {
        Ok(())
    } else {
        Err(SchedulerError::InvalidClip {
            id: clip.id.clone(),
            length: clip.total_length,
        })
    }
}
