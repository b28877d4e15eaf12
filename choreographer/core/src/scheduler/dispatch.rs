//! Queue entry points and draining

use tracing::{debug, info};

use crate::clip::ClipId;
use crate::composite::{CompositeOptions, PrimarySource};
use crate::error::{Result, SchedulerError};
use crate::events::SchedulerEvent;
use crate::queue::QueueEntry;
use crate::state::{AssistantState, PlaybackMode};
use crate::timeline::TimelineCompositor;

use super::PlaybackScheduler;

impl<C: TimelineCompositor> PlaybackScheduler<C> {
    /// Queue a single clip
    ///
    /// # Errors
    ///
    /// With `force`, the drained entry's playback error; `Disposed` after
    /// disposal.
    pub async fn queue_simple(&mut self, clip: ClipId, mode: PlaybackMode, force: bool) -> Result<()> {
        self.enqueue(QueueEntry::Simple { clip, mode }, force).await
    }

    /// Queue a composite track
    ///
    /// # Errors
    ///
    /// See [`PlaybackScheduler::queue_simple`].
    pub async fn queue_composite(
        &mut self,
        primary: PrimarySource,
        fill_category: &str,
        options: CompositeOptions,
        force: bool,
    ) -> Result<()> {
        let entry = QueueEntry::Composite {
            primary,
            fill_category: fill_category.to_string(),
            options,
        };
        self.enqueue(entry, force).await
    }

    /// Queue speech
    ///
    /// # Errors
    ///
    /// See [`PlaybackScheduler::queue_simple`].
    pub async fn queue_speak(
        &mut self,
        text: &str,
        primary: PrimarySource,
        fill_category: &str,
        force: bool,
    ) -> Result<()> {
        let entry = QueueEntry::Speak {
            text: text.to_string(),
            primary,
            fill_category: fill_category.to_string(),
        };
        self.enqueue(entry, force).await
    }

    /// Drop every pending entry; returns how many were dropped
    pub fn clear_queue(&mut self) -> usize {
        if self.check_disposed() {
            return 0;
        }
        let dropped = self.queue.clear();
        debug!(dropped, "Queue cleared");
        dropped
    }

    /// Add an entry to the queue
    ///
    /// With `force` the queue becomes just this entry and it plays now,
    /// interrupting current playback. Otherwise it is appended, and played
    /// right away only if the queue was empty, the state is idle and nothing
    /// is playing; a looping clip otherwise picks it up at a cycle boundary.
    ///
    /// # Errors
    ///
    /// With `force` or an immediate drain, the entry's playback error.
    /// `Disposed` after disposal.
    pub async fn enqueue(&mut self, entry: QueueEntry, force: bool) -> Result<()> {
        if self.check_disposed() {
            return Err(SchedulerError::Disposed);
        }

        info!(kind = entry.kind(), clip = %entry.clip_id(), force, "Queued");
        if force {
            self.queue.replace_with(entry);
            self.draining = false;
            self.guard_ticks = 0;
            return self.drain().await;
        }

        let was_empty = self.queue.push(entry);
        if was_empty
            && !self.draining
            && self.state == AssistantState::Idle
            && self.current.is_none()
        {
            return self.drain().await;
        }
        Ok(())
    }

    /// Play the oldest entry
    ///
    /// Ignored while another drain is in progress. Starts the guard window
    /// during which ticks do not look at the queue again.
    ///
    /// # Errors
    ///
    /// The entry's playback error.
    pub(super) async fn drain(&mut self) -> Result<()> {
        if self.draining {
            debug!("Drain already in progress");
            return Ok(());
        }
        let Some(entry) = self.queue.pop() else {
            return Ok(());
        };

        self.draining = true;
        self.guard_ticks = self.config.queue_guard_ticks;
        self.events.emit(SchedulerEvent::QueueDrained {
            kind: entry.kind().to_string(),
            clip: entry.clip_id().clone(),
            remaining: self.queue.len(),
        });

        let result = match entry {
            QueueEntry::Simple { clip, mode } => self.play_with(&clip, mode).await,
            QueueEntry::Composite {
                primary,
                fill_category,
                options,
            } => self.play_composite(primary, &fill_category, options).await,
            QueueEntry::Speak {
                text,
                primary,
                fill_category,
            } => self.speak(&text, primary, &fill_category).await,
        };

        self.draining = false;
        result
    }
}
