//! Playback Queue
//!
//! FIFO of pending playback requests. The scheduler owns the drain policy
//! (force, guard ticks, re-entrancy); the queue itself only keeps order.

use std::collections::VecDeque;

use crate::clip::ClipId;
use crate::composite::{CompositeOptions, PrimarySource};
use crate::state::PlaybackMode;

/// One pending playback request
#[derive(Clone, Debug)]
pub enum QueueEntry {
    /// Play a single clip
    Simple {
        /// Clip to play
        clip: ClipId,
        /// Loop or once
        mode: PlaybackMode,
    },
    /// Play a stitched composite track
    Composite {
        /// Lip-sync track setting the duration
        primary: PrimarySource,
        /// Category supplying fill clips
        fill_category: String,
        /// Weights and mode
        options: CompositeOptions,
    },
    /// Request speech, then play a full-weight composite
    Speak {
        /// Text handed to the speech backend
        text: String,
        /// Lip-sync track setting the duration
        primary: PrimarySource,
        /// Category supplying fill clips
        fill_category: String,
    },
}

impl QueueEntry {
    /// Short label for logs
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Simple { .. } => "simple",
            Self::Composite { .. } => "composite",
            Self::Speak { .. } => "speak",
        }
    }

    /// Clip driving the entry
    #[must_use]
    pub fn clip_id(&self) -> &ClipId {
        match self {
            Self::Simple { clip, .. } => clip,
            Self::Composite { primary, .. } | Self::Speak { primary, .. } => primary.id(),
        }
    }
}

/// FIFO of queue entries
#[derive(Clone, Debug, Default)]
pub struct PlaybackQueue {
    entries: VecDeque<QueueEntry>,
}

impl PlaybackQueue {
    /// Create an empty queue
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry; returns whether the queue was empty before
    pub fn push(&mut self, entry: QueueEntry) -> bool {
        let was_empty = self.entries.is_empty();
        self.entries.push_back(entry);
        was_empty
    }

    /// Replace everything with a single entry
    pub fn replace_with(&mut self, entry: QueueEntry) {
        self.entries.clear();
        self.entries.push_back(entry);
    }

    /// Take the oldest entry
    pub fn pop(&mut self) -> Option<QueueEntry> {
        self.entries.pop_front()
    }

    /// Drop every entry, returning how many were dropped
    pub fn clear(&mut self) -> usize {
        let dropped = self.entries.len();
        self.entries.clear();
        dropped
    }

    /// Number of pending entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is pending
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate oldest first
    pub fn iter(&self) -> impl Iterator<Item = &QueueEntry> {
        self.entries.iter()
    }
}
