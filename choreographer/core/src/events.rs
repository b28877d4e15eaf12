//! Scheduler Events
//!
//! Outbound notifications from the scheduler. Each is emitted once, at the
//! point where the scheduler computes it, through a bounded channel. Sending
//! never blocks a tick: a full or closed channel drops the event.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::clip::{ClipId, FrameTime};
use crate::state::AssistantState;
use crate::timeline::SpanId;

/// Notifications emitted by the scheduler
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SchedulerEvent {
    // ============================================
    // State
    // ============================================
    /// The assistant state changed
    StateChanged {
        /// Previous state
        from: AssistantState,
        /// New state
        to: AssistantState,
    },

    // ============================================
    // Playback
    // ============================================
    /// A clip (or composite track) began playing
    ClipStarted {
        /// Clip driving playback
        clip: ClipId,
        /// Tick time playback started
        at: FrameTime,
        /// Whether it repeats
        looping: bool,
        /// Whether it is a stitched composite
        composite: bool,
    },

    /// A cycle's spans were added to the timeline
    CycleAdded {
        /// Cycle index
        cycle: u64,
        /// Global start of the cycle
        start: FrameTime,
        /// Number of spans added
        spans: usize,
    },

    /// An old cycle was dropped from the lookahead window
    CycleRetired {
        /// Cycle index
        cycle: u64,
    },

    /// Spans eased out by a clip change were removed
    SpansRetired {
        /// Removed spans
        spans: Vec<SpanId>,
        /// Tick time of removal
        at: FrameTime,
    },

    /// A queue entry was taken for playback
    QueueDrained {
        /// Entry kind (simple, composite, speak)
        kind: String,
        /// Clip driving the entry
        clip: ClipId,
        /// Entries still pending
        remaining: usize,
    },

    /// Speech should be produced for this text
    SpeechRequested {
        /// Text to speak
        text: String,
    },

    /// A positional clip finished and moved the character
    LocomotionOffsetResolved {
        /// Offset added by this clip
        delta: [f32; 3],
        /// Accumulated offset to apply to the root bone
        total: [f32; 3],
    },

    /// A load or playback step failed and was absorbed
    PlaybackFailed {
        /// Clip involved, when known
        clip: Option<ClipId>,
        /// Error text
        reason: String,
    },

    // ============================================
    // Lifecycle
    // ============================================
    /// The scheduler was disposed
    Disposed,
}

/// Non-blocking event sender
#[derive(Clone, Debug, Default)]
pub struct EventSink {
    tx: Option<mpsc::Sender<SchedulerEvent>>,
}

impl EventSink {
    /// Create a sink and its receiver
    #[must_use]
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<SchedulerEvent>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that discards everything
    #[must_use]
    pub fn disconnected() -> Self {
        Self::default()
    }

    /// Send an event without waiting
    pub fn emit(&self, event: SchedulerEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        if let Err(e) = tx.try_send(event) {
            tracing::debug!(error = %e, "Dropping scheduler event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_delivers_in_order() {
        let (sink, mut rx) = EventSink::channel(4);
        sink.emit(SchedulerEvent::CycleRetired { cycle: 0 });
        sink.emit(SchedulerEvent::Disposed);

        assert_eq!(rx.try_recv().ok(), Some(SchedulerEvent::CycleRetired { cycle: 0 }));
        assert_eq!(rx.try_recv().ok(), Some(SchedulerEvent::Disposed));
    }

    #[test]
    fn test_full_channel_drops_without_blocking() {
        let (sink, mut rx) = EventSink::channel(1);
        sink.emit(SchedulerEvent::Disposed);
        sink.emit(SchedulerEvent::CycleRetired { cycle: 7 });

        assert_eq!(rx.try_recv().ok(), Some(SchedulerEvent::Disposed));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_disconnected_sink_is_silent() {
        EventSink::disconnected().emit(SchedulerEvent::Disposed);
    }

    #[test]
    fn test_events_serialize_to_json() {
        let json = serde_json::to_string(&SchedulerEvent::SpeechRequested {
            text: "hi".into(),
        })
        .unwrap();
        assert_eq!(json, r#"{"SpeechRequested":{"text":"hi"}}"#);
    }
}
