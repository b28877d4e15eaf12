//! Choreographer Core - Animation Timeline Compositor and Playback Scheduler
//!
//! This crate decides which motion clips an avatar rig plays, when, and how
//! they blend. It never renders: it keeps a timeline of weighted clip
//! placements ("spans") up to date from a tick, and the renderer samples it.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │  Host: state machine input, speech, render loop                  │
//! └──────────┬──────────────────────────────────────────┬────────────┘
//!            │ transition_to / play / queue_* / tick     │ evaluate
//!            ▼                                           ▼
//! ┌──────────────────────────────┐   spans   ┌────────────────────────┐
//! │      PlaybackScheduler       │ ────────► │   Timeline (compositor)│
//! │  ┌─────────┐ ┌────────────┐  │           └───────────┬────────────┘
//! │  │CycleBook│ │PlaybackQueue│ │                       │ Pose
//! │  └─────────┘ └────────────┘  │                       ▼
//! │  ┌──────────────────┐        │           ┌────────────────────────┐
//! │  │CompositeStitcher │        │           │  BlinkOverlay (after)  │
//! │  └──────────────────┘        │           └────────────────────────┘
//! └──────────┬───────────────────┘
//!            │ load (async, deduplicated)
//!            ▼
//! ┌──────────────────────────────┐
//! │  ClipStore ◄── ClipSource    │
//! └──────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`PlaybackScheduler`]: tick-driven scheduler, the only writer of the timeline
//! - [`Timeline`]: in-memory compositor and blend evaluator
//! - [`Span`]: one timed, weighted placement of a [`Clip`]
//! - [`CompositeStitcher`]: covers a lip-sync duration with body-motion clips
//! - [`BlinkOverlay`]: procedural override applied after the blend
//! - [`ClipStore`]: memoizing, deduplicating clip loader
//!
//! # Module Overview
//!
//! - [`clip`]: clip data, channel sampling, and the clip store
//! - [`animation`]: easing curves and pose blending
//! - [`timeline`]: spans, cycle bookkeeping, the compositor
//! - [`composite`]: the composite stitcher
//! - [`overlay`]: the blink overlay
//! - [`state`]: assistant states, behavior table, clip selection
//! - [`queue`]: the playback queue
//! - [`scheduler`]: the playback scheduler
//! - [`events`]: outbound notifications
//! - [`config`]: TOML and environment configuration
//! - [`error`]: scheduler error types

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod animation;
pub mod clip;
pub mod composite;
pub mod config;
pub mod error;
pub mod events;
pub mod overlay;
pub mod queue;
pub mod scheduler;
pub mod state;
pub mod timeline;

// Clip exports
pub use clip::{
    BoneProperty, Channel, ChannelTarget, ChannelValue, Clip, ClipId, ClipSource, ClipStore,
    FrameTime, Keyframe, LoadError, MemoryClipSource,
};

// Animation exports
pub use animation::{EasingFunction, Pose, PoseBlender};

// Timeline exports
pub use timeline::{CycleBook, EaseOut, Span, SpanId, Timeline, TimelineCompositor};

// Composite exports
pub use composite::{
    CompositeOptions, CompositeStitcher, LoopBlendPolicy, PrimarySource, StitchedSegment,
    StitchedTrack,
};

// Overlay exports
pub use overlay::{BlinkOverlay, BlinkSettings};

// State exports
pub use state::{
    AssistantState, AudioFlag, AudioSignal, CatalogEntry, ClipCatalog, ClipSelector,
    PlaybackMode, SilentAudio, StateBehavior, StateConfigError, StateTable,
};

// Scheduler exports
pub use error::SchedulerError;
pub use events::{EventSink, SchedulerEvent};
pub use queue::{PlaybackQueue, QueueEntry};
pub use scheduler::{Directive, DisposalHandle, PlaybackScheduler, TickReport};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ChoreographerConfig,
    ChoreographerToml, ConfigError, ConfigSource, SchedulerConfig, MIN_RETENTION_WINDOW,
};
