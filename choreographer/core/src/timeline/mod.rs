//! Global Timeline
//!
//! - [`span`]: one clip placement with its weight envelopes
//! - [`cycle`]: loop-iteration bookkeeping for the current clip
//! - [`compositor`]: the live span set and its blend evaluator

pub mod compositor;
pub mod cycle;
pub mod span;

pub use compositor::{Timeline, TimelineCompositor};
pub use cycle::CycleBook;
pub use span::{EaseOut, Span, SpanId};
