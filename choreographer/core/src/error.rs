//! Scheduler Errors
//!
//! Errors from explicit API calls (`play`, `transition_to`, `queue_*`). The
//! tick path never returns these; it logs and carries on.

use thiserror::Error;

use crate::clip::{ClipId, FrameTime, LoadError};
use crate::state::StateConfigError;

/// Errors returned by scheduler entry points
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The state table or catalog cannot serve the request
    #[error(transparent)]
    Config(#[from] StateConfigError),

    /// A clip failed to load
    #[error(transparent)]
    Load(#[from] LoadError),

    /// A loaded clip cannot be placed on the timeline
    #[error("clip '{id}' has unusable length {length}")]
    InvalidClip {
        /// Offending clip
        id: ClipId,
        /// Its declared length
        length: FrameTime,
    },

    /// The scheduler has been disposed
    #[error("scheduler disposed")]
    Disposed,

    /// Internal bookkeeping was inconsistent; the call did nothing
    #[error("scheduling invariant violated: {0}")]
    Invariant(String),
}

/// Result alias for scheduler calls
pub type Result<T> = std::result::Result<T, SchedulerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AssistantState;

    #[test]
    fn test_error_display() {
        let err = SchedulerError::from(LoadError::NotFound(ClipId::from("wave")));
        assert!(err.to_string().contains("wave"));

        let err = SchedulerError::from(StateConfigError::MissingBehavior(AssistantState::Busy));
        assert!(err.to_string().contains("busy"));

        let err = SchedulerError::InvalidClip {
            id: ClipId::from("broken"),
            length: 0.0,
        };
        assert_eq!(err.to_string(), "clip 'broken' has unusable length 0");
    }
}
