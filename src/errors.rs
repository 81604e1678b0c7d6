use std::time::Duration;
use thiserror::Error;

/// The closed set of failure kinds an [`Action`](crate::Action) can complete with.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionError {
    #[error("network request failed")]
    NetworkRequestFailure,

    #[error("not found")]
    NotFound,

    #[error("parsing failed")]
    ParsingFailure,

    #[error("transform failed")]
    TransformFailure,

    #[error("snapshot failed")]
    SnapshotFailure,
}

/// Success-or-failure result of an action.
pub type Outcome<T> = std::result::Result<T, ActionError>;

/// Converts a possibly-absent value into an [`Outcome`], failing with `error` on absence.
pub fn outcome_from_option<T>(value: Option<T>, error: ActionError) -> Outcome<T> {
    value.ok_or(error)
}

/// Failures reported by a [`Renderer`](crate::Renderer) or by the operation driving it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("JavaScript execution failed: {0}")]
    Script(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Renderer is already executing an operation")]
    Busy,

    #[error("Scheduler worker is no longer running")]
    WorkerGone,

    #[error("Browser launch failed: {0}")]
    Launch(String),
}

pub type Result<T> = std::result::Result<T, RenderError>;

// Every renderer-side failure surfaces to action chains as a network request failure.
impl From<RenderError> for ActionError {
    fn from(_: RenderError) -> Self {
        ActionError::NetworkRequestFailure
    }
}

impl RenderError {
    /// True for failures produced by the deadline or an explicit cancel.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, RenderError::Timeout(_) | RenderError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_option_uses_supplied_error_on_absence() {
        assert_eq!(outcome_from_option(Some(3), ActionError::NotFound), Ok(3));
        assert_eq!(
            outcome_from_option::<u8>(None, ActionError::ParsingFailure),
            Err(ActionError::ParsingFailure)
        );
    }

    #[test]
    fn render_errors_collapse_to_network_failure() {
        let timeout = RenderError::Timeout(Duration::from_secs(1));
        assert!(timeout.is_cancellation());
        assert_eq!(ActionError::from(timeout), ActionError::NetworkRequestFailure);
        assert_eq!(
            ActionError::from(RenderError::Script("boom".into())),
            ActionError::NetworkRequestFailure
        );
        assert!(!RenderError::Busy.is_cancellation());
    }
}
