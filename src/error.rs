//! Engine error types.

use thiserror::Error;

/// Errors from the state machine engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No node in the active ancestry declares a handler for the event.
    ///
    /// Raised before any hook runs, so the machine is left untouched.
    #[error("event not handled: no handler for '{event}' reachable from state '{state}'")]
    EventNotHandled { state: String, event: String },

    /// The chart is structurally malformed (definition-time error).
    #[error("invalid chart: {reason}")]
    InvalidChart { reason: String },
}

impl EngineError {
    pub(crate) fn invalid_chart(reason: impl Into<String>) -> Self {
        EngineError::InvalidChart {
            reason: reason.into(),
        }
    }
}
