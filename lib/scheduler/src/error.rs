//! Error types for the scheduler crate.

use std::fmt;
use tidemark_workflow::StoreError;

/// Errors from schedule parsing and sweep infrastructure.
///
/// A bad cron expression on one workflow never surfaces from a sweep;
/// it is logged, counted on the workflow, and the sweep moves on. Only
/// infrastructure failures abort a sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    /// The cron expression could not be parsed.
    InvalidCronExpression { expression: String, reason: String },
    /// The workflow or task lookup failed.
    Store(StoreError),
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCronExpression { expression, reason } => {
                write!(f, "invalid cron expression '{expression}': {reason}")
            }
            Self::Store(e) => write!(f, "sweep lookup failed: {e}"),
        }
    }
}

impl std::error::Error for ScheduleError {}

impl From<StoreError> for ScheduleError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}
