//! Per-workflow execution rate limiting.
//!
//! Each workflow gets a trailing one-hour window of execution
//! timestamps. The check and the recording of a new execution happen
//! under one lock, so concurrent triggers can never overshoot the
//! bound. Dry runs count against the window like real runs.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tidemark_core::WorkflowId;

/// Executions allowed per workflow in the trailing window.
pub const MAX_EXECUTIONS_PER_HOUR: usize = 100;

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// The execution may proceed; `remaining` slots are left in the
    /// window after this one.
    Allowed { remaining: usize },
    /// The bound is hit; the oldest recorded execution leaves the
    /// window after `retry_after`.
    Limited { retry_after: Duration },
}

impl RateLimitDecision {
    /// Returns true when the execution may proceed.
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

/// A sliding-window limiter over execution start times.
///
/// State is in-process; each engine instance enforces the bound for
/// the executions it creates.
#[derive(Debug)]
pub struct ExecutionRateLimiter {
    windows: Mutex<HashMap<WorkflowId, VecDeque<DateTime<Utc>>>>,
    limit: usize,
    window: Duration,
}

impl ExecutionRateLimiter {
    /// Creates a limiter with the standard bound of
    /// [`MAX_EXECUTIONS_PER_HOUR`] per trailing hour.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limit(MAX_EXECUTIONS_PER_HOUR, Duration::hours(1))
    }

    /// Creates a limiter with an explicit bound, for tests and tuning.
    #[must_use]
    pub fn with_limit(limit: usize, window: Duration) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            limit,
            window,
        }
    }

    /// Checks the bound for `workflow_id` and, if allowed, records an
    /// execution at `now`. Check and record are a single atomic step.
    pub fn check_and_record(&self, workflow_id: WorkflowId, now: DateTime<Utc>) -> RateLimitDecision {
        let mut windows = match self.windows.lock() {
            Ok(guard) => guard,
            // A poisoned lock means a panic mid-update; the window data
            // is still structurally sound, so keep enforcing.
            Err(poisoned) => poisoned.into_inner(),
        };
        let window = windows.entry(workflow_id).or_default();

        let cutoff = now - self.window;
        while window.front().is_some_and(|t| *t <= cutoff) {
            window.pop_front();
        }

        if window.len() >= self.limit {
            let retry_after = window
                .front()
                .map(|oldest| (*oldest + self.window) - now)
                .unwrap_or_else(Duration::zero);
            return RateLimitDecision::Limited { retry_after };
        }

        window.push_back(now);
        RateLimitDecision::Allowed {
            remaining: self.limit - window.len(),
        }
    }

    /// Checks the bound without recording anything.
    #[must_use]
    pub fn check(&self, workflow_id: &WorkflowId, now: DateTime<Utc>) -> RateLimitDecision {
        let mut windows = match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(window) = windows.get_mut(workflow_id) else {
            return RateLimitDecision::Allowed {
                remaining: self.limit,
            };
        };

        let cutoff = now - self.window;
        while window.front().is_some_and(|t| *t <= cutoff) {
            window.pop_front();
        }

        if window.len() >= self.limit {
            let retry_after = window
                .front()
                .map(|oldest| (*oldest + self.window) - now)
                .unwrap_or_else(Duration::zero);
            RateLimitDecision::Limited { retry_after }
        } else {
            RateLimitDecision::Allowed {
                remaining: self.limit - window.len(),
            }
        }
    }

    /// Drops the window for a deleted workflow. Safe to call for
    /// workflows that never executed.
    pub fn forget(&self, workflow_id: &WorkflowId) {
        let mut windows = match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        windows.remove(workflow_id);
    }
}

impl Default for ExecutionRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
