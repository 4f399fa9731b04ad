//! Execution records and the step trace.
//!
//! One `WorkflowExecution` row is written per graph walk, real or
//! dry-run. The trace is an ordered array of step records embedded in
//! the row, so retrieving a trace is a single read. Executions are
//! append-only audit artifacts: once terminal they are never mutated.

use crate::node::{NodeId, NodeKind};
use crate::trigger::TriggerType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tidemark_core::{EventId, ExecutionId, WorkflowId};

/// The overall state of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Created, not yet walking.
    Queued,
    /// The graph walk is in progress.
    Running,
    /// The walk terminated; failed branches do not prevent this.
    Completed,
    /// An unrecoverable engine error aborted the walk.
    Failed,
    /// Cancelled externally between node visits.
    Cancelled,
}

impl ExecutionStatus {
    /// Returns true if this is a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// The outcome of a single visited node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// The node ran and succeeded (or its condition held).
    Passed,
    /// The node ran and failed (or its condition did not hold).
    Failed,
    /// The node was never run (upstream failure, untaken branch, or
    /// cancellation).
    Skipped,
}

/// What caused an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum TriggeredBy {
    /// A domain event, identified by its event id.
    Event { event_id: EventId },
    /// A scheduler sweep (due-date or custom schedule).
    Schedule,
    /// A user-initiated run (including dry-run tests).
    Manual,
}

/// An agent node's suggestion artifact.
///
/// Suggestions are advisory: the engine appends them to the trace and
/// never applies them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    /// Short human-readable summary.
    pub summary: String,
    /// Structured suggestion payload for the review UI.
    #[serde(default)]
    pub detail: JsonValue,
}

/// Structured result payload for a visited node.
///
/// This is a closed sum: agent nodes produce `Suggested` and the type
/// system keeps them from ever producing `Applied`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepResult {
    /// A condition evaluation, with the detail needed to audit it.
    Matched {
        field: String,
        expected: JsonValue,
        actual: Option<JsonValue>,
        satisfied: bool,
    },
    /// A dry-run action: what would have happened.
    Simulated {
        action_type: String,
        parameters: JsonValue,
    },
    /// An agent node's suggestion.
    Suggested { suggestion: Suggestion },
    /// A real action that was performed.
    Applied {
        action_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<JsonValue>,
    },
}

impl StepResult {
    /// Returns true for dry-run simulation results.
    #[must_use]
    pub fn is_simulated(&self) -> bool {
        matches!(self, Self::Simulated { .. })
    }
}

/// One entry of the execution trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStep {
    /// The visited node.
    pub node_id: NodeId,
    /// The node's kind.
    pub kind: NodeKind,
    /// Outcome of the visit.
    pub status: StepStatus,
    /// Structured result payload, when the node produced one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<StepResult>,
    /// Error message, for failed steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Step duration in milliseconds. Always 0 for dry-run steps so
    /// identical inputs produce identical traces.
    pub duration_ms: u64,
}

impl ExecutionStep {
    /// Creates a passed step.
    #[must_use]
    pub fn passed(node_id: NodeId, kind: NodeKind, result: Option<StepResult>) -> Self {
        Self {
            node_id,
            kind,
            status: StepStatus::Passed,
            result,
            error: None,
            duration_ms: 0,
        }
    }

    /// Creates a failed step.
    #[must_use]
    pub fn failed(
        node_id: NodeId,
        kind: NodeKind,
        result: Option<StepResult>,
        error: Option<String>,
    ) -> Self {
        Self {
            node_id,
            kind,
            status: StepStatus::Failed,
            result,
            error,
            duration_ms: 0,
        }
    }

    /// Creates a skipped step.
    #[must_use]
    pub fn skipped(node_id: NodeId, kind: NodeKind) -> Self {
        Self {
            node_id,
            kind,
            status: StepStatus::Skipped,
            result: None,
            error: None,
            duration_ms: 0,
        }
    }

    /// Sets the measured duration.
    #[must_use]
    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }
}

/// A record of one graph walk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecution {
    /// Unique identifier for this execution.
    pub id: ExecutionId,
    /// The workflow that was executed.
    pub workflow_id: WorkflowId,
    /// The trigger type that fired.
    pub trigger_type: TriggerType,
    /// What caused the execution.
    pub triggered_by: TriggeredBy,
    /// The event/task snapshot that caused execution.
    pub trigger_data: JsonValue,
    /// Current state.
    pub status: ExecutionStatus,
    /// When the execution was admitted. Also the input to duplicate-run
    /// suppression for scheduled workflows.
    pub started_at: DateTime<Utc>,
    /// When the execution reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// Steps visited (passed or failed).
    pub steps_executed: u32,
    /// Steps that passed.
    pub steps_passed: u32,
    /// Steps that failed.
    pub steps_failed: u32,
    /// The ordered step trace.
    pub trace: Vec<ExecutionStep>,
    /// Error message for failed executions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// When true, no action node caused an external side effect.
    pub is_dry_run: bool,
}

impl WorkflowExecution {
    /// Creates a queued execution: admitted, not yet walking.
    #[must_use]
    pub fn queued(
        workflow_id: WorkflowId,
        trigger_type: TriggerType,
        triggered_by: TriggeredBy,
        trigger_data: JsonValue,
        is_dry_run: bool,
    ) -> Self {
        Self {
            id: ExecutionId::new(),
            workflow_id,
            trigger_type,
            triggered_by,
            trigger_data,
            status: ExecutionStatus::Queued,
            started_at: Utc::now(),
            completed_at: None,
            steps_executed: 0,
            steps_passed: 0,
            steps_failed: 0,
            trace: Vec::new(),
            error_message: None,
            is_dry_run,
        }
    }

    /// Marks the graph walk as started.
    pub fn begin(&mut self) {
        self.status = ExecutionStatus::Running;
    }

    /// Appends a step to the trace and updates the counters.
    pub fn record_step(&mut self, step: ExecutionStep) {
        match step.status {
            StepStatus::Passed => {
                self.steps_executed += 1;
                self.steps_passed += 1;
            }
            StepStatus::Failed => {
                self.steps_executed += 1;
                self.steps_failed += 1;
            }
            StepStatus::Skipped => {}
        }
        self.trace.push(step);
    }

    /// Marks the execution completed.
    pub fn complete(&mut self) {
        self.status = ExecutionStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    /// Marks the execution failed with an unrecoverable error.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = ExecutionStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error_message = Some(error.into());
    }

    /// Marks the execution cancelled.
    pub fn cancel(&mut self) {
        self.status = ExecutionStatus::Cancelled;
        self.completed_at = Some(Utc::now());
    }

    /// Returns the wall-clock duration, if terminal.
    #[must_use]
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.completed_at.map(|end| end - self.started_at)
    }
}
