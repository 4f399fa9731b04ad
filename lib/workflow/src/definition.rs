//! Workflow definitions and their lifecycle.
//!
//! A workflow belongs to exactly one tenant and one project, carries a
//! single trigger and a node graph, and moves through a small lifecycle:
//! created in `draft`, activated explicitly (never implicitly), and
//! paused or archived to stop further matching. Runtime counters live
//! in [`WorkflowMetadata`] and are updated only by real runs.

use crate::error::WorkflowError;
use crate::graph::WorkflowGraph;
use crate::trigger::{TriggerSettings, TriggerType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tidemark_core::{ProjectId, TenantId, WorkflowId};

/// The maximum number of simultaneously active workflows per project,
/// enforced at activation time.
pub const MAX_ACTIVE_PER_PROJECT: usize = 50;

/// Lifecycle state of a workflow definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Editable, never matched against events or sweeps.
    Draft,
    /// Eligible for triggering.
    Active,
    /// Temporarily excluded from matching; can be reactivated.
    Paused,
    /// Permanently retired.
    Archived,
}

impl WorkflowStatus {
    /// Returns true when the transition to `next` is allowed.
    #[must_use]
    pub fn can_transition_to(&self, next: WorkflowStatus) -> bool {
        use WorkflowStatus::{Active, Archived, Draft, Paused};
        matches!(
            (self, next),
            (Draft, Active)
                | (Draft, Archived)
                | (Active, Paused)
                | (Active, Archived)
                | (Paused, Active)
                | (Paused, Archived)
        )
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Archived => "archived",
        };
        write!(f, "{s}")
    }
}

/// Runtime counters carried on the workflow row.
///
/// Dry runs never touch these; only real runs do, through the store's
/// atomic counter update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WorkflowMetadata {
    /// Total real executions, regardless of outcome.
    #[serde(default)]
    pub execution_count: u64,
    /// Real executions that ended in `failed`, plus trigger-side
    /// faults.
    #[serde(default)]
    pub error_count: u64,
    /// When the last real execution was admitted. Also the input to
    /// duplicate-run suppression for scheduled workflows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_executed_at: Option<DateTime<Utc>>,
}

impl WorkflowMetadata {
    /// Records one admitted real run.
    pub fn record_run(&mut self, at: DateTime<Utc>) {
        self.execution_count += 1;
        self.last_executed_at = Some(at);
    }

    /// Records a failure: an execution that finished `failed`, or a
    /// trigger-side fault such as an unparseable cron expression.
    pub fn record_failure(&mut self) {
        self.error_count += 1;
    }
}

/// A workflow definition: trigger, graph, and lifecycle state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique identifier.
    pub id: WorkflowId,
    /// Owning tenant. Every lookup path is scoped by this id.
    pub tenant_id: TenantId,
    /// Owning project.
    pub project_id: ProjectId,
    /// Human-readable name.
    pub name: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Lifecycle state.
    pub status: WorkflowStatus,
    /// When true the workflow is matched against events and sweeps.
    /// Implies `status == active`.
    #[serde(default)]
    pub enabled: bool,
    /// The trigger configuration.
    pub trigger: TriggerSettings,
    /// The node graph, in its flat persisted form.
    #[serde(default)]
    pub graph: WorkflowGraph,
    /// Free-form workflow variables; condition fields fall back to
    /// these when the trigger data lacks them.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub variables: serde_json::Map<String, serde_json::Value>,
    /// Runtime counters.
    #[serde(default)]
    pub metadata: WorkflowMetadata,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    /// Creates a draft workflow.
    #[must_use]
    pub fn new(
        tenant_id: TenantId,
        project_id: ProjectId,
        name: impl Into<String>,
        trigger: TriggerSettings,
        graph: WorkflowGraph,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: WorkflowId::new(),
            tenant_id,
            project_id,
            name: name.into(),
            description: None,
            status: WorkflowStatus::Draft,
            enabled: false,
            trigger,
            graph,
            variables: serde_json::Map::new(),
            metadata: WorkflowMetadata::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Returns the trigger type.
    #[must_use]
    pub fn trigger_type(&self) -> TriggerType {
        self.trigger.trigger_type
    }

    /// Returns true when the workflow should be considered for
    /// triggering.
    #[must_use]
    pub fn is_runnable(&self) -> bool {
        self.enabled && self.status == WorkflowStatus::Active
    }

    /// Validates the trigger configuration and the graph together.
    ///
    /// # Errors
    ///
    /// Returns the first [`crate::error::ValidationError`] encountered.
    pub fn validate(&self) -> Result<(), crate::error::ValidationError> {
        self.trigger.validate()?;
        self.graph.validate(&self.trigger_type())?;
        Ok(())
    }

    /// Moves the workflow to `active` and enables it.
    ///
    /// Callers must re-validate before activating; this only checks the
    /// lifecycle transition.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::InvalidStateTransition`].
    pub fn activate(&mut self) -> Result<(), WorkflowError> {
        self.transition(WorkflowStatus::Active)?;
        self.enabled = true;
        Ok(())
    }

    /// Moves the workflow to `paused` and disables it.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::InvalidStateTransition`].
    pub fn pause(&mut self) -> Result<(), WorkflowError> {
        self.transition(WorkflowStatus::Paused)?;
        self.enabled = false;
        Ok(())
    }

    /// Moves the workflow to `archived` and disables it.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::InvalidStateTransition`].
    pub fn archive(&mut self) -> Result<(), WorkflowError> {
        self.transition(WorkflowStatus::Archived)?;
        self.enabled = false;
        Ok(())
    }

    fn transition(&mut self, next: WorkflowStatus) -> Result<(), WorkflowError> {
        if !self.status.can_transition_to(next) {
            return Err(WorkflowError::InvalidStateTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Node, NodeConfig};

    fn draft() -> Workflow {
        let mut graph = WorkflowGraph::new();
        graph.add_node(Node::new("on create", NodeConfig::Trigger));
        Workflow::new(
            TenantId::new(),
            ProjectId::new(),
            "auto-label",
            TriggerSettings::event(TriggerType::TaskCreated),
            graph,
        )
    }

    #[test]
    fn new_workflow_is_disabled_draft() {
        let wf = draft();
        assert_eq!(wf.status, WorkflowStatus::Draft);
        assert!(!wf.enabled);
        assert!(!wf.is_runnable());
        assert_eq!(wf.metadata.execution_count, 0);
    }

    #[test]
    fn activation_is_explicit() {
        let mut wf = draft();
        wf.activate().expect("draft -> active");
        assert_eq!(wf.status, WorkflowStatus::Active);
        assert!(wf.enabled);
        assert!(wf.is_runnable());
    }

    #[test]
    fn pause_and_reactivate() {
        let mut wf = draft();
        wf.activate().expect("draft -> active");
        wf.pause().expect("active -> paused");
        assert!(!wf.is_runnable());
        wf.activate().expect("paused -> active");
        assert!(wf.is_runnable());
    }

    #[test]
    fn archived_is_terminal() {
        let mut wf = draft();
        wf.archive().expect("draft -> archived");
        assert!(wf.activate().is_err());
        assert!(wf.pause().is_err());
    }

    #[test]
    fn draft_cannot_pause() {
        let mut wf = draft();
        let err = wf.pause().unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::InvalidStateTransition { .. }
        ));
    }

    #[test]
    fn record_run_updates_counters() {
        let mut meta = WorkflowMetadata::default();
        let now = Utc::now();
        meta.record_run(now);
        meta.record_run(now);
        meta.record_failure();
        assert_eq!(meta.execution_count, 2);
        assert_eq!(meta.error_count, 1);
        assert_eq!(meta.last_executed_at, Some(now));
    }

    #[test]
    fn workflow_serde_roundtrip() {
        let wf = draft().with_description("labels new tasks");
        let json = serde_json::to_string(&wf).expect("serialize");
        let parsed: Workflow = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(wf, parsed);
    }
}
