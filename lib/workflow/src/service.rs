//! The workflow service facade.
//!
//! Everything the product surface does to workflows goes through here:
//! authoring, the explicit lifecycle actions, history access, and the
//! dry-run test endpoint. Every operation is tenant-scoped; a workflow
//! in another tenant is reported as not found.

use crate::definition::{MAX_ACTIVE_PER_PROJECT, Workflow, WorkflowStatus};
use crate::engine::{CancelFlag, ExecutionEngine, ExecutionRequest};
use crate::error::{ValidationError, WorkflowError};
use crate::execution::{TriggeredBy, WorkflowExecution};
use crate::graph::WorkflowGraph;
use crate::store::{ExecutionStore, WorkflowStore};
use crate::trigger::TriggerSettings;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tidemark_core::{ProjectId, TenantId, WorkflowId};
use tracing::info;

/// A partial update to a workflow definition.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkflowUpdate {
    /// New name.
    pub name: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// Replacement trigger settings.
    pub trigger: Option<TriggerSettings>,
    /// Replacement graph.
    pub graph: Option<WorkflowGraph>,
    /// Replacement variables.
    pub variables: Option<serde_json::Map<String, JsonValue>>,
}

/// High-level workflow operations.
pub struct WorkflowService {
    workflows: Arc<dyn WorkflowStore>,
    executions: Arc<dyn ExecutionStore>,
    engine: Arc<ExecutionEngine>,
}

impl WorkflowService {
    #[must_use]
    pub fn new(
        workflows: Arc<dyn WorkflowStore>,
        executions: Arc<dyn ExecutionStore>,
        engine: Arc<ExecutionEngine>,
    ) -> Self {
        Self {
            workflows,
            executions,
            engine,
        }
    }

    /// Creates a workflow in `draft`, after validating the trigger and
    /// the graph.
    ///
    /// # Errors
    ///
    /// [`WorkflowError::Validation`] when the definition is rejected,
    /// or a store error.
    pub async fn create(
        &self,
        tenant_id: TenantId,
        project_id: ProjectId,
        name: impl Into<String>,
        trigger: TriggerSettings,
        graph: WorkflowGraph,
    ) -> Result<Workflow, WorkflowError> {
        let workflow = Workflow::new(tenant_id, project_id, name, trigger, graph);
        workflow.validate()?;
        self.workflows.insert(workflow.clone()).await?;
        info!(workflow_id = %workflow.id, project_id = %project_id, "workflow created");
        Ok(workflow)
    }

    /// Fetches a workflow.
    ///
    /// # Errors
    ///
    /// [`WorkflowError::NotFound`] for missing or foreign-tenant ids.
    pub async fn get(
        &self,
        tenant_id: TenantId,
        workflow_id: WorkflowId,
    ) -> Result<Workflow, WorkflowError> {
        self.workflows
            .get(tenant_id, workflow_id)
            .await?
            .ok_or(WorkflowError::NotFound { workflow_id })
    }

    /// Applies a partial update, re-validating the result. Archived
    /// workflows are immutable.
    ///
    /// # Errors
    ///
    /// [`WorkflowError::NotFound`], [`WorkflowError::Validation`], or
    /// [`WorkflowError::InvalidStateTransition`] for archived rows.
    pub async fn update(
        &self,
        tenant_id: TenantId,
        workflow_id: WorkflowId,
        update: WorkflowUpdate,
    ) -> Result<Workflow, WorkflowError> {
        let mut workflow = self.get(tenant_id, workflow_id).await?;
        if workflow.status == WorkflowStatus::Archived {
            return Err(WorkflowError::InvalidStateTransition {
                from: workflow.status.to_string(),
                to: "updated".to_string(),
            });
        }

        if let Some(name) = update.name {
            workflow.name = name;
        }
        if let Some(description) = update.description {
            workflow.description = Some(description);
        }
        if let Some(trigger) = update.trigger {
            workflow.trigger = trigger;
        }
        if let Some(graph) = update.graph {
            workflow.graph = graph;
        }
        if let Some(variables) = update.variables {
            workflow.variables = variables;
        }

        workflow.validate()?;
        workflow.updated_at = Utc::now();
        self.workflows.update(workflow.clone()).await?;
        Ok(workflow)
    }

    /// Activates a workflow: re-validates, enforces the per-project
    /// active cap, then flips status and the enabled flag.
    ///
    /// # Errors
    ///
    /// Validation, cap, lifecycle, or store errors.
    pub async fn activate(
        &self,
        tenant_id: TenantId,
        workflow_id: WorkflowId,
    ) -> Result<Workflow, WorkflowError> {
        let mut workflow = self.get(tenant_id, workflow_id).await?;
        workflow.validate()?;

        let active = self
            .workflows
            .count_active(tenant_id, workflow.project_id)
            .await?;
        if active >= MAX_ACTIVE_PER_PROJECT {
            return Err(ValidationError::ActiveLimitExceeded {
                project_id: workflow.project_id,
                limit: MAX_ACTIVE_PER_PROJECT,
            }
            .into());
        }

        workflow.activate()?;
        self.workflows.update(workflow.clone()).await?;
        info!(workflow_id = %workflow.id, "workflow activated");
        Ok(workflow)
    }

    /// Pauses a workflow, stopping further matching.
    ///
    /// # Errors
    ///
    /// Lifecycle or store errors.
    pub async fn pause(
        &self,
        tenant_id: TenantId,
        workflow_id: WorkflowId,
    ) -> Result<Workflow, WorkflowError> {
        let mut workflow = self.get(tenant_id, workflow_id).await?;
        workflow.pause()?;
        self.workflows.update(workflow.clone()).await?;
        info!(workflow_id = %workflow.id, "workflow paused");
        Ok(workflow)
    }

    /// Archives a workflow. Archived workflows are immutable and never
    /// matched.
    ///
    /// # Errors
    ///
    /// Lifecycle or store errors.
    pub async fn archive(
        &self,
        tenant_id: TenantId,
        workflow_id: WorkflowId,
    ) -> Result<Workflow, WorkflowError> {
        let mut workflow = self.get(tenant_id, workflow_id).await?;
        workflow.archive()?;
        self.workflows.update(workflow.clone()).await?;
        info!(workflow_id = %workflow.id, "workflow archived");
        Ok(workflow)
    }

    /// Deletes a workflow, cascading to its execution history and its
    /// rate-limit window.
    ///
    /// # Errors
    ///
    /// [`WorkflowError::NotFound`] or store errors.
    pub async fn delete(
        &self,
        tenant_id: TenantId,
        workflow_id: WorkflowId,
    ) -> Result<(), WorkflowError> {
        // Confirm existence in this tenant before touching anything.
        self.get(tenant_id, workflow_id).await?;

        self.workflows.delete(tenant_id, workflow_id).await?;
        self.executions.delete_for_workflow(workflow_id).await?;
        self.engine.rate_limiter().forget(&workflow_id);
        info!(workflow_id = %workflow_id, "workflow deleted with execution history");
        Ok(())
    }

    /// Lists a project's workflows.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub async fn list(
        &self,
        tenant_id: TenantId,
        project_id: ProjectId,
    ) -> Result<Vec<Workflow>, WorkflowError> {
        Ok(self.workflows.list_by_project(tenant_id, project_id).await?)
    }

    /// Returns a workflow's execution history, most recent first.
    ///
    /// # Errors
    ///
    /// [`WorkflowError::NotFound`] or store errors.
    pub async fn executions(
        &self,
        tenant_id: TenantId,
        workflow_id: WorkflowId,
        limit: usize,
    ) -> Result<Vec<WorkflowExecution>, WorkflowError> {
        self.get(tenant_id, workflow_id).await?;
        Ok(self.executions.list_for_workflow(workflow_id, limit).await?)
    }

    /// Dry-runs a workflow against a sample task snapshot and returns
    /// the full trace synchronously.
    ///
    /// Works on drafts too, so authors can test before activating.
    /// Variable overrides shadow the stored variables for this run
    /// only; nothing on the workflow row changes.
    ///
    /// # Errors
    ///
    /// [`WorkflowError::NotFound`] or engine errors (dry runs are rate
    /// limited like real runs).
    pub async fn test(
        &self,
        tenant_id: TenantId,
        workflow_id: WorkflowId,
        sample_task: JsonValue,
        variable_overrides: Option<serde_json::Map<String, JsonValue>>,
    ) -> Result<WorkflowExecution, WorkflowError> {
        let mut workflow = self.get(tenant_id, workflow_id).await?;
        if let Some(overrides) = variable_overrides {
            for (key, value) in overrides {
                workflow.variables.insert(key, value);
            }
        }

        let request = ExecutionRequest::new(workflow, TriggeredBy::Manual, sample_task)
            .dry_run()
            .with_cancel_flag(CancelFlag::new());
        Ok(self.engine.run(request).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::Edge;
    use crate::engine::{ActionExecutor, ActionOutcome, AdapterError, AgentAdvisor};
    use crate::execution::{StepResult, Suggestion};
    use crate::node::{ActionNodeConfig, Node, NodeConfig};
    use crate::store::{InMemoryExecutionStore, InMemoryWorkflowStore};
    use crate::trigger::TriggerType;
    use async_trait::async_trait;
    use serde_json::json;

    struct PanickingExecutor;

    #[async_trait]
    impl ActionExecutor for PanickingExecutor {
        async fn execute(
            &self,
            _action_type: &str,
            _parameters: &JsonValue,
            _trigger_data: &JsonValue,
            _is_dry_run: bool,
        ) -> Result<ActionOutcome, AdapterError> {
            panic!("dry-run tests must not reach the executor");
        }
    }

    struct NoopAdvisor;

    #[async_trait]
    impl AgentAdvisor for NoopAdvisor {
        async fn advise(
            &self,
            _instruction: &str,
            _context: &JsonValue,
            _trigger_data: &JsonValue,
        ) -> Result<Suggestion, AdapterError> {
            Ok(Suggestion {
                summary: "noop".to_string(),
                detail: JsonValue::Null,
            })
        }
    }

    fn valid_graph() -> WorkflowGraph {
        let mut graph = WorkflowGraph::new();
        graph.add_node(Node::with_id("t", "entry", NodeConfig::Trigger));
        graph.add_node(Node::with_id(
            "a",
            "notify",
            NodeConfig::Action(ActionNodeConfig {
                action_type: "notify".to_string(),
                parameters: json!({}),
                continue_on_error: false,
            }),
        ));
        graph.add_edge(Edge::new("t", "a"));
        graph
    }

    fn service() -> (WorkflowService, Arc<InMemoryWorkflowStore>) {
        let workflows = Arc::new(InMemoryWorkflowStore::new());
        let executions = Arc::new(InMemoryExecutionStore::new());
        let engine = Arc::new(ExecutionEngine::new(
            workflows.clone(),
            executions.clone(),
            Arc::new(PanickingExecutor),
            Arc::new(NoopAdvisor),
        ));
        (
            WorkflowService::new(workflows.clone(), executions, engine),
            workflows,
        )
    }

    #[tokio::test]
    async fn create_validates_and_stores_a_draft() {
        let (svc, _) = service();
        let tenant = TenantId::new();
        let wf = svc
            .create(
                tenant,
                ProjectId::new(),
                "notify",
                TriggerSettings::event(TriggerType::TaskCreated),
                valid_graph(),
            )
            .await
            .expect("create");
        assert_eq!(wf.status, WorkflowStatus::Draft);

        let fetched = svc.get(tenant, wf.id).await.expect("get");
        assert_eq!(fetched.id, wf.id);
    }

    #[tokio::test]
    async fn create_rejects_invalid_graphs() {
        let (svc, _) = service();
        let mut graph = valid_graph();
        graph.add_edge(Edge::new("a", "ghost"));

        let err = svc
            .create(
                TenantId::new(),
                ProjectId::new(),
                "broken",
                TriggerSettings::event(TriggerType::TaskCreated),
                graph,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Validation(_)));
    }

    #[tokio::test]
    async fn lifecycle_actions_flow_through_the_store() {
        let (svc, _) = service();
        let tenant = TenantId::new();
        let wf = svc
            .create(
                tenant,
                ProjectId::new(),
                "wf",
                TriggerSettings::event(TriggerType::TaskCreated),
                valid_graph(),
            )
            .await
            .expect("create");

        let activated = svc.activate(tenant, wf.id).await.expect("activate");
        assert!(activated.is_runnable());

        let paused = svc.pause(tenant, wf.id).await.expect("pause");
        assert_eq!(paused.status, WorkflowStatus::Paused);

        let archived = svc.archive(tenant, wf.id).await.expect("archive");
        assert_eq!(archived.status, WorkflowStatus::Archived);

        // Archived rows are immutable.
        let err = svc
            .update(tenant, wf.id, WorkflowUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidStateTransition { .. }));
    }

    #[tokio::test]
    async fn activation_enforces_the_project_cap() {
        let (svc, _) = service();
        let tenant = TenantId::new();
        let project = ProjectId::new();

        let mut last = None;
        for i in 0..=MAX_ACTIVE_PER_PROJECT {
            let wf = svc
                .create(
                    tenant,
                    project,
                    format!("wf-{i}"),
                    TriggerSettings::event(TriggerType::TaskCreated),
                    valid_graph(),
                )
                .await
                .expect("create");
            last = Some(wf.id);
            if i < MAX_ACTIVE_PER_PROJECT {
                svc.activate(tenant, wf.id).await.expect("activate");
            }
        }

        let err = svc
            .activate(tenant, last.expect("last id"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Validation(ValidationError::ActiveLimitExceeded { .. })
        ));
    }

    #[tokio::test]
    async fn operations_are_tenant_scoped() {
        let (svc, _) = service();
        let wf = svc
            .create(
                TenantId::new(),
                ProjectId::new(),
                "wf",
                TriggerSettings::event(TriggerType::TaskCreated),
                valid_graph(),
            )
            .await
            .expect("create");

        let err = svc.get(TenantId::new(), wf.id).await.unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound { .. }));
    }

    #[tokio::test]
    async fn delete_cascades_to_executions() {
        let (svc, _) = service();
        let tenant = TenantId::new();
        let wf = svc
            .create(
                tenant,
                ProjectId::new(),
                "wf",
                TriggerSettings::event(TriggerType::TaskCreated),
                valid_graph(),
            )
            .await
            .expect("create");

        svc.test(tenant, wf.id, json!({"status": "todo"}), None)
            .await
            .expect("dry run");
        assert_eq!(
            svc.executions(tenant, wf.id, 10).await.expect("list").len(),
            1
        );

        svc.delete(tenant, wf.id).await.expect("delete");
        let err = svc.executions(tenant, wf.id, 10).await.unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_runs_dry_and_returns_the_trace() {
        let (svc, workflows) = service();
        let tenant = TenantId::new();
        let wf = svc
            .create(
                tenant,
                ProjectId::new(),
                "wf",
                TriggerSettings::event(TriggerType::TaskCreated),
                valid_graph(),
            )
            .await
            .expect("create");

        let exec = svc
            .test(tenant, wf.id, json!({"status": "todo"}), None)
            .await
            .expect("dry run");
        assert!(exec.is_dry_run);
        assert!(exec
            .trace
            .iter()
            .any(|s| matches!(s.result, Some(StepResult::Simulated { .. }))));

        // The stored workflow is untouched by the dry run.
        let stored = workflows
            .get(tenant, wf.id)
            .await
            .expect("get")
            .expect("present");
        assert_eq!(stored.metadata.execution_count, 0);
    }
}
