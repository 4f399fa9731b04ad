//! Persistence seams for workflows and executions.
//!
//! The engine, dispatcher and scheduler only see these traits. The
//! in-memory implementations back the test suite and single-process
//! deployments; a database-backed implementation plugs in behind the
//! same traits.

use crate::definition::{Workflow, WorkflowStatus};
use crate::error::StoreError;
use crate::execution::WorkflowExecution;
use crate::trigger::TriggerType;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tidemark_core::{ExecutionId, ProjectId, TenantId, WorkflowId};
use tokio::sync::RwLock;

/// Storage for workflow definitions.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Persists a new workflow.
    async fn insert(&self, workflow: Workflow) -> Result<(), StoreError>;

    /// Fetches a workflow, scoped to the caller's tenant. A workflow
    /// belonging to another tenant is indistinguishable from a missing
    /// one.
    async fn get(
        &self,
        tenant_id: TenantId,
        workflow_id: WorkflowId,
    ) -> Result<Option<Workflow>, StoreError>;

    /// Replaces a stored workflow.
    async fn update(&self, workflow: Workflow) -> Result<(), StoreError>;

    /// Removes a workflow. Execution history is cascaded by the caller.
    async fn delete(&self, tenant_id: TenantId, workflow_id: WorkflowId)
        -> Result<(), StoreError>;

    /// Lists a project's workflows.
    async fn list_by_project(
        &self,
        tenant_id: TenantId,
        project_id: ProjectId,
    ) -> Result<Vec<Workflow>, StoreError>;

    /// Lists a tenant's runnable (active and enabled) workflows with
    /// the given trigger type. This is the dispatch lookup path.
    async fn list_runnable(
        &self,
        tenant_id: TenantId,
        trigger_type: TriggerType,
    ) -> Result<Vec<Workflow>, StoreError>;

    /// Lists runnable workflows with the given trigger type across all
    /// tenants. Used by the scheduler sweeps; each returned row still
    /// carries its tenant for scoped task queries.
    async fn list_runnable_all_tenants(
        &self,
        trigger_type: TriggerType,
    ) -> Result<Vec<Workflow>, StoreError>;

    /// Counts a project's active workflows, for the activation cap.
    async fn count_active(
        &self,
        tenant_id: TenantId,
        project_id: ProjectId,
    ) -> Result<usize, StoreError>;

    /// Atomically applies one admitted real run to the workflow's
    /// counters: increments `execution_count` and sets
    /// `last_executed_at`.
    async fn record_run(&self, workflow_id: WorkflowId, at: DateTime<Utc>)
        -> Result<(), StoreError>;

    /// Atomically bumps the workflow's error counter: an execution that
    /// finished `failed`, or a trigger-side fault (e.g. an unparseable
    /// cron expression).
    async fn record_failure(&self, workflow_id: WorkflowId) -> Result<(), StoreError>;
}

/// Storage for execution records.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Persists a new execution record.
    async fn insert(&self, execution: WorkflowExecution) -> Result<(), StoreError>;

    /// Replaces a stored execution record (trace growth, terminal
    /// state).
    async fn update(&self, execution: WorkflowExecution) -> Result<(), StoreError>;

    /// Fetches an execution record.
    async fn get(&self, execution_id: ExecutionId) -> Result<Option<WorkflowExecution>, StoreError>;

    /// Lists a workflow's executions, most recent first.
    async fn list_for_workflow(
        &self,
        workflow_id: WorkflowId,
        limit: usize,
    ) -> Result<Vec<WorkflowExecution>, StoreError>;

    /// Removes all executions for a workflow (delete cascade).
    async fn delete_for_workflow(&self, workflow_id: WorkflowId) -> Result<(), StoreError>;
}

/// In-memory workflow store.
#[derive(Debug, Default)]
pub struct InMemoryWorkflowStore {
    rows: RwLock<HashMap<WorkflowId, Workflow>>,
}

impl InMemoryWorkflowStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn insert(&self, workflow: Workflow) -> Result<(), StoreError> {
        self.rows.write().await.insert(workflow.id, workflow);
        Ok(())
    }

    async fn get(
        &self,
        tenant_id: TenantId,
        workflow_id: WorkflowId,
    ) -> Result<Option<Workflow>, StoreError> {
        let rows = self.rows.read().await;
        Ok(rows
            .get(&workflow_id)
            .filter(|wf| wf.tenant_id == tenant_id)
            .cloned())
    }

    async fn update(&self, workflow: Workflow) -> Result<(), StoreError> {
        let mut rows = self.rows.write().await;
        match rows.get_mut(&workflow.id) {
            Some(slot) => {
                *slot = workflow;
                Ok(())
            }
            None => Err(StoreError::Unavailable {
                reason: format!("workflow {} not present for update", workflow.id),
            }),
        }
    }

    async fn delete(
        &self,
        tenant_id: TenantId,
        workflow_id: WorkflowId,
    ) -> Result<(), StoreError> {
        let mut rows = self.rows.write().await;
        if rows
            .get(&workflow_id)
            .is_some_and(|wf| wf.tenant_id == tenant_id)
        {
            rows.remove(&workflow_id);
        }
        Ok(())
    }

    async fn list_by_project(
        &self,
        tenant_id: TenantId,
        project_id: ProjectId,
    ) -> Result<Vec<Workflow>, StoreError> {
        let rows = self.rows.read().await;
        let mut out: Vec<Workflow> = rows
            .values()
            .filter(|wf| wf.tenant_id == tenant_id && wf.project_id == project_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }

    async fn list_runnable(
        &self,
        tenant_id: TenantId,
        trigger_type: TriggerType,
    ) -> Result<Vec<Workflow>, StoreError> {
        let rows = self.rows.read().await;
        let mut out: Vec<Workflow> = rows
            .values()
            .filter(|wf| {
                wf.tenant_id == tenant_id
                    && wf.is_runnable()
                    && wf.trigger_type() == trigger_type
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }

    async fn list_runnable_all_tenants(
        &self,
        trigger_type: TriggerType,
    ) -> Result<Vec<Workflow>, StoreError> {
        let rows = self.rows.read().await;
        let mut out: Vec<Workflow> = rows
            .values()
            .filter(|wf| wf.is_runnable() && wf.trigger_type() == trigger_type)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }

    async fn count_active(
        &self,
        tenant_id: TenantId,
        project_id: ProjectId,
    ) -> Result<usize, StoreError> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .filter(|wf| {
                wf.tenant_id == tenant_id
                    && wf.project_id == project_id
                    && wf.status == WorkflowStatus::Active
            })
            .count())
    }

    async fn record_run(
        &self,
        workflow_id: WorkflowId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut rows = self.rows.write().await;
        match rows.get_mut(&workflow_id) {
            Some(wf) => {
                wf.metadata.record_run(at);
                wf.updated_at = at;
                Ok(())
            }
            None => Err(StoreError::Unavailable {
                reason: format!("workflow {workflow_id} not present for counter update"),
            }),
        }
    }

    async fn record_failure(&self, workflow_id: WorkflowId) -> Result<(), StoreError> {
        let mut rows = self.rows.write().await;
        match rows.get_mut(&workflow_id) {
            Some(wf) => {
                wf.metadata.record_failure();
                Ok(())
            }
            None => Err(StoreError::Unavailable {
                reason: format!("workflow {workflow_id} not present for failure update"),
            }),
        }
    }
}

/// In-memory execution store.
#[derive(Debug, Default)]
pub struct InMemoryExecutionStore {
    rows: RwLock<HashMap<ExecutionId, WorkflowExecution>>,
}

impl InMemoryExecutionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn insert(&self, execution: WorkflowExecution) -> Result<(), StoreError> {
        self.rows.write().await.insert(execution.id, execution);
        Ok(())
    }

    async fn update(&self, execution: WorkflowExecution) -> Result<(), StoreError> {
        let mut rows = self.rows.write().await;
        match rows.get_mut(&execution.id) {
            Some(slot) => {
                *slot = execution;
                Ok(())
            }
            None => Err(StoreError::Unavailable {
                reason: format!("execution {} not present for update", execution.id),
            }),
        }
    }

    async fn get(
        &self,
        execution_id: ExecutionId,
    ) -> Result<Option<WorkflowExecution>, StoreError> {
        Ok(self.rows.read().await.get(&execution_id).cloned())
    }

    async fn list_for_workflow(
        &self,
        workflow_id: WorkflowId,
        limit: usize,
    ) -> Result<Vec<WorkflowExecution>, StoreError> {
        let rows = self.rows.read().await;
        let mut out: Vec<WorkflowExecution> = rows
            .values()
            .filter(|exec| exec.workflow_id == workflow_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        out.truncate(limit);
        Ok(out)
    }

    async fn delete_for_workflow(&self, workflow_id: WorkflowId) -> Result<(), StoreError> {
        self.rows
            .write()
            .await
            .retain(|_, exec| exec.workflow_id != workflow_id);
        Ok(())
    }
}
