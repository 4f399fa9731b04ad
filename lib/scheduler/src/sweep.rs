//! The due-date and custom-schedule sweeps.
//!
//! Both sweeps list runnable workflows across all tenants, but every
//! task query inside a sweep is scoped by the owning workflow's tenant
//! id, so one tenant's sweep can never read another tenant's tasks.
//! A single misconfigured workflow (bad cron, failing query) is logged
//! and counted, never aborts the sweep. Firings are admitted inline and
//! walked on their own tasks, so a slow action or agent adapter never
//! stalls the per-minute tick.

use crate::error::ScheduleError;
use crate::schedule::{CronSchedule, fired_in_current_period, minute_start};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tidemark_core::{ProjectId, TaskId, TenantId};
use tidemark_workflow::engine::{ExecutionEngine, ExecutionRequest};
use tidemark_workflow::error::EngineError;
use tidemark_workflow::execution::TriggeredBy;
use tidemark_workflow::store::WorkflowStore;
use tidemark_workflow::trigger::TriggerType;
use tidemark_workflow::{StoreError, Workflow};
use tracing::{debug, error, info, warn};

/// A read-only task row, as seen by the due-date sweep.
///
/// The serialized form is the trigger data conditions and filters
/// evaluate against, so field names match the filter keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    /// Task id.
    pub id: TaskId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Owning project.
    pub project_id: ProjectId,
    /// Task title.
    pub title: String,
    /// Current status.
    pub status: String,
    /// Project phase, when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    /// Assignee, when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    /// Priority, when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    /// Task type, when set.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Due date, when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
}

impl TaskSnapshot {
    /// Serializes the snapshot into trigger data.
    #[must_use]
    pub fn to_trigger_data(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}

/// Read-only task lookup for the due-date sweep.
///
/// Implemented by the task subsystem; the scheduler never writes tasks.
#[async_trait]
pub trait TaskQuery: Send + Sync {
    /// Returns a project's open tasks with a due date in `[from, to]`.
    async fn open_tasks_due_between(
        &self,
        tenant_id: TenantId,
        project_id: ProjectId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TaskSnapshot>, StoreError>;
}

/// Outcome counters for one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Runnable workflows examined.
    pub considered: usize,
    /// Executions started.
    pub started: usize,
    /// Trigger firings dropped by the rate limiter.
    pub rate_limited: usize,
    /// Workflows skipped for a fault (bad cron, failed lookup).
    pub faults: usize,
}

/// Drives the due-date and custom-schedule sweeps.
pub struct Scheduler {
    workflows: Arc<dyn WorkflowStore>,
    tasks: Arc<dyn TaskQuery>,
    engine: Arc<ExecutionEngine>,
}

impl Scheduler {
    #[must_use]
    pub fn new(
        workflows: Arc<dyn WorkflowStore>,
        tasks: Arc<dyn TaskQuery>,
        engine: Arc<ExecutionEngine>,
    ) -> Self {
        Self {
            workflows,
            tasks,
            engine,
        }
    }

    /// Runs the due-date sweep: one engine run per (workflow, due task)
    /// pair.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::Store`] when the workflow listing
    /// itself fails; per-workflow faults are counted, not raised.
    pub async fn run_due_date_sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, ScheduleError> {
        let candidates = self
            .workflows
            .list_runnable_all_tenants(TriggerType::DueDateApproaching)
            .await?;

        let mut report = SweepReport {
            considered: candidates.len(),
            ..Default::default()
        };

        for workflow in candidates {
            let cutoff = now + Duration::days(workflow.trigger.days_before_due());
            let tasks = match self
                .tasks
                .open_tasks_due_between(workflow.tenant_id, workflow.project_id, now, cutoff)
                .await
            {
                Ok(tasks) => tasks,
                Err(e) => {
                    error!(workflow_id = %workflow.id, error = %e, "due-date task lookup failed");
                    report.faults += 1;
                    continue;
                }
            };

            debug!(
                workflow_id = %workflow.id,
                due_tasks = tasks.len(),
                "due-date sweep matched tasks"
            );

            for task in tasks {
                self.fire(&workflow, task.to_trigger_data(), &mut report).await;
            }
        }

        info!(
            considered = report.considered,
            started = report.started,
            rate_limited = report.rate_limited,
            faults = report.faults,
            "due-date sweep finished"
        );
        Ok(report)
    }

    /// Runs the custom-schedule sweep for `now`'s minute.
    ///
    /// A workflow fires when its cron expression is due this minute and
    /// it has not already executed within the minute period. Unparseable
    /// expressions are logged, bump the workflow's error counter, and
    /// never abort the sweep.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::Store`] when the workflow listing fails.
    pub async fn run_schedule_sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, ScheduleError> {
        let candidates = self
            .workflows
            .list_runnable_all_tenants(TriggerType::CustomSchedule)
            .await?;

        let mut report = SweepReport {
            considered: candidates.len(),
            ..Default::default()
        };

        for workflow in candidates {
            let Some(expression) = workflow.trigger.cron.as_deref() else {
                warn!(workflow_id = %workflow.id, "custom_schedule workflow without a cron expression");
                self.record_fault(&workflow, &mut report).await;
                continue;
            };

            let schedule = match CronSchedule::parse(expression) {
                Ok(schedule) => schedule,
                Err(e) => {
                    warn!(workflow_id = %workflow.id, error = %e, "skipping workflow for this tick");
                    self.record_fault(&workflow, &mut report).await;
                    continue;
                }
            };

            if !schedule.is_due(now) {
                continue;
            }
            if fired_in_current_period(workflow.metadata.last_executed_at, now) {
                debug!(
                    workflow_id = %workflow.id,
                    "already executed this minute, suppressing duplicate run"
                );
                continue;
            }

            let trigger_data = serde_json::json!({
                "scheduled_for": minute_start(now),
                "cron": expression,
            });
            self.fire(&workflow, trigger_data, &mut report).await;
        }

        info!(
            considered = report.considered,
            started = report.started,
            rate_limited = report.rate_limited,
            faults = report.faults,
            "schedule sweep finished"
        );
        Ok(report)
    }

    /// Ticks once per minute forever, running the schedule sweep every
    /// tick and the due-date sweep at the configured UTC hour.
    pub async fn run(&self, due_sweep_hour: u32) {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(60));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let now = Utc::now();

            if let Err(e) = self.run_schedule_sweep(now).await {
                error!(error = %e, "schedule sweep aborted");
            }
            if now.hour() == due_sweep_hour && now.minute() == 0 {
                if let Err(e) = self.run_due_date_sweep(now).await {
                    error!(error = %e, "due-date sweep aborted");
                }
            }
        }
    }

    /// Admits the firing and spawns the walk. Admission stamps the
    /// workflow's counters, so duplicate suppression holds even while
    /// the walk is still in flight.
    async fn fire(&self, workflow: &Workflow, trigger_data: JsonValue, report: &mut SweepReport) {
        let request = ExecutionRequest::new(workflow.clone(), TriggeredBy::Schedule, trigger_data);
        let execution = match self.engine.admit(&request).await {
            Ok(execution) => execution,
            Err(EngineError::RateLimited { retry_after, .. }) => {
                report.rate_limited += 1;
                warn!(
                    workflow_id = %workflow.id,
                    retry_after_secs = retry_after.num_seconds(),
                    "scheduled firing dropped: workflow rate limited"
                );
                return;
            }
            Err(e) => {
                report.faults += 1;
                error!(workflow_id = %workflow.id, error = %e, "scheduled execution failed to start");
                return;
            }
        };

        report.started += 1;
        debug!(
            workflow_id = %workflow.id,
            execution_id = %execution.id,
            "scheduled execution admitted"
        );

        let engine = Arc::clone(&self.engine);
        let workflow_id = workflow.id;
        tokio::spawn(async move {
            if let Err(e) = engine.drive(request, execution).await {
                error!(
                    workflow_id = %workflow_id,
                    error = %e,
                    "scheduled execution failed to finish"
                );
            }
        });
    }

    async fn record_fault(&self, workflow: &Workflow, report: &mut SweepReport) {
        report.faults += 1;
        if let Err(e) = self.workflows.record_failure(workflow.id).await {
            error!(workflow_id = %workflow.id, error = %e, "failed to record trigger fault");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use std::sync::Mutex;
    use tidemark_workflow::edge::Edge;
    use tidemark_workflow::engine::{
        ActionExecutor, ActionOutcome, AdapterError, AgentAdvisor,
    };
    use tidemark_workflow::execution::{ExecutionStatus, Suggestion};
    use tidemark_workflow::graph::WorkflowGraph;
    use tidemark_workflow::node::{ActionNodeConfig, Node, NodeConfig};
    use tidemark_workflow::store::{
        ExecutionStore, InMemoryExecutionStore, InMemoryWorkflowStore,
    };
    use tidemark_workflow::trigger::TriggerSettings;

    struct NoopExecutor;

    #[async_trait]
    impl ActionExecutor for NoopExecutor {
        async fn execute(
            &self,
            _action_type: &str,
            _parameters: &JsonValue,
            _trigger_data: &JsonValue,
            _is_dry_run: bool,
        ) -> Result<ActionOutcome, AdapterError> {
            Ok(ActionOutcome::applied(None))
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

    /// Returns its canned tasks for matching (tenant, project) pairs
    /// and records every query for scoping assertions.
    #[derive(Default)]
    struct ScriptedTaskQuery {
        tasks: Vec<TaskSnapshot>,
        queries: Mutex<Vec<(TenantId, ProjectId, DateTime<Utc>, DateTime<Utc>)>>,
    }

    #[async_trait]
    impl TaskQuery for ScriptedTaskQuery {
        async fn open_tasks_due_between(
            &self,
            tenant_id: TenantId,
            project_id: ProjectId,
            from: DateTime<Utc>,
            to: DateTime<Utc>,
        ) -> Result<Vec<TaskSnapshot>, StoreError> {
            self.queries
                .lock()
                .expect("lock")
                .push((tenant_id, project_id, from, to));
            Ok(self
                .tasks
                .iter()
                .filter(|t| t.tenant_id == tenant_id && t.project_id == project_id)
                .cloned()
                .collect())
        }
    }

    fn task(tenant: TenantId, project: ProjectId, title: &str) -> TaskSnapshot {
        TaskSnapshot {
            id: TaskId::new(),
            tenant_id: tenant,
            project_id: project,
            title: title.to_string(),
            status: "in_progress".to_string(),
            phase: None,
            assignee: None,
            priority: Some("high".to_string()),
            kind: None,
            due_date: Some(Utc::now() + Duration::hours(12)),
        }
    }

    fn workflow(tenant: TenantId, project: ProjectId, trigger: TriggerSettings) -> Workflow {
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
        let mut wf = Workflow::new(tenant, project, "sweep wf", trigger, graph);
        wf.activate().expect("activate");
        wf
    }

    struct Harness {
        workflows: Arc<InMemoryWorkflowStore>,
        executions: Arc<InMemoryExecutionStore>,
        tasks: Arc<ScriptedTaskQuery>,
        scheduler: Scheduler,
    }

    impl Harness {
        fn new(tasks: ScriptedTaskQuery) -> Self {
            Self::with_executor(tasks, Arc::new(NoopExecutor))
        }

        fn with_executor(tasks: ScriptedTaskQuery, executor: Arc<dyn ActionExecutor>) -> Self {
            let workflows = Arc::new(InMemoryWorkflowStore::new());
            let executions = Arc::new(InMemoryExecutionStore::new());
            let tasks = Arc::new(tasks);
            let engine = Arc::new(ExecutionEngine::new(
                workflows.clone(),
                executions.clone(),
                executor,
                Arc::new(NoopAdvisor),
            ));
            let scheduler = Scheduler::new(workflows.clone(), tasks.clone(), engine);
            Self {
                workflows,
                executions,
                tasks,
                scheduler,
            }
        }
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, h, m, s).single().expect("valid time")
    }

    #[tokio::test]
    async fn due_date_sweep_fires_once_per_due_task() {
        let tenant = TenantId::new();
        let project = ProjectId::new();
        let tasks = ScriptedTaskQuery {
            tasks: vec![task(tenant, project, "a"), task(tenant, project, "b")],
            ..Default::default()
        };
        let h = Harness::new(tasks);

        let wf = workflow(tenant, project, TriggerSettings::due_date(1));
        let wf_id = wf.id;
        h.workflows.insert(wf).await.expect("insert");

        let report = h
            .scheduler
            .run_due_date_sweep(Utc::now())
            .await
            .expect("sweep");
        assert_eq!(report.considered, 1);
        assert_eq!(report.started, 2);

        let rows = h
            .executions
            .list_for_workflow(wf_id, 10)
            .await
            .expect("list");
        assert_eq!(rows.len(), 2);
        assert!(rows
            .iter()
            .all(|e| matches!(e.triggered_by, TriggeredBy::Schedule)));
    }

    #[tokio::test]
    async fn due_date_sweep_scopes_queries_by_workflow_tenant() {
        let tenant_a = TenantId::new();
        let tenant_b = TenantId::new();
        let project_a = ProjectId::new();
        let project_b = ProjectId::new();
        let h = Harness::new(ScriptedTaskQuery::default());

        h.workflows
            .insert(workflow(tenant_a, project_a, TriggerSettings::due_date(3)))
            .await
            .expect("insert");
        h.workflows
            .insert(workflow(tenant_b, project_b, TriggerSettings::due_date(1)))
            .await
            .expect("insert");

        let now = Utc::now();
        h.scheduler.run_due_date_sweep(now).await.expect("sweep");

        let queries = h.tasks.queries.lock().expect("lock");
        assert_eq!(queries.len(), 2);
        let for_a = queries
            .iter()
            .find(|(t, ..)| *t == tenant_a)
            .expect("tenant a query");
        assert_eq!(for_a.1, project_a);
        assert_eq!(for_a.3, now + Duration::days(3));
        let for_b = queries
            .iter()
            .find(|(t, ..)| *t == tenant_b)
            .expect("tenant b query");
        assert_eq!(for_b.1, project_b);
        assert_eq!(for_b.3, now + Duration::days(1));
    }

    #[tokio::test]
    async fn schedule_sweep_fires_and_then_suppresses_within_the_minute() {
        let tenant = TenantId::new();
        let project = ProjectId::new();
        let h = Harness::new(ScriptedTaskQuery::default());

        let wf = workflow(tenant, project, TriggerSettings::schedule("* * * * *"));
        let wf_id = wf.id;
        h.workflows.insert(wf).await.expect("insert");

        let now = Utc::now();
        let first = h.scheduler.run_schedule_sweep(now).await.expect("sweep");
        assert_eq!(first.started, 1);

        // Admission stamped last_executed_at; the same minute is quiet.
        let second = h.scheduler.run_schedule_sweep(now).await.expect("sweep");
        assert_eq!(second.started, 0);

        let rows = h
            .executions
            .list_for_workflow(wf_id, 10)
            .await
            .expect("list");
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn schedule_sweep_skips_workflows_not_due() {
        let h = Harness::new(ScriptedTaskQuery::default());
        let wf = workflow(
            TenantId::new(),
            ProjectId::new(),
            TriggerSettings::schedule("0 9 * * *"),
        );
        h.workflows.insert(wf).await.expect("insert");

        let report = h
            .scheduler
            .run_schedule_sweep(at(10, 30, 0))
            .await
            .expect("sweep");
        assert_eq!(report.considered, 1);
        assert_eq!(report.started, 0);
        assert_eq!(report.faults, 0);
    }

    /// Holds every action until released, standing in for a slow
    /// downstream adapter.
    struct BlockedExecutor {
        release: Arc<tokio::sync::Notify>,
    }

    #[async_trait]
    impl ActionExecutor for BlockedExecutor {
        async fn execute(
            &self,
            _action_type: &str,
            _parameters: &JsonValue,
            _trigger_data: &JsonValue,
            _is_dry_run: bool,
        ) -> Result<ActionOutcome, AdapterError> {
            self.release.notified().await;
            Ok(ActionOutcome::applied(None))
        }
    }

    #[tokio::test]
    async fn sweep_returns_while_executions_are_still_in_flight() {
        let release = Arc::new(tokio::sync::Notify::new());
        let h = Harness::with_executor(
            ScriptedTaskQuery::default(),
            Arc::new(BlockedExecutor {
                release: release.clone(),
            }),
        );

        let wf = workflow(
            TenantId::new(),
            ProjectId::new(),
            TriggerSettings::schedule("* * * * *"),
        );
        let wf_id = wf.id;
        h.workflows.insert(wf).await.expect("insert");

        let report = h
            .scheduler
            .run_schedule_sweep(Utc::now())
            .await
            .expect("sweep");
        assert_eq!(report.started, 1);

        // The walk is parked on the blocked action, yet the sweep has
        // already returned and the admitted row is visible.
        let rows = h
            .executions
            .list_for_workflow(wf_id, 10)
            .await
            .expect("list");
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].status.is_terminal());

        release.notify_one();
        for _ in 0..100 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            let rows = h
                .executions
                .list_for_workflow(wf_id, 10)
                .await
                .expect("list");
            if rows[0].status.is_terminal() {
                break;
            }
        }
        let rows = h
            .executions
            .list_for_workflow(wf_id, 10)
            .await
            .expect("list");
        assert_eq!(rows[0].status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn bad_cron_bumps_the_error_counter_and_sweep_continues() {
        let tenant = TenantId::new();
        let project = ProjectId::new();
        let h = Harness::new(ScriptedTaskQuery::default());

        let broken = workflow(tenant, project, TriggerSettings::schedule("not a cron"));
        let broken_id = broken.id;
        h.workflows.insert(broken).await.expect("insert");

        let healthy = workflow(tenant, project, TriggerSettings::schedule("* * * * *"));
        let healthy_id = healthy.id;
        h.workflows.insert(healthy).await.expect("insert");

        let report = h
            .scheduler
            .run_schedule_sweep(Utc::now())
            .await
            .expect("sweep");
        assert_eq!(report.faults, 1);
        assert_eq!(report.started, 1);

        let stored = h
            .workflows
            .get(tenant, broken_id)
            .await
            .expect("get")
            .expect("present");
        assert_eq!(stored.metadata.error_count, 1);
        assert_eq!(stored.metadata.execution_count, 0);

        assert_eq!(
            h.executions
                .list_for_workflow(healthy_id, 10)
                .await
                .expect("list")
                .len(),
            1
        );
    }
}
