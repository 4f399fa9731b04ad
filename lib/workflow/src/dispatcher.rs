//! Fan-out from domain events to workflow executions.
//!
//! The dispatcher owns the event side of the engine: it consumes task
//! events from an [`EventSource`], looks up runnable workflows scoped
//! to the event's tenant, runs the trigger matcher, and spawns one task
//! per match. A slow or failing workflow never delays the others, and a
//! rate-limited one is dropped with a warning.

use crate::engine::{AdapterError, ExecutionEngine, ExecutionRequest};
use crate::error::{EngineError, StoreError};
use crate::event::TaskEvent;
use crate::execution::TriggeredBy;
use crate::matcher;
use crate::store::WorkflowStore;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Consecutive source failures tolerated before the run loop gives up.
const MAX_SOURCE_RETRIES: u32 = 3;

/// Base delay between source retries; doubles per attempt.
const SOURCE_RETRY_BASE: Duration = Duration::from_millis(500);

/// A stream of task events.
///
/// Production uses the NATS-backed source; tests script one.
#[async_trait]
pub trait EventSource: Send {
    /// Returns the next event, or `None` once the source is closed.
    ///
    /// # Errors
    ///
    /// `Err` signals a transient infrastructure failure; the run loop
    /// retries with backoff before giving up.
    async fn next_event(&mut self) -> Result<Option<TaskEvent>, AdapterError>;
}

/// Dispatches task events to matching workflows.
pub struct EventDispatcher {
    workflows: Arc<dyn WorkflowStore>,
    engine: Arc<ExecutionEngine>,
}

impl EventDispatcher {
    #[must_use]
    pub fn new(workflows: Arc<dyn WorkflowStore>, engine: Arc<ExecutionEngine>) -> Self {
        Self { workflows, engine }
    }

    /// Fans one event out to every matching workflow in its tenant.
    ///
    /// Each match runs in its own spawned task; the returned handles
    /// let callers track completion, and dropping them detaches the
    /// runs. Non-matching and non-runnable workflows are skipped
    /// silently.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the candidate lookup fails; nothing
    /// has been spawned in that case.
    pub async fn dispatch(&self, event: &TaskEvent) -> Result<Vec<JoinHandle<()>>, StoreError> {
        let trigger_type = event.trigger_type();
        let candidates = self
            .workflows
            .list_runnable(event.tenant_id, trigger_type)
            .await?;

        debug!(
            event_id = %event.id,
            tenant_id = %event.tenant_id,
            kind = %event.kind,
            candidates = candidates.len(),
            "dispatching task event"
        );

        let mut handles = Vec::new();
        for workflow in candidates {
            if !matcher::matches(workflow.trigger.filters.as_ref(), &event.data) {
                continue;
            }

            let engine = self.engine.clone();
            let workflow_id = workflow.id;
            let request = ExecutionRequest::new(
                workflow,
                TriggeredBy::Event { event_id: event.id },
                event.data.clone(),
            );

            handles.push(tokio::spawn(async move {
                match engine.run(request).await {
                    Ok(execution) => {
                        info!(
                            workflow_id = %workflow_id,
                            execution_id = %execution.id,
                            status = ?execution.status,
                            "event-triggered execution finished"
                        );
                    }
                    Err(EngineError::RateLimited { retry_after, .. }) => {
                        warn!(
                            workflow_id = %workflow_id,
                            retry_after_secs = retry_after.num_seconds(),
                            "event dropped: workflow rate limited"
                        );
                    }
                    Err(e) => {
                        error!(
                            workflow_id = %workflow_id,
                            error = %e,
                            "event-triggered execution failed to start"
                        );
                    }
                }
            }));
        }

        Ok(handles)
    }

    /// Consumes a source until it closes.
    ///
    /// Transient source errors are retried with exponential backoff;
    /// dispatch-side store failures are logged and the loop keeps
    /// going, since the next event may succeed.
    ///
    /// # Errors
    ///
    /// Returns the last source error once the retry budget is spent.
    pub async fn run<S: EventSource>(&self, mut source: S) -> Result<(), AdapterError> {
        let mut retries = 0u32;

        loop {
            match source.next_event().await {
                Ok(Some(event)) => {
                    retries = 0;
                    if let Err(e) = self.dispatch(&event).await {
                        error!(event_id = %event.id, error = %e, "dispatch lookup failed");
                    }
                }
                Ok(None) => {
                    info!("event source closed, dispatcher stopping");
                    return Ok(());
                }
                Err(e) => {
                    retries += 1;
                    if retries > MAX_SOURCE_RETRIES {
                        error!(error = %e, "event source failed, retry budget spent");
                        return Err(e);
                    }
                    let delay = SOURCE_RETRY_BASE * 2u32.pow(retries - 1);
                    warn!(
                        error = %e,
                        attempt = retries,
                        delay_ms = delay.as_millis() as u64,
                        "event source error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::Workflow;
    use crate::edge::Edge;
    use crate::engine::{ActionExecutor, ActionOutcome, AgentAdvisor};
    use crate::event::TaskEventKind;
    use crate::execution::Suggestion;
    use crate::graph::WorkflowGraph;
    use crate::matcher::{FilterSet, TriggerFilters};
    use crate::node::{ActionNodeConfig, Node, NodeConfig};
    use crate::store::{ExecutionStore, InMemoryExecutionStore, InMemoryWorkflowStore};
    use crate::trigger::{TriggerSettings, TriggerType};
    use serde_json::{Value as JsonValue, json};
    use std::collections::VecDeque;
    use tidemark_core::{ProjectId, TenantId};

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

    struct ScriptedSource {
        items: VecDeque<Result<Option<TaskEvent>, AdapterError>>,
    }

    #[async_trait]
    impl EventSource for ScriptedSource {
        async fn next_event(&mut self) -> Result<Option<TaskEvent>, AdapterError> {
            self.items.pop_front().unwrap_or(Ok(None))
        }
    }

    fn workflow(tenant: TenantId, filters: Option<TriggerFilters>) -> Workflow {
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

        let mut settings = TriggerSettings::event(TriggerType::TaskCreated);
        settings.filters = filters;
        let mut wf = Workflow::new(tenant, ProjectId::new(), "wf", settings, graph);
        wf.activate().expect("activate");
        wf
    }

    struct Harness {
        workflows: Arc<InMemoryWorkflowStore>,
        executions: Arc<InMemoryExecutionStore>,
        dispatcher: EventDispatcher,
    }

    impl Harness {
        fn new() -> Self {
            let workflows = Arc::new(InMemoryWorkflowStore::new());
            let executions = Arc::new(InMemoryExecutionStore::new());
            let engine = Arc::new(ExecutionEngine::new(
                workflows.clone(),
                executions.clone(),
                Arc::new(NoopExecutor),
                Arc::new(NoopAdvisor),
            ));
            let dispatcher = EventDispatcher::new(workflows.clone(), engine);
            Self {
                workflows,
                executions,
                dispatcher,
            }
        }
    }

    #[tokio::test]
    async fn dispatch_runs_matching_workflows() {
        let h = Harness::new();
        let tenant = TenantId::new();
        let wf = workflow(tenant, None);
        let wf_id = wf.id;
        h.workflows.insert(wf).await.expect("insert");

        let event = TaskEvent::new(tenant, TaskEventKind::TaskCreated, json!({"title": "x"}));
        let handles = h.dispatcher.dispatch(&event).await.expect("dispatch");
        assert_eq!(handles.len(), 1);
        for handle in handles {
            handle.await.expect("join");
        }

        let rows = h
            .executions
            .list_for_workflow(wf_id, 10)
            .await
            .expect("list");
        assert_eq!(rows.len(), 1);
        assert!(matches!(
            rows[0].triggered_by,
            TriggeredBy::Event { event_id } if event_id == event.id
        ));
    }

    #[tokio::test]
    async fn dispatch_is_tenant_isolated() {
        let h = Harness::new();
        let tenant = TenantId::new();
        let foreign = workflow(TenantId::new(), None);
        h.workflows.insert(foreign).await.expect("insert");

        let event = TaskEvent::new(tenant, TaskEventKind::TaskCreated, json!({}));
        let handles = h.dispatcher.dispatch(&event).await.expect("dispatch");
        assert!(handles.is_empty());
    }

    #[tokio::test]
    async fn dispatch_respects_filters() {
        let h = Harness::new();
        let tenant = TenantId::new();
        let filters = TriggerFilters {
            priority: Some(FilterSet::scalar("high")),
            ..Default::default()
        };
        let wf = workflow(tenant, Some(filters));
        let wf_id = wf.id;
        h.workflows.insert(wf).await.expect("insert");

        let miss = TaskEvent::new(tenant, TaskEventKind::TaskCreated, json!({"priority": "low"}));
        assert!(h.dispatcher.dispatch(&miss).await.expect("dispatch").is_empty());

        let hit = TaskEvent::new(tenant, TaskEventKind::TaskCreated, json!({"priority": "high"}));
        let handles = h.dispatcher.dispatch(&hit).await.expect("dispatch");
        assert_eq!(handles.len(), 1);
        for handle in handles {
            handle.await.expect("join");
        }
        assert_eq!(
            h.executions
                .list_for_workflow(wf_id, 10)
                .await
                .expect("list")
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn dispatch_skips_paused_workflows() {
        let h = Harness::new();
        let tenant = TenantId::new();
        let mut wf = workflow(tenant, None);
        wf.pause().expect("pause");
        h.workflows.insert(wf).await.expect("insert");

        let event = TaskEvent::new(tenant, TaskEventKind::TaskCreated, json!({}));
        assert!(h.dispatcher.dispatch(&event).await.expect("dispatch").is_empty());
    }

    #[tokio::test]
    async fn run_loop_drains_the_source() {
        let h = Harness::new();
        let tenant = TenantId::new();
        let wf = workflow(tenant, None);
        let wf_id = wf.id;
        h.workflows.insert(wf).await.expect("insert");

        let source = ScriptedSource {
            items: VecDeque::from([
                Ok(Some(TaskEvent::new(
                    tenant,
                    TaskEventKind::TaskCreated,
                    json!({}),
                ))),
                Ok(Some(TaskEvent::new(
                    tenant,
                    TaskEventKind::TaskCreated,
                    json!({}),
                ))),
                Ok(None),
            ]),
        };
        h.dispatcher.run(source).await.expect("run");

        // Spawned runs race the loop shutdown; poll briefly.
        for _ in 0..50 {
            let n = h
                .executions
                .list_for_workflow(wf_id, 10)
                .await
                .expect("list")
                .len();
            if n == 2 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected 2 executions");
    }

    #[tokio::test]
    async fn run_loop_gives_up_after_retries() {
        tokio::time::pause();
        let h = Harness::new();
        let source = ScriptedSource {
            items: VecDeque::from([
                Err(AdapterError::new("down")),
                Err(AdapterError::new("down")),
                Err(AdapterError::new("down")),
                Err(AdapterError::new("down")),
            ]),
        };
        let result = h.dispatcher.run(source).await;
        assert!(result.is_err());
    }
}
