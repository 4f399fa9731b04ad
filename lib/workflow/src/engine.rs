//! The execution engine: walks a workflow graph for one trigger firing.
//!
//! The walk is breadth-first in definition order, visiting a node only
//! once all its predecessors are resolved. A node with a failed (and
//! not `continue_on_error`) or skipped predecessor is skipped. The same
//! walk serves real runs and dry runs; in dry-run mode no action ever
//! reaches the executor and every step duration is zero, so identical
//! inputs yield identical traces.

use crate::definition::Workflow;
use crate::error::EngineError;
use crate::execution::{
    ExecutionStatus, ExecutionStep, StepResult, Suggestion, TriggeredBy, WorkflowExecution,
};
use crate::node::{ConditionNodeConfig, ConditionOperator, Node, NodeConfig, NodeId};
use crate::rate_limit::{ExecutionRateLimiter, RateLimitDecision};
use crate::store::{ExecutionStore, WorkflowStore};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Infrastructure failure from an action or agent adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterError {
    pub reason: String,
}

impl AdapterError {
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "adapter failure: {}", self.reason)
    }
}

impl std::error::Error for AdapterError {}

/// The domain-level outcome of a real action invocation.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ActionOutcome {
    /// Whether the action was applied.
    pub success: bool,
    /// Structured detail about what was applied.
    pub detail: Option<JsonValue>,
    /// Rejection message when `success` is false.
    pub error: Option<String>,
}

impl ActionOutcome {
    /// An applied action.
    #[must_use]
    pub fn applied(detail: Option<JsonValue>) -> Self {
        Self {
            success: true,
            detail,
            error: None,
        }
    }

    /// A rejected action (domain failure, not infrastructure).
    #[must_use]
    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            success: false,
            detail: None,
            error: Some(error.into()),
        }
    }
}

/// Performs action nodes against the external action catalog.
///
/// Dry runs never reach this trait; the `is_dry_run` flag is part of
/// the contract so out-of-process executors can double-check.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Executes one catalog action.
    ///
    /// # Errors
    ///
    /// `Err` means the adapter itself failed (timeout, transport); a
    /// domain rejection is an `Ok` outcome with `success == false`.
    async fn execute(
        &self,
        action_type: &str,
        parameters: &JsonValue,
        trigger_data: &JsonValue,
        is_dry_run: bool,
    ) -> Result<ActionOutcome, AdapterError>;
}

/// Produces suggestions for agent nodes.
///
/// Advisors only suggest; the engine records the artifact and never
/// applies it.
#[async_trait]
pub trait AgentAdvisor: Send + Sync {
    /// Asks the agent collaborator for a suggestion.
    ///
    /// # Errors
    ///
    /// `Err` fails the agent step but never the execution.
    async fn advise(
        &self,
        instruction: &str,
        context: &JsonValue,
        trigger_data: &JsonValue,
    ) -> Result<Suggestion, AdapterError>;
}

/// Cooperative cancellation flag, checked between node visits.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Nodes already visited keep their results.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns true once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One request to run a workflow.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// Snapshot of the workflow to run.
    pub workflow: Workflow,
    /// What caused the run.
    pub triggered_by: TriggeredBy,
    /// The event/task snapshot conditions and actions see.
    pub trigger_data: JsonValue,
    /// When true, no action node causes an external side effect.
    pub is_dry_run: bool,
    /// Cancellation flag shared with the caller.
    pub cancel: CancelFlag,
}

impl ExecutionRequest {
    /// Creates a real-run request.
    #[must_use]
    pub fn new(workflow: Workflow, triggered_by: TriggeredBy, trigger_data: JsonValue) -> Self {
        Self {
            workflow,
            triggered_by,
            trigger_data,
            is_dry_run: false,
            cancel: CancelFlag::new(),
        }
    }

    /// Switches the request to dry-run mode.
    #[must_use]
    pub fn dry_run(mut self) -> Self {
        self.is_dry_run = true;
        self
    }

    /// Attaches an externally held cancellation flag.
    #[must_use]
    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }
}

/// How a resolved node affects its descendants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    /// Descendants may run.
    Pass,
    /// Failed, but flagged `continue_on_error`; descendants may run.
    FailOpen,
    /// Failed; descendants are skipped.
    FailClosed,
    /// Skipped; descendants are skipped.
    Skipped,
}

impl Resolution {
    fn blocks_descendants(self) -> bool {
        matches!(self, Self::FailClosed | Self::Skipped)
    }
}

/// What ends a walk early.
enum WalkStop {
    Cancelled,
    Fatal(String),
}

/// The workflow execution engine.
pub struct ExecutionEngine {
    workflows: Arc<dyn WorkflowStore>,
    executions: Arc<dyn ExecutionStore>,
    executor: Arc<dyn ActionExecutor>,
    advisor: Arc<dyn AgentAdvisor>,
    limiter: Arc<ExecutionRateLimiter>,
}

impl ExecutionEngine {
    /// Creates an engine with the standard rate limit.
    #[must_use]
    pub fn new(
        workflows: Arc<dyn WorkflowStore>,
        executions: Arc<dyn ExecutionStore>,
        executor: Arc<dyn ActionExecutor>,
        advisor: Arc<dyn AgentAdvisor>,
    ) -> Self {
        Self {
            workflows,
            executions,
            executor,
            advisor,
            limiter: Arc::new(ExecutionRateLimiter::new()),
        }
    }

    /// Replaces the rate limiter, for tests and tuning.
    #[must_use]
    pub fn with_rate_limiter(mut self, limiter: Arc<ExecutionRateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    /// Returns the engine's rate limiter, shared so callers can drop
    /// window state for deleted workflows.
    #[must_use]
    pub fn rate_limiter(&self) -> Arc<ExecutionRateLimiter> {
        self.limiter.clone()
    }

    /// Runs one workflow for one trigger firing, start to finish.
    ///
    /// Equivalent to [`Self::admit`] followed by [`Self::drive`];
    /// callers that must not block on slow adapters admit first and
    /// drive on their own task.
    ///
    /// # Errors
    ///
    /// [`EngineError::RateLimited`], [`EngineError::MalformedGraph`],
    /// or [`EngineError::Store`] when persistence fails.
    pub async fn run(&self, request: ExecutionRequest) -> Result<WorkflowExecution, EngineError> {
        let execution = self.admit(&request).await?;
        self.drive(request, execution).await
    }

    /// Admits one trigger firing: rate limit check, graph validation,
    /// and the queued execution row. A rejection persists nothing; an
    /// admitted real run is counted immediately, so duplicate-run
    /// suppression never races the walk.
    ///
    /// # Errors
    ///
    /// [`EngineError::RateLimited`], [`EngineError::MalformedGraph`],
    /// or [`EngineError::Store`] when persistence fails.
    pub async fn admit(
        &self,
        request: &ExecutionRequest,
    ) -> Result<WorkflowExecution, EngineError> {
        let workflow = &request.workflow;
        let now = Utc::now();

        match self.limiter.check_and_record(workflow.id, now) {
            RateLimitDecision::Allowed { remaining } => {
                debug!(workflow_id = %workflow.id, remaining, "rate limit check passed");
            }
            RateLimitDecision::Limited { retry_after } => {
                warn!(
                    workflow_id = %workflow.id,
                    retry_after_secs = retry_after.num_seconds(),
                    "workflow rate limited, dropping trigger firing"
                );
                return Err(EngineError::RateLimited {
                    workflow_id: workflow.id,
                    retry_after,
                });
            }
        }

        workflow
            .graph
            .compile()
            .map_err(|e| EngineError::MalformedGraph {
                reason: e.to_string(),
            })?;

        let execution = WorkflowExecution::queued(
            workflow.id,
            workflow.trigger_type(),
            request.triggered_by,
            request.trigger_data.clone(),
            request.is_dry_run,
        );
        self.executions.insert(execution.clone()).await?;

        if !request.is_dry_run {
            self.workflows
                .record_run(workflow.id, execution.started_at)
                .await?;
        }

        Ok(execution)
    }

    /// Walks an admitted execution to a terminal state.
    ///
    /// Step-level failures are captured into the returned execution
    /// record and do not surface as errors here.
    ///
    /// # Errors
    ///
    /// [`EngineError::MalformedGraph`] or [`EngineError::Store`] when
    /// persistence fails.
    pub async fn drive(
        &self,
        request: ExecutionRequest,
        mut execution: WorkflowExecution,
    ) -> Result<WorkflowExecution, EngineError> {
        let workflow = &request.workflow;

        let compiled = workflow
            .graph
            .compile()
            .map_err(|e| EngineError::MalformedGraph {
                reason: e.to_string(),
            })?;

        execution.begin();
        self.executions.update(execution.clone()).await?;

        info!(
            workflow_id = %workflow.id,
            execution_id = %execution.id,
            trigger_type = %workflow.trigger_type(),
            is_dry_run = request.is_dry_run,
            "execution started"
        );

        let mut resolved: HashMap<&NodeId, Resolution> = HashMap::new();
        let mut stop: Option<WalkStop> = None;

        // Definition-order scan repeated until no node becomes ready.
        // The node count is capped, so the quadratic scan is cheap and
        // keeps visit order deterministic.
        'walk: loop {
            let mut progressed = false;

            for node in &workflow.graph.nodes {
                if resolved.contains_key(&node.id) {
                    continue;
                }
                let predecessors = compiled.predecessors(&node.id);
                if predecessors
                    .iter()
                    .any(|(p, _)| !resolved.contains_key(&p.id))
                {
                    continue;
                }

                if request.cancel.is_cancelled() {
                    stop = Some(WalkStop::Cancelled);
                    break 'walk;
                }

                progressed = true;

                let blocked = predecessors
                    .iter()
                    .any(|(p, _)| resolved[&p.id].blocks_descendants());
                if blocked {
                    execution.record_step(ExecutionStep::skipped(node.id.clone(), node.kind()));
                    resolved.insert(&node.id, Resolution::Skipped);
                    continue;
                }

                let (step, resolution) = self.visit(node, &request, &execution).await;
                debug!(
                    execution_id = %execution.id,
                    node_id = %node.id,
                    status = ?step.status,
                    "node visited"
                );
                execution.record_step(step);

                match resolution {
                    Visit::Resolved(r) => {
                        resolved.insert(&node.id, r);
                    }
                    Visit::Fatal(reason) => {
                        resolved.insert(&node.id, Resolution::FailClosed);
                        stop = Some(WalkStop::Fatal(reason));
                        break 'walk;
                    }
                }
            }

            if !progressed {
                break;
            }
        }

        // Whatever was never resolved (early stop, or a malformed
        // stored graph that validation would have rejected) is recorded
        // as skipped so the trace covers every node.
        for node in &workflow.graph.nodes {
            if !resolved.contains_key(&node.id) {
                execution.record_step(ExecutionStep::skipped(node.id.clone(), node.kind()));
            }
        }

        match stop {
            Some(WalkStop::Cancelled) => execution.cancel(),
            Some(WalkStop::Fatal(reason)) => execution.fail(reason),
            None => execution.complete(),
        }

        self.executions.update(execution.clone()).await?;

        if !request.is_dry_run && execution.status == ExecutionStatus::Failed {
            self.workflows.record_failure(workflow.id).await?;
        }

        info!(
            workflow_id = %workflow.id,
            execution_id = %execution.id,
            status = ?execution.status,
            steps_executed = execution.steps_executed,
            steps_failed = execution.steps_failed,
            "execution finished"
        );

        Ok(execution)
    }

    async fn visit(
        &self,
        node: &Node,
        request: &ExecutionRequest,
        execution: &WorkflowExecution,
    ) -> (ExecutionStep, Visit) {
        match &node.config {
            NodeConfig::Trigger => (
                ExecutionStep::passed(node.id.clone(), node.kind(), None),
                Visit::Resolved(Resolution::Pass),
            ),
            NodeConfig::Condition(config) => self.visit_condition(node, config, request),
            NodeConfig::Action(config) => {
                if request.is_dry_run {
                    let result = StepResult::Simulated {
                        action_type: config.action_type.clone(),
                        parameters: config.parameters.clone(),
                    };
                    return (
                        ExecutionStep::passed(node.id.clone(), node.kind(), Some(result)),
                        Visit::Resolved(Resolution::Pass),
                    );
                }

                let started = Instant::now();
                let outcome = self
                    .executor
                    .execute(
                        &config.action_type,
                        &config.parameters,
                        &request.trigger_data,
                        false,
                    )
                    .await;
                let duration_ms = started.elapsed().as_millis() as u64;

                match outcome {
                    Ok(outcome) if outcome.success => {
                        let result = StepResult::Applied {
                            action_type: config.action_type.clone(),
                            detail: outcome.detail,
                        };
                        (
                            ExecutionStep::passed(node.id.clone(), node.kind(), Some(result))
                                .with_duration(duration_ms),
                            Visit::Resolved(Resolution::Pass),
                        )
                    }
                    Ok(outcome) => {
                        let resolution = if config.continue_on_error {
                            Resolution::FailOpen
                        } else {
                            Resolution::FailClosed
                        };
                        (
                            ExecutionStep::failed(
                                node.id.clone(),
                                node.kind(),
                                None,
                                outcome.error,
                            )
                            .with_duration(duration_ms),
                            Visit::Resolved(resolution),
                        )
                    }
                    Err(e) => {
                        warn!(
                            execution_id = %execution.id,
                            node_id = %node.id,
                            error = %e,
                            "action adapter failed"
                        );
                        let step = ExecutionStep::failed(
                            node.id.clone(),
                            node.kind(),
                            None,
                            Some(e.to_string()),
                        )
                        .with_duration(duration_ms);
                        if config.continue_on_error {
                            (step, Visit::Resolved(Resolution::FailOpen))
                        } else {
                            (step, Visit::Fatal(e.to_string()))
                        }
                    }
                }
            }
            NodeConfig::Agent(config) => {
                if request.is_dry_run {
                    // Dry runs must be reproducible, so the advisor is
                    // never consulted; the trace records that intent.
                    let result = StepResult::Suggested {
                        suggestion: Suggestion {
                            summary: format!("agent would be consulted: {}", config.instruction),
                            detail: config.context.clone(),
                        },
                    };
                    return (
                        ExecutionStep::passed(node.id.clone(), node.kind(), Some(result)),
                        Visit::Resolved(Resolution::Pass),
                    );
                }

                let started = Instant::now();
                let advice = self
                    .advisor
                    .advise(&config.instruction, &config.context, &request.trigger_data)
                    .await;
                let duration_ms = started.elapsed().as_millis() as u64;

                match advice {
                    Ok(suggestion) => {
                        let result = StepResult::Suggested { suggestion };
                        (
                            ExecutionStep::passed(node.id.clone(), node.kind(), Some(result))
                                .with_duration(duration_ms),
                            Visit::Resolved(Resolution::Pass),
                        )
                    }
                    Err(e) => {
                        warn!(
                            execution_id = %execution.id,
                            node_id = %node.id,
                            error = %e,
                            "agent advisor failed"
                        );
                        (
                            ExecutionStep::failed(
                                node.id.clone(),
                                node.kind(),
                                None,
                                Some(e.to_string()),
                            )
                            .with_duration(duration_ms),
                            Visit::Resolved(Resolution::FailClosed),
                        )
                    }
                }
            }
        }
    }

    fn visit_condition(
        &self,
        node: &Node,
        config: &ConditionNodeConfig,
        request: &ExecutionRequest,
    ) -> (ExecutionStep, Visit) {
        match evaluate_condition(config, &request.trigger_data, &request.workflow.variables) {
            Ok((satisfied, actual)) => {
                let result = StepResult::Matched {
                    field: config.field.clone(),
                    expected: config.value.clone(),
                    actual,
                    satisfied,
                };
                if satisfied {
                    (
                        ExecutionStep::passed(node.id.clone(), node.kind(), Some(result)),
                        Visit::Resolved(Resolution::Pass),
                    )
                } else {
                    // A false condition is the branch gate working as
                    // intended; continue_on_error does not reopen it.
                    (
                        ExecutionStep::failed(node.id.clone(), node.kind(), Some(result), None),
                        Visit::Resolved(Resolution::FailClosed),
                    )
                }
            }
            Err(reason) => {
                let step = ExecutionStep::failed(
                    node.id.clone(),
                    node.kind(),
                    None,
                    Some(reason.clone()),
                );
                if config.continue_on_error {
                    (step, Visit::Resolved(Resolution::FailOpen))
                } else {
                    (step, Visit::Fatal(reason))
                }
            }
        }
    }
}

enum Visit {
    Resolved(Resolution),
    Fatal(String),
}

/// Looks up a dotted field path in the trigger data, falling back to
/// workflow variables on a miss.
fn lookup_field(
    field: &str,
    trigger_data: &JsonValue,
    variables: &serde_json::Map<String, JsonValue>,
) -> Option<JsonValue> {
    let mut current = trigger_data;
    for part in field.split('.') {
        match current.get(part) {
            Some(next) => current = next,
            None => return variables.get(field).cloned(),
        }
    }
    Some(current.clone())
}

/// Evaluates a condition predicate.
///
/// Returns the verdict and the actual value seen, or a reason when the
/// predicate cannot be evaluated against the data it got.
fn evaluate_condition(
    config: &ConditionNodeConfig,
    trigger_data: &JsonValue,
    variables: &serde_json::Map<String, JsonValue>,
) -> Result<(bool, Option<JsonValue>), String> {
    let actual = lookup_field(&config.field, trigger_data, variables);

    let satisfied = match config.operator {
        ConditionOperator::Exists => actual.is_some(),
        ConditionOperator::Equals => actual.as_ref() == Some(&config.value),
        ConditionOperator::NotEquals => actual.as_ref() != Some(&config.value),
        ConditionOperator::OneOf => {
            let options = config
                .value
                .as_array()
                .ok_or_else(|| format!("one_of on '{}' requires an array value", config.field))?;
            actual.as_ref().is_some_and(|a| options.contains(a))
        }
        ConditionOperator::Contains => {
            let needle = config
                .value
                .as_str()
                .ok_or_else(|| format!("contains on '{}' requires a string value", config.field))?;
            let haystack = actual
                .as_ref()
                .and_then(JsonValue::as_str)
                .ok_or_else(|| format!("field '{}' is not a string", config.field))?;
            haystack.contains(needle)
        }
        ConditionOperator::GreaterThan | ConditionOperator::LessThan => {
            let expected = config
                .value
                .as_f64()
                .ok_or_else(|| format!("comparison on '{}' requires a numeric value", config.field))?;
            let observed = actual
                .as_ref()
                .and_then(JsonValue::as_f64)
                .ok_or_else(|| format!("field '{}' is not a number", config.field))?;
            if config.operator == ConditionOperator::GreaterThan {
                observed > expected
            } else {
                observed < expected
            }
        }
    };

    Ok((satisfied, actual))
}
