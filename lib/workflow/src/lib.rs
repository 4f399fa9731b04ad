//! Workflow automation engine for the tidemark platform.
//!
//! This crate provides the automation subsystem that watches domain
//! events and time-based schedules and executes user-authored workflow
//! graphs, including:
//!
//! - **Graph Model**: flat node/edge arrays compiled into petgraph for
//!   validation and traversal
//! - **Node Types**: Trigger, Condition, Action, Agent
//! - **Trigger Matching**: filter predicates evaluated against task events
//! - **Execution**: a state machine per run with a persisted step trace,
//!   supporting both real and dry-run walks
//! - **Dispatch**: tenant-scoped fan-out from the domain event bus
//! - **Rate Limiting**: per-workflow executions-per-hour bounds

pub mod definition;
pub mod dispatcher;
pub mod edge;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod event;
pub mod execution;
pub mod graph;
pub mod matcher;
pub mod nats;
pub mod node;
pub mod rate_limit;
pub mod service;
pub mod store;
pub mod trigger;

pub use definition::{Workflow, WorkflowMetadata, WorkflowStatus};
pub use dispatcher::{EventDispatcher, EventSource};
pub use edge::{Edge, EdgeId};
pub use engine::{
    ActionExecutor, ActionOutcome, AdapterError, AgentAdvisor, CancelFlag, ExecutionEngine,
    ExecutionRequest,
};
pub use envelope::Envelope;
pub use error::{EngineError, StoreError, ValidationError, WorkflowError};
pub use event::{TaskEvent, TaskEventKind};
pub use execution::{
    ExecutionStatus, ExecutionStep, StepResult, StepStatus, Suggestion, TriggeredBy,
    WorkflowExecution,
};
pub use graph::{CompiledGraph, MAX_NODES, WorkflowGraph};
pub use matcher::{FilterSet, TriggerFilters};
pub use nats::{NatsActionExecutor, NatsAgentAdvisor, NatsConfig, NatsEventSource};
pub use node::{Node, NodeConfig, NodeId, NodeKind};
pub use rate_limit::{ExecutionRateLimiter, RateLimitDecision};
pub use service::{WorkflowService, WorkflowUpdate};
pub use store::{ExecutionStore, InMemoryExecutionStore, InMemoryWorkflowStore, WorkflowStore};
pub use trigger::{TriggerSettings, TriggerType};
