//! Error types for the workflow crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `ValidationError`: graph/trigger validation failures, surfaced
//!   synchronously to the caller; nothing is persisted
//! - `StoreError`: persistence failures
//! - `EngineError`: execution-creation failures (runtime step failures
//!   are captured into the execution record instead)
//! - `WorkflowError`: high-level service operations (wraps lower errors)

use crate::node::NodeId;
use chrono::Duration;
use std::fmt;
use tidemark_core::{ProjectId, WorkflowId};

/// Errors from graph and trigger validation.
///
/// These are reported to the workflow author at create/update/activate
/// time; the offending write is rejected in full, never truncated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// An edge references a node id that does not exist in the graph.
    UnknownNode {
        edge_id: String,
        node_id: NodeId,
    },
    /// The graph exceeds the node-count ceiling.
    NodeLimitExceeded { count: usize, limit: usize },
    /// The graph contains a cycle; `nodes` are the participants.
    CycleDetected { nodes: Vec<NodeId> },
    /// An automatic trigger type requires at least one trigger node.
    MissingTriggerNode { trigger_type: String },
    /// A trigger node has an incoming edge.
    TriggerHasIncomingEdge { node_id: NodeId },
    /// A non-trigger node is unreachable from any trigger node.
    DetachedNode { node_id: NodeId },
    /// The trigger configuration is malformed for its trigger type.
    InvalidTriggerConfig { reason: String },
    /// The project already has the maximum number of active workflows.
    ActiveLimitExceeded { project_id: ProjectId, limit: usize },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownNode { edge_id, node_id } => {
                write!(f, "edge '{edge_id}' references unknown node '{node_id}'")
            }
            Self::NodeLimitExceeded { count, limit } => {
                write!(f, "graph has {count} nodes, exceeding the limit of {limit}")
            }
            Self::CycleDetected { nodes } => {
                let ids: Vec<&str> = nodes.iter().map(NodeId::as_str).collect();
                write!(f, "graph contains a cycle through nodes [{}]", ids.join(", "))
            }
            Self::MissingTriggerNode { trigger_type } => {
                write!(f, "trigger type '{trigger_type}' requires a trigger node")
            }
            Self::TriggerHasIncomingEdge { node_id } => {
                write!(f, "trigger node '{node_id}' must not have incoming edges")
            }
            Self::DetachedNode { node_id } => {
                write!(f, "node '{node_id}' is not reachable from any trigger node")
            }
            Self::InvalidTriggerConfig { reason } => {
                write!(f, "invalid trigger config: {reason}")
            }
            Self::ActiveLimitExceeded { project_id, limit } => {
                write!(
                    f,
                    "project {project_id} already has {limit} active workflows"
                )
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Errors from workflow/execution persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backing store could not be reached or rejected the write.
    Unavailable { reason: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable { reason } => write!(f, "store unavailable: {reason}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Errors raised before or while creating an execution.
///
/// Once an execution row exists, step failures are captured into its
/// trace and never propagate out of the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The workflow hit its executions-per-hour bound; nothing was
    /// persisted. An expected throttle outcome, logged as a warning.
    RateLimited {
        workflow_id: WorkflowId,
        retry_after: Duration,
    },
    /// The stored graph failed to compile at runtime.
    MalformedGraph { reason: String },
    /// Persistence failed.
    Store(StoreError),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimited {
                workflow_id,
                retry_after,
            } => {
                write!(
                    f,
                    "workflow {workflow_id} is rate limited, retry in {}s",
                    retry_after.num_seconds()
                )
            }
            Self::MalformedGraph { reason } => write!(f, "malformed graph: {reason}"),
            Self::Store(e) => write!(f, "execution persistence failed: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

/// High-level workflow service errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    /// Workflow not found in the caller's tenant.
    NotFound { workflow_id: WorkflowId },
    /// Invalid lifecycle transition.
    InvalidStateTransition { from: String, to: String },
    /// Validation rejected the write.
    Validation(ValidationError),
    /// Persistence failed.
    Store(StoreError),
    /// Execution could not be created.
    Engine(EngineError),
}

impl fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { workflow_id } => {
                write!(f, "workflow not found: {workflow_id}")
            }
            Self::InvalidStateTransition { from, to } => {
                write!(f, "invalid state transition from {from} to {to}")
            }
            Self::Validation(e) => write!(f, "validation failed: {e}"),
            Self::Store(e) => write!(f, "store operation failed: {e}"),
            Self::Engine(e) => write!(f, "engine invocation failed: {e}"),
        }
    }
}

impl std::error::Error for WorkflowError {}

impl From<ValidationError> for WorkflowError {
    fn from(e: ValidationError) -> Self {
        Self::Validation(e)
    }
}

impl From<StoreError> for WorkflowError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<EngineError> for WorkflowError {
    fn from(e: EngineError) -> Self {
        Self::Engine(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_error_names_participants() {
        let err = ValidationError::CycleDetected {
            nodes: vec![NodeId::from("a"), NodeId::from("b")],
        };
        let msg = err.to_string();
        assert!(msg.contains("a"));
        assert!(msg.contains("b"));
        assert!(msg.contains("cycle"));
    }

    #[test]
    fn node_limit_error_display() {
        let err = ValidationError::NodeLimitExceeded {
            count: 51,
            limit: 50,
        };
        assert!(err.to_string().contains("51"));
        assert!(err.to_string().contains("50"));
    }

    #[test]
    fn rate_limited_display() {
        let err = EngineError::RateLimited {
            workflow_id: WorkflowId::new(),
            retry_after: Duration::seconds(90),
        };
        assert!(err.to_string().contains("rate limited"));
        assert!(err.to_string().contains("90"));
    }

    #[test]
    fn workflow_error_wraps_validation() {
        let err: WorkflowError = ValidationError::NodeLimitExceeded {
            count: 60,
            limit: 50,
        }
        .into();
        assert!(matches!(err, WorkflowError::Validation(_)));
    }
}
