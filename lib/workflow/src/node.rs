//! Workflow node types and configurations.
//!
//! Nodes are the building blocks of workflow graphs. Each node has:
//! - An ID, unique within the workflow (supplied by the graph editor,
//!   or minted here for programmatic construction)
//! - A kind (Trigger, Condition, Action, Agent)
//! - Configuration specific to its kind
//! - An editor canvas position

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use ulid::Ulid;

/// A unique identifier for a node within a workflow.
///
/// The visual editor authors node ids, so this is a string newtype
/// rather than a raw ULID; generated ids still use the `node_<ulid>`
/// form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Mints a new node ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("node_{}", Ulid::new()))
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kind of a workflow node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Entry point bound to the workflow's trigger.
    Trigger,
    /// Predicate deciding whether a branch continues.
    Condition,
    /// External side effect (or its dry-run simulation).
    Action,
    /// Delegation to a suggestion-producing collaborator.
    Agent,
}

/// Editor canvas position for a node.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Comparison operators for condition predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    /// Field equals the configured value.
    Equals,
    /// Field differs from the configured value.
    NotEquals,
    /// Field is a member of the configured array.
    OneOf,
    /// Field (a string) contains the configured substring.
    Contains,
    /// Field is present on the trigger data.
    Exists,
    /// Field (a number) is greater than the configured value.
    GreaterThan,
    /// Field (a number) is less than the configured value.
    LessThan,
}

/// Configuration for condition nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionNodeConfig {
    /// Dotted path into the trigger data (falling back to workflow
    /// variables), e.g. `"status"` or `"task.priority"`.
    pub field: String,
    /// The comparison to apply.
    pub operator: ConditionOperator,
    /// The value compared against (ignored for `Exists`).
    #[serde(default)]
    pub value: JsonValue,
    /// When true, an evaluation error is treated as a failed step
    /// instead of aborting the execution.
    #[serde(default)]
    pub continue_on_error: bool,
}

/// Configuration for action nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionNodeConfig {
    /// The catalog action to invoke (e.g. "notify", "assign_task").
    pub action_type: String,
    /// Action-specific parameters, resolved against trigger data by
    /// the catalog.
    #[serde(default)]
    pub parameters: JsonValue,
    /// When true, a failed action does not block downstream nodes.
    #[serde(default)]
    pub continue_on_error: bool,
}

/// Configuration for agent nodes.
///
/// Agent nodes are suggestion-only: the collaborator's output is
/// appended to the trace and never applied by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentNodeConfig {
    /// Instruction given to the agent collaborator.
    pub instruction: String,
    /// Optional structured context forwarded alongside trigger data.
    #[serde(default)]
    pub context: JsonValue,
}

/// Kind-specific node configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeConfig {
    /// Trigger entry point; the trigger details live on the workflow's
    /// [`TriggerSettings`](crate::trigger::TriggerSettings).
    Trigger,
    /// Condition predicate.
    Condition(ConditionNodeConfig),
    /// External action.
    Action(ActionNodeConfig),
    /// Agent delegation.
    Agent(AgentNodeConfig),
}

impl NodeConfig {
    /// Returns the node kind implied by this configuration.
    #[must_use]
    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Trigger => NodeKind::Trigger,
            Self::Condition(_) => NodeKind::Condition,
            Self::Action(_) => NodeKind::Action,
            Self::Agent(_) => NodeKind::Agent,
        }
    }

    /// Returns whether a failure of this node lets the walk proceed
    /// past it.
    #[must_use]
    pub fn continue_on_error(&self) -> bool {
        match self {
            Self::Condition(c) => c.continue_on_error,
            Self::Action(a) => a.continue_on_error,
            Self::Trigger | Self::Agent(_) => false,
        }
    }
}

/// A node in a workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique id within the workflow.
    pub id: NodeId,
    /// Human-readable label shown in the editor.
    pub name: String,
    /// Editor canvas position.
    #[serde(default)]
    pub position: Position,
    /// Kind-specific configuration.
    pub config: NodeConfig,
}

impl Node {
    /// Creates a node with a generated id.
    #[must_use]
    pub fn new(name: impl Into<String>, config: NodeConfig) -> Self {
        Self {
            id: NodeId::generate(),
            name: name.into(),
            position: Position::default(),
            config,
        }
    }

    /// Creates a node with an editor-supplied id.
    #[must_use]
    pub fn with_id(id: impl Into<NodeId>, name: impl Into<String>, config: NodeConfig) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            position: Position::default(),
            config,
        }
    }

    /// Returns the node kind.
    #[must_use]
    pub fn kind(&self) -> NodeKind {
        self.config.kind()
    }

    /// Returns true for trigger nodes.
    #[must_use]
    pub fn is_trigger(&self) -> bool {
        self.kind() == NodeKind::Trigger
    }
}
