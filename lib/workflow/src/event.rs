//! Domain events consumed from the task event bus.
//!
//! The engine subscribes to a fixed set of event types. The mapping
//! from event kind to trigger type is a single static table so the
//! dispatch path stays auditable and testable without a running bus.

use crate::trigger::TriggerType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tidemark_core::{EventId, TenantId};

/// The event types the dispatcher subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskEventKind {
    /// A task was created.
    TaskCreated,
    /// A task's status changed.
    TaskStatusChanged,
    /// A task was assigned.
    TaskAssigned,
    /// A task was completed.
    TaskCompleted,
}

impl TaskEventKind {
    /// Returns the bus subject for this event kind.
    #[must_use]
    pub fn subject(&self) -> &'static str {
        match self {
            Self::TaskCreated => "task.created",
            Self::TaskStatusChanged => "task.status_changed",
            Self::TaskAssigned => "task.assigned",
            Self::TaskCompleted => "task.completed",
        }
    }

    /// Parses a bus subject into an event kind.
    #[must_use]
    pub fn from_subject(subject: &str) -> Option<Self> {
        match subject {
            "task.created" => Some(Self::TaskCreated),
            "task.status_changed" => Some(Self::TaskStatusChanged),
            "task.assigned" => Some(Self::TaskAssigned),
            "task.completed" => Some(Self::TaskCompleted),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.subject())
    }
}

/// The subscription table: which trigger type each event kind feeds.
pub const SUBSCRIPTIONS: [(TaskEventKind, TriggerType); 4] = [
    (TaskEventKind::TaskCreated, TriggerType::TaskCreated),
    (
        TaskEventKind::TaskStatusChanged,
        TriggerType::TaskStatusChanged,
    ),
    (TaskEventKind::TaskAssigned, TriggerType::TaskAssigned),
    (TaskEventKind::TaskCompleted, TriggerType::TaskCompleted),
];

/// Returns the trigger type an event kind feeds.
#[must_use]
pub fn trigger_type_for(kind: TaskEventKind) -> TriggerType {
    match kind {
        TaskEventKind::TaskCreated => TriggerType::TaskCreated,
        TaskEventKind::TaskStatusChanged => TriggerType::TaskStatusChanged,
        TaskEventKind::TaskAssigned => TriggerType::TaskAssigned,
        TaskEventKind::TaskCompleted => TriggerType::TaskCompleted,
    }
}

/// A domain event delivered by the task event bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    /// Unique event id (becomes `triggered_by` on executions).
    pub id: EventId,
    /// The tenant the event belongs to. Workflow lookup is always
    /// scoped by this id.
    pub tenant_id: TenantId,
    /// The event kind.
    pub kind: TaskEventKind,
    /// The task snapshot carried by the event.
    pub data: JsonValue,
    /// When the event occurred.
    pub occurred_at: DateTime<Utc>,
}

impl TaskEvent {
    /// Creates a new event.
    #[must_use]
    pub fn new(tenant_id: TenantId, kind: TaskEventKind, data: JsonValue) -> Self {
        Self {
            id: EventId::new(),
            tenant_id,
            kind,
            data,
            occurred_at: Utc::now(),
        }
    }

    /// Returns the trigger type this event feeds.
    #[must_use]
    pub fn trigger_type(&self) -> TriggerType {
        trigger_type_for(self.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn subjects_roundtrip() {
        for (kind, _) in SUBSCRIPTIONS {
            assert_eq!(TaskEventKind::from_subject(kind.subject()), Some(kind));
        }
    }

    #[test]
    fn unknown_subject_is_none() {
        assert_eq!(TaskEventKind::from_subject("task.deleted"), None);
    }

    #[test]
    fn every_kind_has_a_trigger_type() {
        assert_eq!(
            trigger_type_for(TaskEventKind::TaskStatusChanged),
            TriggerType::TaskStatusChanged
        );
        assert_eq!(
            trigger_type_for(TaskEventKind::TaskCompleted),
            TriggerType::TaskCompleted
        );
    }

    #[test]
    fn event_serde_roundtrip() {
        let event = TaskEvent::new(
            TenantId::new(),
            TaskEventKind::TaskCreated,
            json!({"status": "todo", "title": "Write the report"}),
        );
        let json = serde_json::to_string(&event).expect("serialize");
        let parsed: TaskEvent = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(event, parsed);
    }
}
