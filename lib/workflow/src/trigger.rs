//! Trigger configuration for workflows.
//!
//! A workflow carries exactly one trigger: either one of the four task
//! event types, a time-based trigger (due-date proximity or a custom
//! cron schedule), or manual invocation. Event triggers may narrow
//! their match with [filter predicates](crate::matcher::TriggerFilters).

use crate::error::ValidationError;
use crate::matcher::TriggerFilters;
use serde::{Deserialize, Serialize};

/// The type of trigger that causes a workflow to be considered for
/// execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    /// A task was created.
    TaskCreated,
    /// A task's status changed.
    TaskStatusChanged,
    /// A task was assigned.
    TaskAssigned,
    /// A task's due date is approaching (daily sweep).
    DueDateApproaching,
    /// A task was completed.
    TaskCompleted,
    /// A user-supplied cron schedule (per-minute sweep).
    CustomSchedule,
    /// User-initiated only.
    Manual,
}

impl TriggerType {
    /// Returns true for triggers that fire without user action; such
    /// workflows must contain a trigger node.
    #[must_use]
    pub fn is_automatic(&self) -> bool {
        !matches!(self, Self::Manual)
    }

    /// Returns true for triggers driven by the domain event bus.
    #[must_use]
    pub fn is_event_driven(&self) -> bool {
        matches!(
            self,
            Self::TaskCreated | Self::TaskStatusChanged | Self::TaskAssigned | Self::TaskCompleted
        )
    }

    /// Returns true for triggers driven by the scheduler sweeps.
    #[must_use]
    pub fn is_time_driven(&self) -> bool {
        matches!(self, Self::DueDateApproaching | Self::CustomSchedule)
    }
}

impl std::fmt::Display for TriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::TaskCreated => "task_created",
            Self::TaskStatusChanged => "task_status_changed",
            Self::TaskAssigned => "task_assigned",
            Self::DueDateApproaching => "due_date_approaching",
            Self::TaskCompleted => "task_completed",
            Self::CustomSchedule => "custom_schedule",
            Self::Manual => "manual",
        };
        write!(f, "{s}")
    }
}

/// A workflow's trigger: the type plus its type-specific configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerSettings {
    /// The trigger type.
    pub trigger_type: TriggerType,
    /// Event filter predicates (event-driven triggers only). Absent
    /// filters match every event of the trigger type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<TriggerFilters>,
    /// Cron expression (custom_schedule only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
    /// How many days before the due date the sweep should fire
    /// (due_date_approaching only, default 1).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_before_due: Option<i64>,
}

impl TriggerSettings {
    /// Creates settings for an event-driven trigger without filters.
    #[must_use]
    pub fn event(trigger_type: TriggerType) -> Self {
        Self {
            trigger_type,
            filters: None,
            cron: None,
            days_before_due: None,
        }
    }

    /// Creates settings for a manual trigger.
    #[must_use]
    pub fn manual() -> Self {
        Self::event(TriggerType::Manual)
    }

    /// Creates settings for a custom schedule.
    #[must_use]
    pub fn schedule(cron: impl Into<String>) -> Self {
        Self {
            trigger_type: TriggerType::CustomSchedule,
            filters: None,
            cron: Some(cron.into()),
            days_before_due: None,
        }
    }

    /// Creates settings for a due-date trigger.
    #[must_use]
    pub fn due_date(days_before_due: i64) -> Self {
        Self {
            trigger_type: TriggerType::DueDateApproaching,
            filters: None,
            cron: None,
            days_before_due: Some(days_before_due),
        }
    }

    /// Sets the filters.
    #[must_use]
    pub fn with_filters(mut self, filters: TriggerFilters) -> Self {
        self.filters = Some(filters);
        self
    }

    /// Returns the effective days-before-due window.
    #[must_use]
    pub fn days_before_due(&self) -> i64 {
        self.days_before_due.unwrap_or(1)
    }

    /// Validates shape constraints for the trigger type.
    ///
    /// Full cron parsing happens at sweep time; this rejects the
    /// configurations that can never fire.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidTriggerConfig`].
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self.trigger_type {
            TriggerType::CustomSchedule => {
                let Some(cron) = self.cron.as_deref() else {
                    return Err(ValidationError::InvalidTriggerConfig {
                        reason: "custom_schedule requires a cron expression".to_string(),
                    });
                };
                let fields = cron.split_whitespace().count();
                if !(5..=6).contains(&fields) {
                    return Err(ValidationError::InvalidTriggerConfig {
                        reason: format!("cron expression has {fields} fields, expected 5 or 6"),
                    });
                }
            }
            TriggerType::DueDateApproaching => {
                if self.days_before_due.is_some_and(|d| d < 0) {
                    return Err(ValidationError::InvalidTriggerConfig {
                        reason: "days_before_due must be non-negative".to_string(),
                    });
                }
            }
            _ => {}
        }
        Ok(())
    }
}
