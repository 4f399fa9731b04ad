//! Centralized daemon configuration.
//!
//! Strongly-typed configuration loaded via the `config` crate from
//! environment variables, e.g. `NATS__URL`, `SCHEDULER__DUE_SWEEP_HOUR`.

use serde::Deserialize;
use tidemark_workflow::NatsConfig;

/// Daemon configuration.
#[derive(Debug, Deserialize)]
pub struct AutomationConfig {
    /// NATS connection settings.
    pub nats: NatsSettings,

    /// Sweep scheduling settings.
    #[serde(default)]
    pub scheduler: SchedulerSettings,
}

/// NATS connection and subject settings.
#[derive(Debug, Clone, Deserialize)]
pub struct NatsSettings {
    /// NATS server URL.
    pub url: String,

    /// Subject filter for task events (defaults to `task.>`).
    #[serde(default)]
    pub events_subject: Option<String>,

    /// Subject for action execution requests.
    #[serde(default)]
    pub action_subject: Option<String>,

    /// Subject for agent advice requests.
    #[serde(default)]
    pub agent_subject: Option<String>,

    /// Subject for due-task queries.
    #[serde(default)]
    pub task_query_subject: Option<String>,
}

/// Sweep scheduling settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSettings {
    /// UTC hour at which the daily due-date sweep runs.
    #[serde(default = "default_due_sweep_hour")]
    pub due_sweep_hour: u32,
}

fn default_due_sweep_hour() -> u32 {
    6
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            due_sweep_hour: default_due_sweep_hour(),
        }
    }
}

impl AutomationConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Builds the adapter config for the workflow crate's NATS seams.
    #[must_use]
    pub fn nats_config(&self) -> NatsConfig {
        NatsConfig {
            url: self.nats.url.clone(),
            events_subject: self.nats.events_subject.clone(),
            action_subject: self.nats.action_subject.clone(),
            agent_subject: self.nats.agent_subject.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduler_settings_have_correct_defaults() {
        let settings = SchedulerSettings::default();
        assert_eq!(settings.due_sweep_hour, 6);
    }

    #[test]
    fn nats_config_carries_subject_overrides() {
        let config = AutomationConfig {
            nats: NatsSettings {
                url: "nats://localhost:4222".to_string(),
                events_subject: Some("custom.task.>".to_string()),
                action_subject: None,
                agent_subject: None,
                task_query_subject: None,
            },
            scheduler: SchedulerSettings::default(),
        };
        let nats = config.nats_config();
        assert_eq!(nats.url, "nats://localhost:4222");
        assert_eq!(nats.events_subject.as_deref(), Some("custom.task.>"));
        assert!(nats.action_subject.is_none());
    }
}
