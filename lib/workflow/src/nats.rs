//! NATS adapters for the engine's external seams.
//!
//! Three adapters live here:
//! - [`NatsEventSource`]: subscribes to the task event subjects and
//!   feeds the dispatcher; malformed payloads are logged and skipped so
//!   one bad producer cannot stall dispatch.
//! - [`NatsActionExecutor`]: request/reply against the action catalog
//!   service.
//! - [`NatsAgentAdvisor`]: request/reply against the agent service.

use crate::dispatcher::EventSource;
use crate::engine::{ActionExecutor, ActionOutcome, AdapterError, AgentAdvisor};
use crate::envelope::Envelope;
use crate::event::TaskEvent;
use crate::execution::Suggestion;
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::warn;

/// Wildcard covering all task event subjects.
const TASK_EVENTS_SUBJECT: &str = "task.>";

/// Request/reply subject for the action catalog service.
const ACTION_SUBJECT: &str = "automation.action.execute";

/// Request/reply subject for the agent service.
const AGENT_SUBJECT: &str = "automation.agent.advise";

/// Default request/reply timeout for action execution.
const ACTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Default request/reply timeout for agent advice; agents are slower
/// than catalog actions.
const AGENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection settings for the NATS adapters.
#[derive(Debug, Clone)]
pub struct NatsConfig {
    /// NATS server URL.
    pub url: String,
    /// Subject filter for task events (defaults to `task.>`).
    pub events_subject: Option<String>,
    /// Subject for action execution requests.
    pub action_subject: Option<String>,
    /// Subject for agent advice requests.
    pub agent_subject: Option<String>,
}

impl NatsConfig {
    /// Creates a config with the given NATS URL and default subjects.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            events_subject: None,
            action_subject: None,
            agent_subject: None,
        }
    }

    fn events_subject(&self) -> &str {
        self.events_subject.as_deref().unwrap_or(TASK_EVENTS_SUBJECT)
    }

    fn action_subject(&self) -> &str {
        self.action_subject.as_deref().unwrap_or(ACTION_SUBJECT)
    }

    fn agent_subject(&self) -> &str {
        self.agent_subject.as_deref().unwrap_or(AGENT_SUBJECT)
    }
}

/// NATS-backed task event stream.
pub struct NatsEventSource {
    subscriber: async_nats::Subscriber,
}

impl NatsEventSource {
    /// Connects and subscribes to the task event subjects.
    ///
    /// # Errors
    ///
    /// Returns an error when the connection or subscription fails.
    pub async fn connect(config: &NatsConfig) -> Result<Self, AdapterError> {
        let client = async_nats::connect(&config.url)
            .await
            .map_err(|e| AdapterError::new(format!("nats connect failed: {e}")))?;
        Self::subscribe(&client, config).await
    }

    /// Subscribes on an existing client.
    ///
    /// # Errors
    ///
    /// Returns an error when the subscription fails.
    pub async fn subscribe(
        client: &async_nats::Client,
        config: &NatsConfig,
    ) -> Result<Self, AdapterError> {
        let subscriber = client
            .subscribe(config.events_subject().to_string())
            .await
            .map_err(|e| AdapterError::new(format!("subscribe failed: {e}")))?;
        Ok(Self { subscriber })
    }
}

#[async_trait]
impl EventSource for NatsEventSource {
    async fn next_event(&mut self) -> Result<Option<TaskEvent>, AdapterError> {
        loop {
            let Some(message) = self.subscriber.next().await else {
                return Ok(None);
            };

            match Envelope::<TaskEvent>::from_json_bytes(&message.payload) {
                Ok(envelope) => {
                    if !envelope.is_current_version() {
                        warn!(
                            subject = %message.subject,
                            version = envelope.version,
                            "task event with unexpected envelope version"
                        );
                    }
                    return Ok(Some(envelope.into_payload()));
                }
                Err(e) => {
                    // Skip, never stall dispatch on one bad producer.
                    warn!(
                        subject = %message.subject,
                        error = %e,
                        "dropping malformed task event payload"
                    );
                }
            }
        }
    }
}

/// Wire form of an action execution request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRequest {
    pub action_type: String,
    pub parameters: JsonValue,
    pub trigger_data: JsonValue,
    pub is_dry_run: bool,
}

/// Request/reply action executor against the action catalog service.
pub struct NatsActionExecutor {
    client: async_nats::Client,
    subject: String,
    timeout: Duration,
}

impl NatsActionExecutor {
    #[must_use]
    pub fn new(client: async_nats::Client, config: &NatsConfig) -> Self {
        Self {
            client,
            subject: config.action_subject().to_string(),
            timeout: ACTION_TIMEOUT,
        }
    }

    /// Overrides the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl ActionExecutor for NatsActionExecutor {
    async fn execute(
        &self,
        action_type: &str,
        parameters: &JsonValue,
        trigger_data: &JsonValue,
        is_dry_run: bool,
    ) -> Result<ActionOutcome, AdapterError> {
        let request = Envelope::new(ActionRequest {
            action_type: action_type.to_string(),
            parameters: parameters.clone(),
            trigger_data: trigger_data.clone(),
            is_dry_run,
        });
        let bytes = request
            .to_json_bytes()
            .map_err(|e| AdapterError::new(format!("encode action request: {e}")))?;

        let response = tokio::time::timeout(
            self.timeout,
            self.client.request(self.subject.clone(), bytes.into()),
        )
        .await
        .map_err(|_| AdapterError::new(format!("action '{action_type}' timed out")))?
        .map_err(|e| AdapterError::new(format!("action request failed: {e}")))?;

        let envelope = Envelope::<ActionOutcome>::from_json_bytes(&response.payload)
            .map_err(|e| AdapterError::new(format!("decode action outcome: {e}")))?;
        Ok(envelope.into_payload())
    }
}

/// Wire form of an agent advice request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdviceRequest {
    pub instruction: String,
    pub context: JsonValue,
    pub trigger_data: JsonValue,
}

/// Request/reply agent advisor against the agent service.
pub struct NatsAgentAdvisor {
    client: async_nats::Client,
    subject: String,
    timeout: Duration,
}

impl NatsAgentAdvisor {
    #[must_use]
    pub fn new(client: async_nats::Client, config: &NatsConfig) -> Self {
        Self {
            client,
            subject: config.agent_subject().to_string(),
            timeout: AGENT_TIMEOUT,
        }
    }

    /// Overrides the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl AgentAdvisor for NatsAgentAdvisor {
    async fn advise(
        &self,
        instruction: &str,
        context: &JsonValue,
        trigger_data: &JsonValue,
    ) -> Result<Suggestion, AdapterError> {
        let request = Envelope::new(AdviceRequest {
            instruction: instruction.to_string(),
            context: context.clone(),
            trigger_data: trigger_data.clone(),
        });
        let bytes = request
            .to_json_bytes()
            .map_err(|e| AdapterError::new(format!("encode advice request: {e}")))?;

        let response = tokio::time::timeout(
            self.timeout,
            self.client.request(self.subject.clone(), bytes.into()),
        )
        .await
        .map_err(|_| AdapterError::new("agent advice timed out"))?
        .map_err(|e| AdapterError::new(format!("advice request failed: {e}")))?;

        let envelope = Envelope::<Suggestion>::from_json_bytes(&response.payload)
            .map_err(|e| AdapterError::new(format!("decode suggestion: {e}")))?;
        Ok(envelope.into_payload())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn config_defaults() {
        let config = NatsConfig::new("nats://localhost:4222");
        assert_eq!(config.events_subject(), "task.>");
        assert_eq!(config.action_subject(), "automation.action.execute");
        assert_eq!(config.agent_subject(), "automation.agent.advise");
    }

    #[test]
    fn config_overrides() {
        let config = NatsConfig {
            url: "nats://localhost:4222".to_string(),
            events_subject: Some("custom.task.>".to_string()),
            action_subject: Some("custom.action".to_string()),
            agent_subject: Some("custom.agent".to_string()),
        };
        assert_eq!(config.events_subject(), "custom.task.>");
        assert_eq!(config.action_subject(), "custom.action");
        assert_eq!(config.agent_subject(), "custom.agent");
    }

    #[test]
    fn action_request_wire_roundtrip() {
        let request = Envelope::new(ActionRequest {
            action_type: "notify".to_string(),
            parameters: json!({"channel": "email"}),
            trigger_data: json!({"status": "done"}),
            is_dry_run: false,
        });
        let bytes = request.to_json_bytes().expect("serialize");
        let parsed: Envelope<ActionRequest> =
            Envelope::from_json_bytes(&bytes).expect("deserialize");
        assert_eq!(parsed.payload.action_type, "notify");
        assert!(!parsed.payload.is_dry_run);
    }

    #[test]
    fn action_outcome_wire_roundtrip() {
        let outcome = Envelope::new(ActionOutcome::rejected("task is locked"));
        let bytes = outcome.to_json_bytes().expect("serialize");
        let parsed: Envelope<ActionOutcome> =
            Envelope::from_json_bytes(&bytes).expect("deserialize");
        assert!(!parsed.payload.success);
        assert_eq!(parsed.payload.error.as_deref(), Some("task is locked"));
    }
}
