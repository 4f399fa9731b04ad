//! NATS adapter for the due-date sweep's task lookup.
//!
//! The task subsystem answers due-task queries over request/reply; the
//! sweep never reads task storage directly.

use crate::sweep::{TaskQuery, TaskSnapshot};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tidemark_core::{ProjectId, TenantId};
use tidemark_workflow::{Envelope, StoreError};

/// Request/reply subject for due-task queries.
const TASK_QUERY_SUBJECT: &str = "task.query.due";

/// Default request/reply timeout for task queries.
const QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Wire form of a due-task query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskQueryRequest {
    pub tenant_id: TenantId,
    pub project_id: ProjectId,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// Request/reply task lookup against the task subsystem.
pub struct NatsTaskQuery {
    client: async_nats::Client,
    subject: String,
    timeout: Duration,
}

impl NatsTaskQuery {
    #[must_use]
    pub fn new(client: async_nats::Client) -> Self {
        Self {
            client,
            subject: TASK_QUERY_SUBJECT.to_string(),
            timeout: QUERY_TIMEOUT,
        }
    }

    /// Overrides the query subject.
    #[must_use]
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    /// Overrides the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl TaskQuery for NatsTaskQuery {
    async fn open_tasks_due_between(
        &self,
        tenant_id: TenantId,
        project_id: ProjectId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TaskSnapshot>, StoreError> {
        let request = Envelope::new(TaskQueryRequest {
            tenant_id,
            project_id,
            from,
            to,
        });
        let bytes = request.to_json_bytes().map_err(|e| StoreError::Unavailable {
            reason: format!("encode task query: {e}"),
        })?;

        let response = tokio::time::timeout(
            self.timeout,
            self.client.request(self.subject.clone(), bytes.into()),
        )
        .await
        .map_err(|_| StoreError::Unavailable {
            reason: "task query timed out".to_string(),
        })?
        .map_err(|e| StoreError::Unavailable {
            reason: format!("task query failed: {e}"),
        })?;

        let envelope =
            Envelope::<Vec<TaskSnapshot>>::from_json_bytes(&response.payload).map_err(|e| {
                StoreError::Unavailable {
                    reason: format!("decode task query response: {e}"),
                }
            })?;
        Ok(envelope.into_payload())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_request_wire_roundtrip() {
        let request = Envelope::new(TaskQueryRequest {
            tenant_id: TenantId::new(),
            project_id: ProjectId::new(),
            from: Utc::now(),
            to: Utc::now() + chrono::Duration::days(1),
        });
        let bytes = request.to_json_bytes().expect("serialize");
        let parsed: Envelope<TaskQueryRequest> =
            Envelope::from_json_bytes(&bytes).expect("deserialize");
        assert_eq!(parsed.payload.tenant_id, request.payload.tenant_id);
        assert!(parsed.payload.from < parsed.payload.to);
    }
}
