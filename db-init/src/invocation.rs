//! Trigger events and the result reported back to the invoker

use crate::bootstrap::BootstrapReport;
use crate::error::BootstrapError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

/// The opaque trigger payload plus the metadata we attach on receipt.
#[derive(Debug, Clone)]
pub struct InvocationEvent {
    pub id: Uuid,
    pub received_at: DateTime<Utc>,
    pub payload: Value,
}

impl InvocationEvent {
    /// Wrap a raw payload. JSON is kept as JSON, anything else as a string;
    /// the content is only ever logged.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        let payload = if raw.is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
        };

        Self {
            id: Uuid::new_v4(),
            received_at: Utc::now(),
            payload,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Success,
    Failed,
}

/// One JSON line on stdout describing how the invocation ended.
#[derive(Debug, Clone, Serialize)]
pub struct InvocationOutcome {
    pub invocation_id: Uuid,
    pub status: Status,
    pub database: String,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl InvocationOutcome {
    pub fn new(
        event: &InvocationEvent,
        database: &str,
        elapsed: Duration,
        result: &Result<BootstrapReport, BootstrapError>,
    ) -> Self {
        let mut outcome = Self {
            invocation_id: event.id,
            status: Status::Success,
            database: database.to_string(),
            duration_ms: elapsed.as_millis() as u64,
            error_kind: None,
            step: None,
            error: None,
        };

        if let Err(e) = result {
            outcome.status = Status::Failed;
            outcome.error_kind = Some(e.kind().to_string());
            outcome.step = e.step().map(|s| s.to_string());
            outcome.error = Some(e.to_string());
        }

        outcome
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    /// Process exit code: 0 on success, 1 on a bootstrap failure.
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }

    pub fn to_json_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"invocation_id":"{}","status":"{}"}}"#,
                self.invocation_id,
                if self.is_success() { "SUCCESS" } else { "FAILED" }
            )
        })
    }
}
