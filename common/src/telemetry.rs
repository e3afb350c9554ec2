//! Telemetry for reporting bootstrap events
//!
//! Events are always logged locally. When a webhook endpoint is configured
//! they are also POSTed there as JSON; delivery is best-effort and never
//! affects the caller.

use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// All telemetry events emitted by the bootstrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TelemetryEvent {
    /// Bootstrap invocation received
    BootstrapStarted {
        invocation_id: Uuid,
        database: String,
    },

    /// Bootstrap completed successfully
    BootstrapCompleted {
        invocation_id: Uuid,
        database: String,
        extension: String,
        duration_ms: u64,
    },

    /// Bootstrap failed
    BootstrapFailed {
        invocation_id: Uuid,
        error_kind: String,
        error: String,
        phase: String,
    },

    /// Component started
    ComponentStarted { component: String, version: String },
}

impl TelemetryEvent {
    /// Get the event type name for logging and the webhook payload.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::BootstrapStarted { .. } => "DB_INIT_BOOTSTRAP_STARTED",
            Self::BootstrapCompleted { .. } => "DB_INIT_BOOTSTRAP_COMPLETED",
            Self::BootstrapFailed { .. } => "DB_INIT_BOOTSTRAP_FAILED",
            Self::ComponentStarted { .. } => "COMPONENT_STARTED",
        }
    }

    /// Convert event to a human-readable message.
    pub fn message(&self) -> String {
        match self {
            Self::BootstrapStarted {
                invocation_id,
                database,
            } => {
                format!("Bootstrap {} started for {}", invocation_id, database)
            }
            Self::BootstrapCompleted {
                database,
                extension,
                duration_ms,
                ..
            } => {
                format!(
                    "Bootstrap recreated {} with {} in {}ms",
                    database, extension, duration_ms
                )
            }
            Self::BootstrapFailed {
                error_kind,
                error,
                phase,
                ..
            } => {
                format!("Bootstrap failed during {} ({}): {}", phase, error_kind, error)
            }
            Self::ComponentStarted { component, version } => {
                format!("{} v{} started", component, version)
            }
        }
    }
}

/// Telemetry client for sending events to an optional webhook.
#[derive(Clone)]
pub struct Telemetry {
    remote: Option<(Client, String)>,
    component: String,
}

impl Telemetry {
    /// Create a telemetry client. With no endpoint, events are only logged.
    ///
    /// If the HTTP client cannot be built, remote delivery is disabled
    /// rather than failing the caller.
    pub fn new(component: &str, endpoint: Option<String>) -> Self {
        let remote = endpoint.and_then(|endpoint| {
            match Client::builder().timeout(Duration::from_secs(5)).build() {
                Ok(client) => Some((client, endpoint)),
                Err(e) => {
                    warn!(error = %e, "Telemetry client unavailable, logging events only");
                    None
                }
            }
        });

        Self {
            remote,
            component: component.to_string(),
        }
    }

    /// Whether events leave the process at all.
    pub fn is_remote(&self) -> bool {
        self.remote.is_some()
    }

    fn payload(&self, event: &TelemetryEvent) -> serde_json::Value {
        json!({
            "event": event.event_type(),
            "message": event.message(),
            "component": self.component,
            "timestamp": Utc::now().to_rfc3339(),
            "metadata": event,
        })
    }

    /// Log a telemetry event and deliver it to the webhook, if any.
    ///
    /// Delivery is awaited so events sent right before the process exits
    /// are not lost. Errors are logged but do not affect the caller.
    pub async fn send(&self, event: TelemetryEvent) {
        info!(event = %event.event_type(), "{}", event.message());

        if let Some((client, endpoint)) = &self.remote {
            let payload = self.payload(&event);
            deliver(client, endpoint, &payload).await;
        }
    }
}

async fn deliver(client: &Client, endpoint: &str, payload: &serde_json::Value) {
    match client.post(endpoint).json(payload).send().await {
        Ok(resp) if resp.status().is_success() => {}
        Ok(resp) => {
            warn!("Telemetry got status {}", resp.status());
        }
        Err(e) => {
            warn!("Telemetry send failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_event_serializes_with_tag() {
        let event = TelemetryEvent::BootstrapFailed {
            invocation_id: Uuid::nil(),
            error_kind: "StatementFailed".to_string(),
            error: "permission denied".to_string(),
            phase: "grant_privileges".to_string(),
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "BootstrapFailed");
        assert_eq!(value["phase"], "grant_privileges");
        assert_eq!(event.event_type(), "DB_INIT_BOOTSTRAP_FAILED");
        assert!(event.message().contains("grant_privileges"));
    }

    #[tokio::test]
    async fn test_local_only_telemetry_does_not_deliver() {
        let telemetry = Telemetry::new("db-init", None);
        assert!(!telemetry.is_remote());

        telemetry
            .send(TelemetryEvent::ComponentStarted {
                component: "db-init".to_string(),
                version: "0.1.0".to_string(),
            })
            .await;
    }

    #[tokio::test]
    async fn test_send_delivers_before_returning() {
        use axum::routing::post;
        use axum::{extract::State, Json, Router};
        use std::sync::{Arc, Mutex};

        type Received = Arc<Mutex<Vec<serde_json::Value>>>;

        async fn record(
            State(received): State<Received>,
            Json(body): Json<serde_json::Value>,
        ) {
            received.lock().unwrap().push(body);
        }

        let received: Received = Arc::default();
        let app = Router::new()
            .route("/events", post(record))
            .with_state(received.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let telemetry = Telemetry::new("db-init", Some(format!("http://{}/events", addr)));
        assert!(telemetry.is_remote());

        telemetry
            .send(TelemetryEvent::BootstrapStarted {
                invocation_id: Uuid::nil(),
                database: "simplified_circ_db".to_string(),
            })
            .await;

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0]["event"], "DB_INIT_BOOTSTRAP_STARTED");
        assert_eq!(received[0]["component"], "db-init");
    }
}
