//! Lambda Runtime API client
//!
//! When deployed as a custom-runtime function the binary is the runtime: it
//! long-polls for the next invocation, runs the bootstrap and posts the
//! outcome back, so the invoker (the custom resource provider) receives
//! success or failure for that event.

use crate::error::RuntimeError;
use crate::invocation::InvocationOutcome;
use reqwest::{Client, Response};
use serde_json::json;
use tracing::{debug, instrument};

const API_VERSION: &str = "2018-06-01";
const REQUEST_ID_HEADER: &str = "Lambda-Runtime-Aws-Request-Id";
const ERROR_TYPE_HEADER: &str = "Lambda-Runtime-Function-Error-Type";

/// One event handed out by the Runtime API.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub request_id: String,
    pub payload: String,
}

pub struct RuntimeClient {
    client: Client,
    base_url: String,
}

impl RuntimeClient {
    /// `api` is the value of `AWS_LAMBDA_RUNTIME_API` (`host:port`), or a
    /// full base URL.
    pub fn new(api: &str) -> Result<Self, RuntimeError> {
        // No client-wide timeout: fetching the next invocation blocks until one arrives.
        let client = Client::builder().build()?;
        let base_url = if api.starts_with("http://") || api.starts_with("https://") {
            api.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", api.trim_end_matches('/'))
        };

        Ok(Self { client, base_url })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}/runtime/{}", self.base_url, API_VERSION, path)
    }

    /// Wait for the next invocation.
    pub async fn next_invocation(&self) -> Result<Invocation, RuntimeError> {
        let response = self
            .client
            .get(self.url("invocation/next"))
            .send()
            .await?;
        let response = ensure_success(response).await?;

        let request_id = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or(RuntimeError::MissingRequestId)?;
        let payload = response.text().await?;

        debug!(request_id = %request_id, "Invocation received");
        Ok(Invocation {
            request_id,
            payload,
        })
    }

    /// Report the outcome of an invocation: the outcome line as the response
    /// on success, a function error carrying the failure on failure.
    #[instrument(skip_all, fields(request_id = %request_id, status = ?outcome.status))]
    pub async fn complete(
        &self,
        request_id: &str,
        outcome: &InvocationOutcome,
    ) -> Result<(), RuntimeError> {
        let request = if outcome.is_success() {
            self.client
                .post(self.url(&format!("invocation/{}/response", request_id)))
                .json(outcome)
        } else {
            let error_type = outcome.error_kind.as_deref().unwrap_or("BootstrapFailed");
            self.client
                .post(self.url(&format!("invocation/{}/error", request_id)))
                .header(ERROR_TYPE_HEADER, error_type)
                .json(&json!({
                    "errorType": error_type,
                    "errorMessage": outcome.error.clone().unwrap_or_default(),
                    "outcome": outcome,
                }))
        };

        ensure_success(request.send().await?).await?;
        Ok(())
    }

    /// Report a failure that happened before any invocation could be served.
    pub async fn report_init_error(
        &self,
        error_type: &str,
        message: &str,
    ) -> Result<(), RuntimeError> {
        let response = self
            .client
            .post(self.url("init/error"))
            .header(ERROR_TYPE_HEADER, error_type)
            .json(&json!({
                "errorType": error_type,
                "errorMessage": message,
            }))
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }
}

async fn ensure_success(response: Response) -> Result<Response, RuntimeError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(RuntimeError::Status {
        status: status.as_u16(),
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::Step;
    use crate::error::BootstrapError;
    use crate::invocation::InvocationEvent;
    use axum::extract::State;
    use axum::http::{HeaderMap, HeaderName, Uri};
    use axum::routing::get;
    use axum::Router;
    use serde_json::Value;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Requests the fake runtime received: path, error type header, JSON body.
    type Posts = Arc<Mutex<Vec<(String, Option<String>, Value)>>>;

    async fn serve_runtime(request_id: Option<&'static str>) -> (String, Posts) {
        async fn record(
            State(posts): State<Posts>,
            uri: Uri,
            headers: HeaderMap,
            body: String,
        ) {
            let error_type = headers
                .get(ERROR_TYPE_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body = serde_json::from_str(&body).unwrap_or(Value::Null);
            posts
                .lock()
                .unwrap()
                .push((uri.path().to_string(), error_type, body));
        }

        let posts: Posts = Arc::default();
        let next = get(move || async move {
            let mut headers = HeaderMap::new();
            if let Some(id) = request_id {
                headers.insert(
                    HeaderName::from_bytes(REQUEST_ID_HEADER.as_bytes()).unwrap(),
                    id.parse().unwrap(),
                );
            }
            (headers, r#"{"RequestType":"Create"}"#)
        });
        let app = Router::new()
            .route("/2018-06-01/runtime/invocation/next", next)
            .fallback(record)
            .with_state(posts.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (addr.to_string(), posts)
    }

    fn failed_outcome() -> InvocationOutcome {
        let err = BootstrapError::StatementFailed {
            step: Step::GrantPrivileges,
            statement: "GRANT ALL PRIVILEGES ON DATABASE simplified_circ_db TO dbuser".to_string(),
            reason: "ERROR: permission denied (SQLSTATE 42501)".to_string(),
        };
        InvocationOutcome::new(
            &InvocationEvent::parse("{}"),
            "simplified_circ_db",
            Duration::ZERO,
            &Err(err),
        )
    }

    #[test]
    fn test_base_url_accepts_host_port() {
        let client = RuntimeClient::new("127.0.0.1:9001").unwrap();
        assert_eq!(
            client.url("invocation/next"),
            "http://127.0.0.1:9001/2018-06-01/runtime/invocation/next"
        );
    }

    #[tokio::test]
    async fn test_next_invocation() {
        let (api, _) = serve_runtime(Some("req-1")).await;
        let client = RuntimeClient::new(&api).unwrap();

        let invocation = client.next_invocation().await.unwrap();
        assert_eq!(invocation.request_id, "req-1");
        let event = InvocationEvent::parse(&invocation.payload);
        assert_eq!(event.payload["RequestType"], "Create");
    }

    #[tokio::test]
    async fn test_next_invocation_requires_request_id() {
        let (api, _) = serve_runtime(None).await;
        let client = RuntimeClient::new(&api).unwrap();

        let err = client.next_invocation().await.unwrap_err();
        assert!(matches!(err, RuntimeError::MissingRequestId));
    }

    #[tokio::test]
    async fn test_success_is_posted_as_response() {
        let (api, posts) = serve_runtime(Some("req-1")).await;
        let client = RuntimeClient::new(&api).unwrap();
        let outcome = InvocationOutcome::new(
            &InvocationEvent::parse("{}"),
            "simplified_circ_db",
            Duration::from_millis(7),
            &Ok(crate::bootstrap::BootstrapReport {
                database: "simplified_circ_db".to_string(),
                extension: "pgcrypto".to_string(),
                owner: "dbuser".to_string(),
                steps: Step::ALL.to_vec(),
            }),
        );

        client.complete("req-1", &outcome).await.unwrap();

        let posts = posts.lock().unwrap();
        assert_eq!(posts.len(), 1);
        let (path, error_type, body) = &posts[0];
        assert_eq!(path, "/2018-06-01/runtime/invocation/req-1/response");
        assert!(error_type.is_none());
        assert_eq!(body["status"], "SUCCESS");
        assert_eq!(body["database"], "simplified_circ_db");
    }

    #[tokio::test]
    async fn test_failure_is_posted_as_function_error() {
        let (api, posts) = serve_runtime(Some("req-2")).await;
        let client = RuntimeClient::new(&format!("http://{}/", api)).unwrap();

        client.complete("req-2", &failed_outcome()).await.unwrap();

        let posts = posts.lock().unwrap();
        let (path, error_type, body) = &posts[0];
        assert_eq!(path, "/2018-06-01/runtime/invocation/req-2/error");
        assert_eq!(error_type.as_deref(), Some("StatementFailed"));
        assert_eq!(body["errorType"], "StatementFailed");
        assert!(body["errorMessage"]
            .as_str()
            .unwrap()
            .contains("permission denied"));
        assert_eq!(body["outcome"]["step"], "grant_privileges");
    }

    #[tokio::test]
    async fn test_init_error() {
        let (api, posts) = serve_runtime(Some("req-3")).await;
        let client = RuntimeClient::new(&api).unwrap();

        client
            .report_init_error("InvalidConfiguration", "DB_SECRET_ARN must be set")
            .await
            .unwrap();

        let posts = posts.lock().unwrap();
        let (path, error_type, body) = &posts[0];
        assert_eq!(path, "/2018-06-01/runtime/init/error");
        assert_eq!(error_type.as_deref(), Some("InvalidConfiguration"));
        assert_eq!(body["errorMessage"], "DB_SECRET_ARN must be set");
    }
}
