//! Credential retrieval from a secret store
//!
//! The secret holds the RDS master credentials as JSON, in the shape Secrets
//! Manager generates for a database instance. Only `username` and `password`
//! are read; `engine`, `host`, `dbname` and friends are ignored.

use crate::error::SecretError;
use async_trait::async_trait;
use common::LambdaEnv;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, instrument};

/// Header the parameters and secrets extension authenticates requests with.
const EXTENSION_TOKEN_HEADER: &str = "X-Aws-Parameters-Secrets-Token";

/// Database credentials held for the duration of one invocation.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    /// Parse the JSON secret string and check both fields are present.
    pub fn from_secret_string(secret: &str) -> Result<Self, SecretError> {
        let creds: Credentials = serde_json::from_str(secret)?;
        creds.validated()
    }

    fn validated(self) -> Result<Self, SecretError> {
        if self.username.is_empty() {
            return Err(SecretError::MissingField("username"));
        }
        if self.password.is_empty() {
            return Err(SecretError::MissingField("password"));
        }
        Ok(self)
    }
}

/// A store that resolves a secret identifier to database credentials.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_secret(&self, id: &str) -> Result<Credentials, SecretError>;
}

#[async_trait]
impl<T: SecretStore + ?Sized> SecretStore for Box<T> {
    async fn get_secret(&self, id: &str) -> Result<Credentials, SecretError> {
        (**self).get_secret(id).await
    }
}

/// Subset of the Secrets Manager `GetSecretValue` response we need.
#[derive(Deserialize)]
struct GetSecretValueResponse {
    #[serde(rename = "SecretString")]
    secret_string: Option<String>,
}

/// Reads secrets through the AWS parameters and secrets Lambda extension,
/// which serves a cached `GetSecretValue` on a localhost port.
pub struct ExtensionSecretStore {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl ExtensionSecretStore {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self, SecretError> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            token,
        })
    }

    /// Store pointed at the extension of the current Lambda sandbox.
    pub fn from_env() -> Result<Self, SecretError> {
        let base_url = format!("http://localhost:{}", LambdaEnv::secrets_extension_port());
        Self::new(base_url, LambdaEnv::session_token())
    }
}

#[async_trait]
impl SecretStore for ExtensionSecretStore {
    #[instrument(skip(self), fields(base_url = %self.base_url))]
    async fn get_secret(&self, id: &str) -> Result<Credentials, SecretError> {
        let url = format!("{}/secretsmanager/get", self.base_url);

        let mut request = self.client.get(&url).query(&[("secretId", id)]);
        if let Some(token) = &self.token {
            request = request.header(EXTENSION_TOKEN_HEADER, token);
        }

        let response = request.send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(SecretError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let value: GetSecretValueResponse = response.json().await?;
        let secret = value
            .secret_string
            .ok_or(SecretError::MissingSecretString)?;

        debug!("Secret fetched from extension");
        Credentials::from_secret_string(&secret)
    }
}

/// Reads secrets from local files: the secret id is the file path.
///
/// `.yml` and `.yaml` files are parsed as YAML, anything else as JSON.
#[derive(Debug, Default)]
pub struct FileSecretStore;

#[async_trait]
impl SecretStore for FileSecretStore {
    #[instrument(skip(self))]
    async fn get_secret(&self, id: &str) -> Result<Credentials, SecretError> {
        let content = tokio::fs::read_to_string(id)
            .await
            .map_err(|source| SecretError::Io {
                path: id.to_string(),
                source,
            })?;

        let is_yaml = Path::new(id)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("yml") || ext.eq_ignore_ascii_case("yaml"))
            .unwrap_or(false);

        if is_yaml {
            let creds: Credentials = serde_yaml::from_str(&content)?;
            creds.validated()
        } else {
            Credentials::from_secret_string(&content)
        }
    }
}
