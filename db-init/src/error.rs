//! Error types for the bootstrapper

use crate::bootstrap::Step;
use std::fmt;
use thiserror::Error;

/// Terminal failure of one bootstrap invocation.
///
/// Nothing is retried or rolled back; the server is left in whatever state
/// the statements before the failing one produced.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("credentials unavailable for secret {secret_id}: {reason}")]
    CredentialUnavailable { secret_id: String, reason: String },

    #[error("failed to connect to {host}:{port}/{database}: {reason}")]
    ConnectionFailed {
        host: String,
        port: u16,
        database: String,
        reason: String,
    },

    #[error("{step} failed ({statement}): {reason}")]
    StatementFailed {
        step: Step,
        statement: String,
        reason: String,
    },
}

/// Tag of a [`BootstrapError`], reported alongside the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    CredentialUnavailable,
    ConnectionFailed,
    StatementFailed,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CredentialUnavailable => "CredentialUnavailable",
            Self::ConnectionFailed => "ConnectionFailed",
            Self::StatementFailed => "StatementFailed",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl BootstrapError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::CredentialUnavailable { .. } => ErrorKind::CredentialUnavailable,
            Self::ConnectionFailed { .. } => ErrorKind::ConnectionFailed,
            Self::StatementFailed { .. } => ErrorKind::StatementFailed,
        }
    }

    /// Phase the invocation was in when it failed, for telemetry.
    pub fn phase(&self) -> &'static str {
        match self {
            Self::CredentialUnavailable { .. } => "fetch_credentials",
            Self::ConnectionFailed { .. } => "connect",
            Self::StatementFailed { step, .. } => step.as_str(),
        }
    }

    /// The statement step that failed, if any.
    pub fn step(&self) -> Option<Step> {
        match self {
            Self::StatementFailed { step, .. } => Some(*step),
            _ => None,
        }
    }
}

/// Failure to read credentials from a secret store.
#[derive(Debug, Error)]
pub enum SecretError {
    #[error("secret request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("secret store returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("secret has no SecretString (binary secrets are not supported)")]
    MissingSecretString,

    #[error("failed to parse secret: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to parse secret file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("failed to read secret file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("secret field {0} is missing or empty")]
    MissingField(&'static str),
}

/// Failure talking to the Lambda Runtime API.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime API request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("runtime API returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invocation has no Lambda-Runtime-Aws-Request-Id header")]
    MissingRequestId,
}

/// Failure reported by the database layer: connect, statement or close.
///
/// Carries the rendered server message (SQLSTATE and text) so it can be
/// surfaced verbatim in the invocation's failure result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct DbError(pub String);

impl DbError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<tokio_postgres::Error> for DbError {
    fn from(err: tokio_postgres::Error) -> Self {
        match err.as_db_error() {
            Some(db) => Self(format!(
                "{}: {} (SQLSTATE {})",
                db.severity(),
                db.message(),
                db.code().code()
            )),
            None => Self(err.to_string()),
        }
    }
}

impl From<openssl::error::ErrorStack> for DbError {
    fn from(err: openssl::error::ErrorStack) -> Self {
        Self(format!("TLS setup failed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_failure_carries_step_and_text() {
        let err = BootstrapError::StatementFailed {
            step: Step::GrantPrivileges,
            statement: "GRANT ALL PRIVILEGES ON DATABASE simplified_circ_db TO dbuser".to_string(),
            reason: "ERROR: role \"dbuser\" does not exist (SQLSTATE 42704)".to_string(),
        };

        assert_eq!(err.kind(), ErrorKind::StatementFailed);
        assert_eq!(err.phase(), "grant_privileges");
        assert_eq!(err.step(), Some(Step::GrantPrivileges));
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_credential_failure_has_no_step() {
        let err = BootstrapError::CredentialUnavailable {
            secret_id: "s1".to_string(),
            reason: "access denied".to_string(),
        };

        assert_eq!(err.kind().to_string(), "CredentialUnavailable");
        assert_eq!(err.phase(), "fetch_credentials");
        assert!(err.step().is_none());
    }
}
