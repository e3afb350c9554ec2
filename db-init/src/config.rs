//! Bootstrapper configuration from environment variables

use anyhow::{anyhow, Context, Result};
use common::{ConfigExt, LambdaEnv};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_DATABASE: &str = "simplified_circ_db";
pub const DEFAULT_EXTENSION: &str = "pgcrypto";
pub const DEFAULT_ADMIN_DATABASE: &str = "postgres";

/// TLS behavior for database connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SslMode {
    Disable,
    Prefer,
    Require,
}

impl FromStr for SslMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "disable" => Ok(Self::Disable),
            "prefer" => Ok(Self::Prefer),
            "require" => Ok(Self::Require),
            other => Err(anyhow!(
                "unknown ssl mode {:?} (expected disable, prefer or require)",
                other
            )),
        }
    }
}

/// Where credentials are fetched from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretSource {
    /// The parameters and secrets Lambda extension on localhost.
    Extension,
    /// The secret id is a path to a JSON or YAML file.
    File,
}

impl SecretSource {
    /// The extension only exists inside a Lambda sandbox; everywhere else
    /// the secret id is read as a file path.
    pub fn default_for(in_lambda: bool) -> Self {
        if in_lambda {
            Self::Extension
        } else {
            Self::File
        }
    }
}

impl FromStr for SecretSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "extension" => Ok(Self::Extension),
            "file" => Ok(Self::File),
            other => Err(anyhow!(
                "unknown secret source {:?} (expected extension or file)",
                other
            )),
        }
    }
}

/// Configuration for one bootstrap invocation.
///
/// Host, port and secret id are required; the rest has defaults matching
/// the demo deployment.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub secret_id: String,
    pub database: String,
    pub extension: String,
    pub admin_database: String,
    pub connect_timeout: Duration,
    pub ssl_mode: SslMode,
    pub ssl_root_cert: Option<PathBuf>,
    pub secret_source: SecretSource,
    pub telemetry_url: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let host = String::env_required("DB_INSTANCE_ENDPOINT_ADDRESS")?;
        let port = u16::env_required_parse("DB_INSTANCE_ENDPOINT_PORT")?;
        let secret_id = String::env_required("DB_SECRET_ARN")?;

        let ssl_mode = String::env_or("DB_SSL_MODE", "prefer")
            .parse::<SslMode>()
            .context("DB_SSL_MODE")?;
        let secret_source = match String::env_opt("DB_SECRET_SOURCE") {
            Some(source) => source.parse::<SecretSource>().context("DB_SECRET_SOURCE")?,
            None => SecretSource::default_for(LambdaEnv::runtime_api().is_some()),
        };

        Ok(Self {
            host,
            port,
            secret_id,
            database: String::env_or("DB_NAME", DEFAULT_DATABASE),
            extension: String::env_or("DB_EXTENSION", DEFAULT_EXTENSION),
            admin_database: String::env_or("DB_ADMIN_DATABASE", DEFAULT_ADMIN_DATABASE),
            connect_timeout: Duration::from_secs(u64::env_parse("DB_CONNECT_TIMEOUT", 10)),
            ssl_mode,
            ssl_root_cert: String::env_opt("DB_SSL_ROOT_CERT").map(PathBuf::from),
            secret_source,
            telemetry_url: String::env_opt("DB_INIT_TELEMETRY_URL"),
        })
    }

    /// Configuration with defaults for everything but the three required values.
    pub fn new(host: &str, port: u16, secret_id: &str) -> Self {
        Self {
            host: host.to_string(),
            port,
            secret_id: secret_id.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            extension: DEFAULT_EXTENSION.to_string(),
            admin_database: DEFAULT_ADMIN_DATABASE.to_string(),
            connect_timeout: Duration::from_secs(10),
            ssl_mode: SslMode::Prefer,
            ssl_root_cert: None,
            secret_source: SecretSource::File,
            telemetry_url: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    const VARS: &[&str] = &[
        "DB_INSTANCE_ENDPOINT_ADDRESS",
        "DB_INSTANCE_ENDPOINT_PORT",
        "DB_SECRET_ARN",
        "DB_NAME",
        "DB_SSL_MODE",
        "DB_SECRET_SOURCE",
        "AWS_LAMBDA_RUNTIME_API",
    ];

    fn clear() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    // All environment mutation lives in this one test so parallel tests
    // never observe each other's variables.
    #[test]
    fn test_from_env() {
        clear();
        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("DB_INSTANCE_ENDPOINT_ADDRESS"));

        env::set_var("DB_INSTANCE_ENDPOINT_ADDRESS", "db.local");
        env::set_var("DB_INSTANCE_ENDPOINT_PORT", "5432");
        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("DB_SECRET_ARN"));

        env::set_var("DB_SECRET_ARN", "s1");
        let config = Config::from_env().unwrap();
        assert_eq!(config.host, "db.local");
        assert_eq!(config.port, 5432);
        assert_eq!(config.secret_id, "s1");
        assert_eq!(config.database, "simplified_circ_db");
        assert_eq!(config.extension, "pgcrypto");
        assert_eq!(config.admin_database, "postgres");
        assert_eq!(config.ssl_mode, SslMode::Prefer);
        assert_eq!(config.secret_source, SecretSource::File);

        env::set_var("AWS_LAMBDA_RUNTIME_API", "127.0.0.1:9001");
        let config = Config::from_env().unwrap();
        assert_eq!(config.secret_source, SecretSource::Extension);
        env::remove_var("AWS_LAMBDA_RUNTIME_API");

        env::set_var("DB_INSTANCE_ENDPOINT_PORT", "not-a-port");
        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("DB_INSTANCE_ENDPOINT_PORT"));

        env::set_var("DB_INSTANCE_ENDPOINT_PORT", "5432");
        env::set_var("DB_SSL_MODE", "verify-everything");
        assert!(Config::from_env().is_err());

        env::set_var("DB_SSL_MODE", "REQUIRE");
        env::set_var("DB_SECRET_SOURCE", "file");
        env::set_var("DB_NAME", "circ; drop table x");
        let config = Config::from_env().unwrap();
        assert_eq!(config.ssl_mode, SslMode::Require);
        assert_eq!(config.secret_source, SecretSource::File);
        assert_eq!(config.database, "circ; drop table x");

        clear();
    }

    #[test]
    fn test_new_uses_demo_defaults() {
        let config = Config::new("db.local", 5432, "s1");
        assert_eq!(config.database, DEFAULT_DATABASE);
        assert_eq!(config.extension, DEFAULT_EXTENSION);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_secret_source_follows_runtime() {
        assert_eq!(SecretSource::default_for(true), SecretSource::Extension);
        assert_eq!(SecretSource::default_for(false), SecretSource::File);
    }
}
