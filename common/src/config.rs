//! Environment variable parsing helpers
//!
//! The bootstrapper is configured entirely through its environment, which is
//! set by whatever orchestrator triggers it.

use anyhow::{anyhow, Context, Result};
use std::env;
use std::fmt::Display;
use std::str::FromStr;

/// Extension trait for parsing environment variables.
pub trait ConfigExt {
    /// Get an environment variable with a default value.
    ///
    /// # Example
    /// ```ignore
    /// let admin_db = String::env_or("DB_ADMIN_DATABASE", "postgres");
    /// ```
    fn env_or(name: &str, default: &str) -> String {
        env::var(name).unwrap_or_else(|_| default.to_string())
    }

    /// Get a required environment variable, returning an error if not set or empty.
    ///
    /// # Example
    /// ```ignore
    /// let secret_id = String::env_required("DB_SECRET_ARN")?;
    /// ```
    fn env_required(name: &str) -> Result<String> {
        let value = env::var(name).context(format!("{} must be set", name))?;
        if value.trim().is_empty() {
            return Err(anyhow!("{} must not be empty", name));
        }
        Ok(value)
    }

    /// Get an optional environment variable. Empty values count as unset.
    fn env_opt(name: &str) -> Option<String> {
        env::var(name).ok().filter(|v| !v.trim().is_empty())
    }

    /// Get a required environment variable parsed as a specific type.
    ///
    /// Unlike [`ConfigExt::env_parse`], a value that fails to parse is an error.
    ///
    /// # Example
    /// ```ignore
    /// let port: u16 = u16::env_required_parse("DB_INSTANCE_ENDPOINT_PORT")?;
    /// ```
    fn env_required_parse(name: &str) -> Result<Self>
    where
        Self: FromStr + Sized,
        <Self as FromStr>::Err: Display,
    {
        let raw = String::env_required(name)?;
        raw.trim()
            .parse()
            .map_err(|e| anyhow!("{} has invalid value {:?}: {}", name, raw, e))
    }

    /// Get an environment variable parsed as a specific type.
    ///
    /// Returns `default` if the variable is not set or fails to parse.
    fn env_parse<T: FromStr>(name: &str, default: T) -> T {
        env::var(name)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }
}

// Blanket implementation for all types
impl<T> ConfigExt for T {}

/// Helpers for the Lambda execution environment the bootstrapper is usually
/// invoked from.
pub struct LambdaEnv;

impl LambdaEnv {
    /// Name of the function, or "local" outside Lambda.
    pub fn function_name() -> String {
        String::env_or("AWS_LAMBDA_FUNCTION_NAME", "local")
    }

    /// Host and port of the Lambda Runtime API. Only set inside a Lambda
    /// sandbox running a custom runtime.
    pub fn runtime_api() -> Option<String> {
        String::env_opt("AWS_LAMBDA_RUNTIME_API")
    }

    /// Session token of the execution role, used to authenticate against the
    /// parameters and secrets extension.
    pub fn session_token() -> Option<String> {
        String::env_opt("AWS_SESSION_TOKEN")
    }

    /// Port of the parameters and secrets extension's local HTTP listener.
    pub fn secrets_extension_port() -> u16 {
        u16::env_parse("PARAMETERS_SECRETS_EXTENSION_HTTP_PORT", 2773)
    }
}
