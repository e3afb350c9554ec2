//! Bootstrapper for the circulation demo database
//!
//! Drops and recreates the application database on an RDS Postgres
//! instance, grants it to the application user and installs `pgcrypto`.
//! Credentials come from a secret store at invocation time.

pub mod bootstrap;
pub mod config;
pub mod database;
pub mod error;
pub mod invocation;
pub mod runtime;
pub mod secrets;

pub use bootstrap::{BootstrapPlan, BootstrapReport, Bootstrapper, Phase, Statement, Step};
pub use config::{Config, SecretSource, SslMode};
pub use database::{ConnectTarget, Connector, PgConnector, PgSession, Session};
pub use error::{BootstrapError, DbError, ErrorKind, RuntimeError, SecretError};
pub use invocation::{InvocationEvent, InvocationOutcome, Status};
pub use runtime::{Invocation, RuntimeClient};
pub use secrets::{Credentials, ExtensionSecretStore, FileSecretStore, SecretStore};
