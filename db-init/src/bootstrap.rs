//! The database bootstrap procedure
//!
//! Leaves the server with a freshly recreated application database, owned by
//! and granted to the secret's user, with the extension installed:
//!
//! 1. Fetch credentials from the secret store
//! 2. Admin phase, connected to the admin database:
//!    `DROP DATABASE IF EXISTS`, then `CREATE DATABASE`
//! 3. Scoped phase, connected to the new database:
//!    `GRANT ALL PRIVILEGES`, then `CREATE EXTENSION`
//!
//! Every step must succeed before the next one starts. The first failure
//! ends the invocation; nothing is retried or rolled back, so a failed run
//! can leave the database dropped but not recreated. Running it again is
//! the recovery path.
//!
//! Two invocations racing each other on the same server are not guarded
//! against and can interleave their DROP/CREATE statements.
//!
//! Names are interpolated into the SQL verbatim. The database name,
//! extension and username must come from trusted configuration.

use crate::config::Config;
use crate::database::{ConnectTarget, Connector, Session};
use crate::error::BootstrapError;
use crate::invocation::InvocationEvent;
use crate::secrets::{Credentials, SecretStore};
use std::fmt;
use tracing::{info, instrument, warn};

/// Which connection a statement runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Connected to the admin database; the target database may not exist.
    Admin,
    /// Connected to the freshly created target database.
    Scoped,
}

/// One statement of the bootstrap, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    DropDatabase,
    CreateDatabase,
    GrantPrivileges,
    CreateExtension,
}

impl Step {
    pub const ALL: [Step; 4] = [
        Step::DropDatabase,
        Step::CreateDatabase,
        Step::GrantPrivileges,
        Step::CreateExtension,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DropDatabase => "drop_database",
            Self::CreateDatabase => "create_database",
            Self::GrantPrivileges => "grant_privileges",
            Self::CreateExtension => "create_extension",
        }
    }

    pub fn phase(&self) -> Phase {
        match self {
            Self::DropDatabase | Self::CreateDatabase => Phase::Admin,
            Self::GrantPrivileges | Self::CreateExtension => Phase::Scoped,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A statement ready to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub step: Step,
    pub sql: String,
}

/// The names the statements are built from.
#[derive(Debug, Clone)]
pub struct BootstrapPlan {
    pub database: String,
    pub extension: String,
    pub owner: String,
}

impl BootstrapPlan {
    pub fn new(database: &str, extension: &str, owner: &str) -> Self {
        Self {
            database: database.to_string(),
            extension: extension.to_string(),
            owner: owner.to_string(),
        }
    }

    /// SQL for one step. No quoting or escaping is applied.
    pub fn sql(&self, step: Step) -> String {
        match step {
            Step::DropDatabase => format!("DROP DATABASE IF EXISTS {}", self.database),
            Step::CreateDatabase => format!("CREATE DATABASE {}", self.database),
            Step::GrantPrivileges => format!(
                "GRANT ALL PRIVILEGES ON DATABASE {} TO {}",
                self.database, self.owner
            ),
            Step::CreateExtension => format!("CREATE EXTENSION {}", self.extension),
        }
    }

    /// Statements of one phase, in execution order.
    pub fn statements(&self, phase: Phase) -> Vec<Statement> {
        Step::ALL
            .iter()
            .filter(|step| step.phase() == phase)
            .map(|&step| Statement {
                step,
                sql: self.sql(step),
            })
            .collect()
    }
}

/// What a successful invocation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapReport {
    pub database: String,
    pub extension: String,
    pub owner: String,
    pub steps: Vec<Step>,
}

/// Runs the bootstrap against one server.
pub struct Bootstrapper<S, C> {
    config: Config,
    secrets: S,
    connector: C,
}

impl<S, C> Bootstrapper<S, C>
where
    S: SecretStore,
    C: Connector,
{
    pub fn new(config: Config, secrets: S, connector: C) -> Self {
        Self {
            config,
            secrets,
            connector,
        }
    }

    /// Run the whole procedure once for the given trigger event.
    #[instrument(skip_all, fields(invocation_id = %event.id))]
    pub async fn initialize(
        &self,
        event: &InvocationEvent,
    ) -> Result<BootstrapReport, BootstrapError> {
        info!(
            event = %event.payload,
            received_at = %event.received_at.to_rfc3339(),
            "Received event"
        );

        let credentials = self
            .secrets
            .get_secret(&self.config.secret_id)
            .await
            .map_err(|e| BootstrapError::CredentialUnavailable {
                secret_id: self.config.secret_id.clone(),
                reason: e.to_string(),
            })?;

        info!(
            username = %credentials.username,
            host = %self.config.host,
            port = self.config.port,
            "Configuration fetch success"
        );

        let plan = BootstrapPlan::new(
            &self.config.database,
            &self.config.extension,
            &credentials.username,
        );

        let mut steps = self
            .run_phase(Phase::Admin, &self.config.admin_database, &credentials, &plan)
            .await?;
        steps.extend(
            self.run_phase(Phase::Scoped, &self.config.database, &credentials, &plan)
                .await?,
        );

        info!(
            database = %plan.database,
            extension = %plan.extension,
            owner = %plan.owner,
            "Database initialized"
        );

        Ok(BootstrapReport {
            database: plan.database,
            extension: plan.extension,
            owner: plan.owner,
            steps,
        })
    }

    /// Open a connection, run the phase's statements, close the connection.
    ///
    /// The connection is closed whether or not a statement failed; the
    /// statement result wins over a close error.
    async fn run_phase(
        &self,
        phase: Phase,
        database: &str,
        credentials: &Credentials,
        plan: &BootstrapPlan,
    ) -> Result<Vec<Step>, BootstrapError> {
        let target = ConnectTarget {
            host: &self.config.host,
            port: self.config.port,
            database,
            credentials,
        };

        info!(?phase, database, "Opening connection");
        let mut session = self.connector.connect(&target).await.map_err(|e| {
            BootstrapError::ConnectionFailed {
                host: self.config.host.clone(),
                port: self.config.port,
                database: database.to_string(),
                reason: e.to_string(),
            }
        })?;

        let result = execute_all(&mut session, plan.statements(phase)).await;

        if let Err(e) = session.close().await {
            warn!(?phase, error = %e, "Connection did not close cleanly");
        }

        result
    }
}

async fn execute_all<T: Session>(
    session: &mut T,
    statements: Vec<Statement>,
) -> Result<Vec<Step>, BootstrapError> {
    let mut done = Vec::with_capacity(statements.len());

    for Statement { step, sql } in statements {
        info!(%step, sql = %sql, "Running statement");
        if let Err(e) = session.execute(&sql).await {
            return Err(BootstrapError::StatementFailed {
                step,
                statement: sql,
                reason: e.to_string(),
            });
        }
        info!(%step, "Statement succeeded");
        done.push(step);
    }

    Ok(done)
}
