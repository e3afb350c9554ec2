//! Postgres connections
//!
//! A [`Connector`] opens one [`Session`] per bootstrap phase. Sessions are
//! closed explicitly so the admin connection is gone before the scoped one
//! is opened.

use crate::config::{Config, SslMode};
use crate::error::DbError;
use crate::secrets::Credentials;
use async_trait::async_trait;
use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode};
use postgres_openssl::MakeTlsConnector;
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_postgres::config::SslMode as PgSslMode;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, instrument, warn};

/// Where and as whom to connect.
pub struct ConnectTarget<'a> {
    pub host: &'a str,
    pub port: u16,
    pub database: &'a str,
    pub credentials: &'a Credentials,
}

/// An open connection that runs statements one at a time.
#[async_trait]
pub trait Session: Send + Sized {
    /// Run one statement (simple query protocol, no parameters).
    async fn execute(&mut self, sql: &str) -> Result<(), DbError>;

    /// Close the connection and wait for it to shut down.
    async fn close(self) -> Result<(), DbError>;
}

/// Opens sessions against a database server.
#[async_trait]
pub trait Connector: Send + Sync {
    type Session: Session;

    async fn connect(&self, target: &ConnectTarget<'_>) -> Result<Self::Session, DbError>;
}

/// Connector backed by `tokio-postgres`, with optional OpenSSL TLS.
pub struct PgConnector {
    ssl_mode: SslMode,
    tls: Option<MakeTlsConnector>,
    connect_timeout: Duration,
}

impl PgConnector {
    pub fn new(config: &Config) -> Result<Self, DbError> {
        let tls = match config.ssl_mode {
            SslMode::Disable => None,
            SslMode::Prefer | SslMode::Require => {
                Some(tls_connector(config.ssl_root_cert.as_deref())?)
            }
        };

        Ok(Self {
            ssl_mode: config.ssl_mode,
            tls,
            connect_timeout: config.connect_timeout,
        })
    }
}

/// Without a root certificate the server certificate is not verified,
/// matching libpq's `require`.
fn tls_connector(root_cert: Option<&Path>) -> Result<MakeTlsConnector, DbError> {
    let mut builder = SslConnector::builder(SslMethod::tls())?;
    match root_cert {
        Some(path) => builder.set_ca_file(path)?,
        None => builder.set_verify(SslVerifyMode::NONE),
    }
    Ok(MakeTlsConnector::new(builder.build()))
}

#[async_trait]
impl Connector for PgConnector {
    type Session = PgSession;

    #[instrument(skip_all, fields(host = %target.host, port = target.port, database = %target.database))]
    async fn connect(&self, target: &ConnectTarget<'_>) -> Result<PgSession, DbError> {
        let mut pg = tokio_postgres::Config::new();
        pg.host(target.host)
            .port(target.port)
            .dbname(target.database)
            .user(&target.credentials.username)
            .password(&target.credentials.password)
            .connect_timeout(self.connect_timeout)
            .application_name("db-init");

        let session = match (&self.tls, self.ssl_mode) {
            (Some(tls), mode) => {
                pg.ssl_mode(if mode == SslMode::Require {
                    PgSslMode::Require
                } else {
                    PgSslMode::Prefer
                });
                let (client, connection) = pg.connect(tls.clone()).await?;
                PgSession::spawn(client, connection)
            }
            (None, _) => {
                pg.ssl_mode(PgSslMode::Disable);
                let (client, connection) = pg.connect(NoTls).await?;
                PgSession::spawn(client, connection)
            }
        };

        debug!("Connected");
        Ok(session)
    }
}

/// A live `tokio-postgres` client plus the task driving its connection.
pub struct PgSession {
    client: Client,
    driver: JoinHandle<Result<(), tokio_postgres::Error>>,
}

impl PgSession {
    fn spawn<C>(client: Client, connection: C) -> Self
    where
        C: Future<Output = Result<(), tokio_postgres::Error>> + Send + 'static,
    {
        let driver = tokio::spawn(async move {
            let result = connection.await;
            if let Err(e) = &result {
                warn!(error = %e, "Connection error");
            }
            result
        });

        Self { client, driver }
    }
}

#[async_trait]
impl Session for PgSession {
    async fn execute(&mut self, sql: &str) -> Result<(), DbError> {
        self.client.batch_execute(sql).await?;
        Ok(())
    }

    async fn close(self) -> Result<(), DbError> {
        // Dropping the client sends Terminate and lets the driver finish.
        drop(self.client);
        match self.driver.await {
            Ok(result) => result.map_err(DbError::from),
            Err(e) => Err(DbError::new(format!("connection task failed: {}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_tls_builds_no_connector() {
        let mut config = Config::new("db.local", 5432, "s1");
        config.ssl_mode = SslMode::Disable;
        let connector = PgConnector::new(&config).unwrap();
        assert!(connector.tls.is_none());
    }

    #[test]
    fn test_missing_root_cert_is_an_error() {
        let mut config = Config::new("db.local", 5432, "s1");
        config.ssl_mode = SslMode::Require;
        config.ssl_root_cert = Some("/nonexistent/root.crt".into());
        let err = PgConnector::new(&config).err().unwrap();
        assert!(err.to_string().contains("TLS setup failed"));
    }

    #[tokio::test]
    async fn test_unreachable_server_fails_to_connect() {
        let mut config = Config::new("127.0.0.1", 1, "s1");
        config.ssl_mode = SslMode::Disable;
        config.connect_timeout = Duration::from_secs(2);
        let connector = PgConnector::new(&config).unwrap();
        let credentials = Credentials::new("dbuser", "p");

        let target = ConnectTarget {
            host: "127.0.0.1",
            port: 1,
            database: "postgres",
            credentials: &credentials,
        };
        assert!(connector.connect(&target).await.is_err());
    }
}
