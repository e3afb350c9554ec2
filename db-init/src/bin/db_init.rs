//! One-shot database bootstrap
//!
//! Recreates the application database for each event it receives. Two ways
//! to run it:
//!
//! - As a Lambda custom runtime (`AWS_LAMBDA_RUNTIME_API` is set): polls the
//!   Runtime API for events and posts each outcome back, a failed bootstrap
//!   as a function error so the invoker sees it.
//! - As a CLI: the event is the first argument, or stdin when it is piped.
//!   Prints one JSON outcome line and exits:
//!   - 0: database recreated
//!   - 1: bootstrap failed, the server may be left half-initialized
//!   - 2: configuration invalid, nothing was attempted

use anyhow::{Context, Result};
use common::{init_logging, LambdaEnv, Telemetry, TelemetryEvent};
use db_init::{
    Bootstrapper, Config, ExtensionSecretStore, FileSecretStore, InvocationEvent,
    InvocationOutcome, PgConnector, RuntimeClient, SecretSource, SecretStore,
};
use std::io::IsTerminal;
use std::process::ExitCode;
use std::time::Instant;
use tokio::io::AsyncReadExt;
use tracing::{error, info, warn};

const COMPONENT: &str = "db-init";

/// Everything needed to serve an invocation, built once per process.
struct Handler {
    bootstrapper: Bootstrapper<Box<dyn SecretStore>, PgConnector>,
    telemetry: Telemetry,
    host: String,
    port: u16,
    database: String,
    extension: String,
    secret_source: SecretSource,
}

impl Handler {
    fn new(config: Config) -> Result<Self> {
        let connector = PgConnector::new(&config).context("Failed to set up database TLS")?;
        let secrets: Box<dyn SecretStore> = match config.secret_source {
            SecretSource::Extension => Box::new(
                ExtensionSecretStore::from_env()
                    .context("Failed to set up the secrets extension client")?,
            ),
            SecretSource::File => Box::new(FileSecretStore),
        };

        Ok(Self {
            telemetry: Telemetry::new(COMPONENT, config.telemetry_url.clone()),
            host: config.host.clone(),
            port: config.port,
            database: config.database.clone(),
            extension: config.extension.clone(),
            secret_source: config.secret_source,
            bootstrapper: Bootstrapper::new(config, secrets, connector),
        })
    }

    async fn started(&self) {
        self.telemetry
            .send(TelemetryEvent::ComponentStarted {
                component: COMPONENT.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            })
            .await;
    }

    async fn invoke(&self, event: &InvocationEvent) -> InvocationOutcome {
        info!(
            invocation_id = %event.id,
            function = %LambdaEnv::function_name(),
            host = %self.host,
            port = self.port,
            database = %self.database,
            source = ?self.secret_source,
            telemetry = self.telemetry.is_remote(),
            "Bootstrap starting"
        );

        self.telemetry
            .send(TelemetryEvent::BootstrapStarted {
                invocation_id: event.id,
                database: self.database.clone(),
            })
            .await;

        let start = Instant::now();
        let result = self.bootstrapper.initialize(event).await;
        let outcome = InvocationOutcome::new(event, &self.database, start.elapsed(), &result);

        match &result {
            Ok(_) => {
                self.telemetry
                    .send(TelemetryEvent::BootstrapCompleted {
                        invocation_id: event.id,
                        database: self.database.clone(),
                        extension: self.extension.clone(),
                        duration_ms: outcome.duration_ms,
                    })
                    .await;
            }
            Err(e) => {
                error!(
                    invocation_id = %event.id,
                    kind = %e.kind(),
                    error = %e,
                    "Bootstrap failed; server may need another run"
                );
                self.telemetry
                    .send(TelemetryEvent::BootstrapFailed {
                        invocation_id: event.id,
                        error_kind: e.kind().to_string(),
                        error: e.to_string(),
                        phase: e.phase().to_string(),
                    })
                    .await;
            }
        }

        outcome
    }
}

async fn read_event() -> Result<String> {
    if let Some(arg) = std::env::args().nth(1) {
        return Ok(arg);
    }

    if std::io::stdin().is_terminal() {
        return Ok(String::new());
    }

    let mut raw = String::new();
    tokio::io::stdin()
        .read_to_string(&mut raw)
        .await
        .context("Failed to read event from stdin")?;
    Ok(raw)
}

async fn run_cli(config: Result<Config>) -> ExitCode {
    let handler = match config.and_then(Handler::new) {
        Ok(h) => h,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Invalid configuration");
            return ExitCode::from(2);
        }
    };
    handler.started().await;

    let raw = match read_event().await {
        Ok(raw) => raw,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Bootstrap could not start");
            return ExitCode::from(2);
        }
    };

    let outcome = handler.invoke(&InvocationEvent::parse(&raw)).await;
    println!("{}", outcome.to_json_line());
    ExitCode::from(outcome.exit_code() as u8)
}

async fn run_lambda(api: &str, config: Result<Config>) -> ExitCode {
    let runtime = match RuntimeClient::new(api) {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, "Runtime API client unavailable");
            return ExitCode::from(2);
        }
    };

    let handler = match config.and_then(Handler::new) {
        Ok(h) => h,
        Err(e) => {
            let message = format!("{:#}", e);
            error!(error = %message, "Invalid configuration");
            if let Err(e) = runtime
                .report_init_error("InvalidConfiguration", &message)
                .await
            {
                warn!(error = %e, "Failed to report init error");
            }
            return ExitCode::from(2);
        }
    };
    handler.started().await;
    info!(api = %api, "Waiting for invocations");

    loop {
        let invocation = match runtime.next_invocation().await {
            Ok(i) => i,
            Err(e) => {
                error!(error = %e, "Runtime API unavailable");
                return ExitCode::FAILURE;
            }
        };

        let event = InvocationEvent::parse(&invocation.payload);
        let outcome = handler.invoke(&event).await;
        println!("{}", outcome.to_json_line());

        if let Err(e) = runtime.complete(&invocation.request_id, &outcome).await {
            error!(
                request_id = %invocation.request_id,
                error = %e,
                "Failed to report invocation outcome"
            );
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let _guard = init_logging(COMPONENT);
    let config = Config::from_env();

    match LambdaEnv::runtime_api() {
        Some(api) => run_lambda(&api, config).await,
        None => run_cli(config).await,
    }
}
