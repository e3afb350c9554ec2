//! Shared utilities for the circulation database bootstrapper
//!
//! - Structured logging initialization
//! - Environment variable parsing helpers
//! - Telemetry for reporting bootstrap events

pub mod config;
pub mod logging;
pub mod telemetry;

pub use config::{ConfigExt, LambdaEnv};
pub use logging::{init_logging, LogFormat};
pub use telemetry::{Telemetry, TelemetryEvent};
