//! Quote feed client application.
//!
//! Loads configuration, drives a `SessionSupervisor`, issues the configured
//! subscriptions and data requests, and turns session events into logs and
//! metrics.

pub mod app;
pub mod config;
pub mod error;

pub use app::{Application, RunStats};
pub use config::AppConfig;
pub use error::{AppError, AppResult};
