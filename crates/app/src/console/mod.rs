//! Live console: pollers, operator intents and the preview API.
//!
//! - `config`: CLI arguments of `run` and their validation.
//! - `runtime`: main loop owning the console and the intent queue.
//! - `commands`: operator intents and how they are applied.
//! - `server`: Actix Web preview endpoints.
//! - `data`: state snapshots and transient notices shared with the server.
//! - `telemetry`: tracing subscribers and the Prometheus recorder.

pub use config::{ConsoleCliArgs, ConsoleConfig};
pub use runtime::run;

mod commands;
mod config;
mod data;
mod runtime;
mod server;
mod telemetry;
#[cfg(test)]
mod testing;
