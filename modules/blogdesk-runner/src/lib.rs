//! Producer side of the progress protocol.
//!
//! [`TaskRunner`] drives the scrape → evaluate → generate stages and batch
//! evaluation through an injected [`TaskBackend`], writes activity records,
//! and hands each run's events to the encoder. [`runner_router`] exposes it
//! over HTTP.

pub mod auth;
pub mod backend;
pub mod error;
pub mod routes;
pub mod runner;

pub use backend::{PendingSource, SourceEvaluation, StageReport, TaskBackend};
pub use error::RunnerError;
pub use routes::{runner_router, runner_router_at, RunnerState};
pub use runner::{RunnerSettings, TaskRunner};
