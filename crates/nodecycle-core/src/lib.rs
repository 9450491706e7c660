//! Shared building blocks for nodecycle: domain types, configuration,
//! errors, bounded polling, and the control-plane traits.

pub mod api;
pub mod config;
pub mod dry_run;
pub mod error;
pub mod nodes;
pub mod retry;
pub mod types;

#[cfg(any(test, feature = "fake"))]
pub mod fake;

pub use api::{FleetApi, OrchestratorApi};
pub use config::{CycleConfig, RunMode};
pub use error::{Error, Result};
pub use retry::RetryPolicy;
