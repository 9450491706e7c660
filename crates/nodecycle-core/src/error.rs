//! Error types shared by every nodecycle crate.

use thiserror::Error;

/// Result type alias for nodecycle operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while planning or replacing fleet members.
#[derive(Debug, Error)]
pub enum Error {
    #[error("fleet control plane error: {0}")]
    Fleet(String),

    #[error("orchestrator error: {0}")]
    Orchestrator(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// State that retrying cannot fix, e.g. an outdated member with no node.
    #[error("inconsistent state: {0}")]
    Inconsistent(String),

    #[error("group {group} has no launch configuration or launch template")]
    MissingLaunchDescriptor { group: String },

    #[error("cluster health validation for group {group} failed after {attempts} attempts")]
    HealthCheckFailed { group: String, attempts: u32 },

    #[error("timed out waiting for {what} after {attempts} attempts")]
    Timeout { what: String, attempts: u32 },

    #[error("failed to drain node {node}: {reason}")]
    DrainFailed { node: String, reason: String },

    #[error("checkpoint on group {group} is unusable: {reason}")]
    Checkpoint { group: String, reason: String },

    #[error("rolling update failed for groups: {}", groups.join(", "))]
    RunFailed { groups: Vec<String> },
}

impl Error {
    /// Whether retrying or moving on to another group cannot help.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Inconsistent(_) | Self::Config(_) | Self::Checkpoint { .. }
        )
    }
}
