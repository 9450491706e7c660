//! Shared handles every rollout component is built from.

use std::time::Duration;

use tracing::info;

use nodecycle_core::nodes::managed_nodes;
use nodecycle_core::types::OrchestratorNode;
use nodecycle_core::{CycleConfig, FleetApi, OrchestratorApi, Result};
use nodecycle_health::HealthValidator;

use crate::checkpoint::CheckpointStore;

/// Borrowed control-plane clients plus the immutable run configuration.
#[derive(Clone, Copy)]
pub struct Context<'a> {
    pub fleet: &'a dyn FleetApi,
    pub orchestrator: &'a dyn OrchestratorApi,
    pub config: &'a CycleConfig,
}

impl<'a> Context<'a> {
    pub fn new(
        fleet: &'a dyn FleetApi,
        orchestrator: &'a dyn OrchestratorApi,
        config: &'a CycleConfig,
    ) -> Self {
        Self {
            fleet,
            orchestrator,
            config,
        }
    }

    pub fn health(&self) -> HealthValidator<'a> {
        HealthValidator::new(self.fleet, self.orchestrator, self.config)
    }

    pub fn checkpoints(&self) -> CheckpointStore<'a> {
        CheckpointStore::new(self.fleet, &self.config.checkpoint)
    }

    /// Cluster nodes minus those carrying an excluded label key.
    pub async fn managed_nodes(&self) -> Result<Vec<OrchestratorNode>> {
        let nodes = self.orchestrator.list_nodes().await?;
        Ok(managed_nodes(nodes, &self.config.nodes.exclude_label_keys))
    }

    /// Sleep for `wait` unless it is zero or this is a dry run.
    pub(crate) async fn pause(&self, reason: &str, wait: Duration) {
        if wait.is_zero() {
            return;
        }
        if self.config.dry_run {
            info!(reason, ?wait, "skipping wait (dry run)");
            return;
        }
        info!(reason, ?wait, "waiting");
        tokio::time::sleep(wait).await;
    }
}
