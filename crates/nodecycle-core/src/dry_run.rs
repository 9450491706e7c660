//! Dry-run decorators.
//!
//! Reads go through to the wrapped client; every mutation is logged and
//! skipped. Wrapping both control planes keeps the engine's decision path
//! identical between real and dry runs.

use async_trait::async_trait;
use tracing::info;

use crate::api::{FleetApi, OrchestratorApi};
use crate::error::Result;
use crate::types::*;

/// Fleet client that never mutates.
pub struct DryRunFleet<F> {
    inner: F,
}

impl<F> DryRunFleet<F> {
    pub fn new(inner: F) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<F: FleetApi> FleetApi for DryRunFleet<F> {
    async fn list_groups(&self, ownership_tag: &str) -> Result<Vec<FleetGroup>> {
        self.inner.list_groups(ownership_tag).await
    }

    async fn describe_group(&self, name: &str) -> Result<FleetGroup> {
        self.inner.describe_group(name).await
    }

    async fn set_capacity(&self, name: &str, desired: u32, max: u32) -> Result<()> {
        info!(group = name, desired, max, "skipping capacity change (dry run)");
        Ok(())
    }

    async fn suspend_processes(&self, name: &str) -> Result<()> {
        info!(group = name, "skipping process suspension (dry run)");
        Ok(())
    }

    async fn resume_processes(&self, name: &str) -> Result<()> {
        info!(group = name, "skipping process resumption (dry run)");
        Ok(())
    }

    async fn put_tag(&self, name: &str, key: &str, value: &str) -> Result<()> {
        info!(group = name, key, value, "skipping tag write (dry run)");
        Ok(())
    }

    async fn delete_tag(&self, name: &str, key: &str) -> Result<()> {
        info!(group = name, key, "skipping tag deletion (dry run)");
        Ok(())
    }

    async fn terminate_member(&self, instance_id: &str, decrement: bool) -> Result<()> {
        info!(instance = instance_id, decrement, "skipping termination (dry run)");
        Ok(())
    }

    async fn detach_member(&self, group: &str, instance_id: &str, decrement: bool) -> Result<()> {
        info!(group, instance = instance_id, decrement, "skipping detachment (dry run)");
        Ok(())
    }

    async fn member_lifecycle(&self, instance_id: &str) -> Result<Lifecycle> {
        self.inner.member_lifecycle(instance_id).await
    }

    async fn member_group(&self, instance_id: &str) -> Result<Option<GroupName>> {
        self.inner.member_group(instance_id).await
    }

    async fn resolve_template_version(
        &self,
        template: &str,
        selector: &VersionSelector,
    ) -> Result<u64> {
        self.inner.resolve_template_version(template, selector).await
    }
}

/// Orchestrator client that never mutates.
pub struct DryRunOrchestrator<O> {
    inner: O,
}

impl<O> DryRunOrchestrator<O> {
    pub fn new(inner: O) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<O: OrchestratorApi> OrchestratorApi for DryRunOrchestrator<O> {
    async fn list_nodes(&self) -> Result<Vec<OrchestratorNode>> {
        self.inner.list_nodes().await
    }

    async fn cordon_node(&self, name: &str) -> Result<()> {
        info!(node = name, "skipping cordon (dry run)");
        Ok(())
    }

    async fn taint_node(&self, name: &str, taint: &Taint) -> Result<()> {
        info!(node = name, key = %taint.key, "skipping taint (dry run)");
        Ok(())
    }

    async fn delete_node(&self, name: &str) -> Result<()> {
        info!(node = name, "skipping node deletion (dry run)");
        Ok(())
    }

    async fn list_pods(
        &self,
        node: &str,
        label_selector: Option<&str>,
        running_only: bool,
    ) -> Result<Vec<Pod>> {
        self.inner.list_pods(node, label_selector, running_only).await
    }

    async fn evict_pod(&self, namespace: &str, name: &str) -> Result<Eviction> {
        info!(pod = %format!("{namespace}/{name}"), "skipping eviction (dry run)");
        Ok(Eviction::Evicted)
    }

    async fn delete_pod(
        &self,
        namespace: &str,
        name: &str,
        _grace_secs: Option<u32>,
    ) -> Result<()> {
        info!(pod = %format!("{namespace}/{name}"), "skipping pod deletion (dry run)");
        Ok(())
    }

    async fn scale_deployment(&self, namespace: &str, name: &str, replicas: i32) -> Result<()> {
        info!(namespace, deployment = name, replicas, "skipping deployment scale (dry run)");
        Ok(())
    }
}
