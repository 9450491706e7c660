//! Interfaces to the two external control planes.
//!
//! The engine only ever talks to the compute fleet and the cluster
//! orchestrator through these traits, so tests can substitute in-memory
//! fakes and production wires in the `nodecycle-aws` / `nodecycle-kube`
//! adapters.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::*;

/// Compute-fleet control plane (autoscaling groups and their instances).
#[async_trait]
pub trait FleetApi: Send + Sync {
    /// Groups carrying the ownership tag `key` = `owned`.
    async fn list_groups(&self, ownership_tag: &str) -> Result<Vec<FleetGroup>>;

    /// Fresh snapshot of one group.
    async fn describe_group(&self, name: &str) -> Result<FleetGroup>;

    /// Set desired capacity and max size.
    async fn set_capacity(&self, name: &str, desired: u32, max: u32) -> Result<()>;

    /// Suspend the group's own launch and replace-unhealthy processes.
    async fn suspend_processes(&self, name: &str) -> Result<()>;

    async fn resume_processes(&self, name: &str) -> Result<()>;

    async fn put_tag(&self, name: &str, key: &str, value: &str) -> Result<()>;

    async fn delete_tag(&self, name: &str, key: &str) -> Result<()>;

    async fn terminate_member(&self, instance_id: &str, decrement: bool) -> Result<()>;

    async fn detach_member(&self, group: &str, instance_id: &str, decrement: bool) -> Result<()>;

    async fn member_lifecycle(&self, instance_id: &str) -> Result<Lifecycle>;

    /// The group the instance currently belongs to, if any.
    async fn member_group(&self, instance_id: &str) -> Result<Option<GroupName>>;

    /// Resolve a symbolic template version to a concrete number.
    async fn resolve_template_version(
        &self,
        template: &str,
        selector: &VersionSelector,
    ) -> Result<u64>;
}

/// Cluster orchestrator control plane (nodes, pods, deployments).
#[async_trait]
pub trait OrchestratorApi: Send + Sync {
    async fn list_nodes(&self) -> Result<Vec<OrchestratorNode>>;

    async fn cordon_node(&self, name: &str) -> Result<()>;

    async fn taint_node(&self, name: &str, taint: &Taint) -> Result<()>;

    async fn delete_node(&self, name: &str) -> Result<()>;

    /// Pods scheduled on `node`, optionally filtered by label selector
    /// and restricted to the `Running` phase.
    async fn list_pods(
        &self,
        node: &str,
        label_selector: Option<&str>,
        running_only: bool,
    ) -> Result<Vec<Pod>>;

    async fn evict_pod(&self, namespace: &str, name: &str) -> Result<Eviction>;

    /// Delete a pod directly, bypassing disruption budgets.
    async fn delete_pod(
        &self,
        namespace: &str,
        name: &str,
        grace_secs: Option<u32>,
    ) -> Result<()>;

    async fn scale_deployment(&self, namespace: &str, name: &str, replicas: i32) -> Result<()>;
}
