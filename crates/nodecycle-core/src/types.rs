//! Domain types for fleet groups, their members, and orchestrator nodes.
//!
//! These are snapshots of state owned by the two external control planes.
//! The engine reads them, decides, and issues mutations through the
//! collaborator traits in [`crate::api`]; it never owns their lifecycle.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name of a fleet group (autoscaling group).
pub type GroupName = String;

/// Provider-assigned identifier of a fleet member (e.g. `i-0abc...`).
pub type InstanceId = String;

// ── Launch descriptors ──────────────────────────────────────────────

/// Version selector of a launch template as configured on a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersionSelector {
    /// `$Latest` is resolved against the provider.
    Latest,
    /// `$Default` is resolved against the provider.
    Default,
    /// A concrete version number.
    Number(u64),
}

impl VersionSelector {
    /// Parse the provider's textual form (`$Latest`, `$Default`, `7`).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "$Latest" => Some(Self::Latest),
            "$Default" => Some(Self::Default),
            other => other.parse::<u64>().ok().map(Self::Number),
        }
    }
}

impl std::fmt::Display for VersionSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Latest => f.write_str("$Latest"),
            Self::Default => f.write_str("$Default"),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

/// The versioned configuration a group launches new members from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LaunchDescriptor {
    /// A launch configuration, identified by name only.
    Configuration { name: String },
    /// A launch template with a version selector.
    Template {
        name: String,
        version: VersionSelector,
    },
    /// A mixed-instances policy wrapping a launch template.
    MixedInstances {
        name: String,
        version: VersionSelector,
    },
}

/// The launch descriptor a member was actually created from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MemberLaunch {
    Configuration { name: String },
    Template { name: String, version: u64 },
    /// The provider reported nothing (e.g. the configuration was deleted).
    Unknown,
}

// ── Fleet ───────────────────────────────────────────────────────────

/// Health as reported by the fleet group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberHealth {
    Healthy,
    Unhealthy,
}

/// Lifecycle state of the underlying instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Pending,
    Running,
    Stopping,
    Stopped,
    ShuttingDown,
    Terminated,
}

impl Lifecycle {
    /// Parse the provider's state name (`running`, `shutting-down`, ...).
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "stopping" => Some(Self::Stopping),
            "stopped" => Some(Self::Stopped),
            "shutting-down" => Some(Self::ShuttingDown),
            "terminated" => Some(Self::Terminated),
            _ => None,
        }
    }

    /// Whether the instance has fully stopped.
    pub fn is_stopped(self) -> bool {
        matches!(self, Self::Stopped | Self::Terminated)
    }

    /// Whether the instance is on its way to stopping.
    pub fn is_stopping(self) -> bool {
        matches!(self, Self::Stopping | Self::ShuttingDown)
    }
}

/// A single member of a fleet group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetMember {
    pub instance_id: InstanceId,
    pub launch: MemberLaunch,
    pub health: MemberHealth,
    pub lifecycle: Lifecycle,
    /// Launch time, when the provider reports it.
    pub launched_at: Option<DateTime<Utc>>,
}

/// Snapshot of a fleet group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetGroup {
    pub name: GroupName,
    pub desired_capacity: u32,
    pub min_size: u32,
    pub max_size: u32,
    /// `None` when the provider reports no recognizable descriptor.
    pub launch: Option<LaunchDescriptor>,
    pub members: Vec<FleetMember>,
    pub tags: HashMap<String, String>,
}

impl FleetGroup {
    /// Value of a tag, if present.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// Members whose reported health is not healthy.
    pub fn unhealthy_members(&self) -> impl Iterator<Item = &FleetMember> {
        self.members
            .iter()
            .filter(|m| m.health != MemberHealth::Healthy)
    }
}

// ── Orchestrator ────────────────────────────────────────────────────

/// A cluster node as seen by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorNode {
    pub name: String,
    /// Provider-assigned identifier, e.g. `aws:///us-east-1a/i-0abc`.
    pub provider_id: String,
    pub ready: bool,
    pub unschedulable: bool,
    pub labels: BTreeMap<String, String>,
}

impl OrchestratorNode {
    /// Whether this node backs the given fleet member.
    pub fn backs(&self, instance_id: &str) -> bool {
        !instance_id.is_empty() && self.provider_id.contains(instance_id)
    }
}

/// A scheduling taint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Taint {
    pub key: String,
    pub effect: String,
}

/// Owner reference on a pod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodOwner {
    pub kind: String,
    pub name: String,
    pub controller: bool,
}

/// A pod scheduled on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pod {
    pub namespace: String,
    pub name: String,
    /// `Running`, `Pending`, `Succeeded`, ...
    pub phase: String,
    pub owners: Vec<PodOwner>,
    pub labels: BTreeMap<String, String>,
}

impl Pod {
    /// `namespace/name`.
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// Result of an eviction request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eviction {
    /// The eviction was accepted.
    Evicted,
    /// Rejected by a disruption budget (HTTP 429). Retry later.
    Throttled,
}
