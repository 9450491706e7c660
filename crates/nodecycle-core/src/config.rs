//! nodecycle.toml configuration.
//!
//! Every section is optional; missing keys fall back to the defaults
//! below. The parsed [`CycleConfig`] is immutable and passed by reference
//! into every component.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use crate::types::Taint;

/// Orchestration variant, selected globally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum RunMode {
    /// Scale, cordon, drain, one group at a time.
    Sequential = 1,
    /// Scale every group, cordon every outdated node, then drain.
    ScaleAllFirst = 2,
    /// Scale per group, cordon each node right before its drain.
    CordonBeforeDrain = 3,
    /// Age-based planning, drain gated on running batch workloads.
    WorkloadGated = 4,
}

impl TryFrom<u8> for RunMode {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Sequential),
            2 => Ok(Self::ScaleAllFirst),
            3 => Ok(Self::CordonBeforeDrain),
            4 => Ok(Self::WorkloadGated),
            other => Err(format!("run mode must be 1-4, got {other}")),
        }
    }
}

impl From<RunMode> for u8 {
    fn from(mode: RunMode) -> u8 {
        mode as u8
    }
}

/// How the expected cluster node count is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountMode {
    /// Sum of live member lists.
    Actual,
    /// Sum of desired capacities.
    Predictive,
}

/// How a retired member leaves its group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalPolicy {
    Terminate,
    Detach,
}

/// How a node is made unschedulable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CordonMode {
    Cordon,
    Taint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    pub max_attempts: u32,
    #[serde(with = "duration_str")]
    pub interval: Duration,
    /// Pause after every scale call before validating.
    #[serde(with = "duration_str")]
    pub settle_wait: Duration,
    pub count_mode: CountMode,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            max_attempts: 12,
            interval: Duration::from_secs(20),
            settle_wait: Duration::from_secs(90),
            count_mode: CountMode::Actual,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ScaleSettings {
    /// Maximum capacity increase per step; 0 scales in one step.
    pub batch_size: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemovalSettings {
    pub policy: RemovalPolicy,
    pub decrement_capacity: bool,
    pub suspend_processes: bool,
    /// Treat `stopping`/`shutting-down` as converged.
    pub accept_stopping: bool,
    #[serde(with = "duration_str")]
    pub between_members_wait: Duration,
    #[serde(with = "duration_str")]
    pub post_drain_wait: Duration,
}

impl Default for RemovalSettings {
    fn default() -> Self {
        Self {
            policy: RemovalPolicy::Terminate,
            decrement_capacity: true,
            suspend_processes: true,
            accept_stopping: false,
            between_members_wait: Duration::ZERO,
            post_drain_wait: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrainSettings {
    pub mode: CordonMode,
    pub taint_key: String,
    pub taint_effect: String,
    pub max_attempts: u32,
    #[serde(with = "duration_str")]
    pub eviction_pause: Duration,
    /// Fall back to deleting pods without eviction once attempts run out.
    pub force_on_failure: bool,
    pub delete_grace_period_secs: Option<u32>,
}

impl Default for DrainSettings {
    fn default() -> Self {
        Self {
            mode: CordonMode::Cordon,
            taint_key: "nodecycle".to_string(),
            taint_effect: "NoSchedule".to_string(),
            // Five minutes: well past the default 30s pod grace period.
            max_attempts: 60,
            eviction_pause: Duration::from_secs(5),
            force_on_failure: false,
            delete_grace_period_secs: None,
        }
    }
}

impl DrainSettings {
    pub fn taint(&self) -> Taint {
        Taint {
            key: self.taint_key.clone(),
            effect: self.taint_effect.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadSettings {
    pub label_selector: String,
    #[serde(with = "duration_str")]
    pub wait: Duration,
    pub max_age_days: u32,
}

impl Default for WorkloadSettings {
    fn default() -> Self {
        Self {
            label_selector: "app=batch-deploy".to_string(),
            wait: Duration::from_secs(60),
            max_age_days: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSettings {
    pub exclude_label_keys: Vec<String>,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            exclude_label_keys: vec!["spotinst.io/node-lifecycle".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoscalerSettings {
    pub enabled: bool,
    pub namespace: String,
    pub deployment: String,
    pub replicas: i32,
}

impl Default for AutoscalerSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            namespace: "kube-system".to_string(),
            deployment: "cluster-autoscaler".to_string(),
            replicas: 2,
        }
    }
}

/// Tag keys that persist resumable run state on a group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointKeys {
    pub desired_key: String,
    pub original_key: String,
    pub original_max_key: String,
}

impl Default for CheckpointKeys {
    fn default() -> Self {
        Self {
            desired_key: "nodecycle:desired_capacity".to_string(),
            original_key: "nodecycle:original_capacity".to_string(),
            original_max_key: "nodecycle:original_max_capacity".to_string(),
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleConfig {
    pub cluster_name: String,
    /// Restrict the run to these groups; empty means every owned group.
    pub group_names: Vec<String>,
    pub ownership_tag_prefix: String,
    pub run_mode: RunMode,
    pub dry_run: bool,
    pub health: HealthSettings,
    pub scale: ScaleSettings,
    pub removal: RemovalSettings,
    pub drain: DrainSettings,
    pub workload: WorkloadSettings,
    pub nodes: NodeSettings,
    pub autoscaler: AutoscalerSettings,
    pub checkpoint: CheckpointKeys,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            cluster_name: String::new(),
            group_names: Vec::new(),
            ownership_tag_prefix: "kubernetes.io/cluster/".to_string(),
            run_mode: RunMode::Sequential,
            dry_run: false,
            health: HealthSettings::default(),
            scale: ScaleSettings::default(),
            removal: RemovalSettings::default(),
            drain: DrainSettings::default(),
            workload: WorkloadSettings::default(),
            nodes: NodeSettings::default(),
            autoscaler: AutoscalerSettings::default(),
            checkpoint: CheckpointKeys::default(),
        }
    }
}

impl CycleConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("reading {}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.cluster_name.trim().is_empty() {
            return Err(Error::Config("cluster name is required".into()));
        }
        if self.health.max_attempts == 0 {
            return Err(Error::Config("health.max_attempts must be at least 1".into()));
        }
        if self.drain.max_attempts == 0 {
            return Err(Error::Config("drain.max_attempts must be at least 1".into()));
        }
        if self.run_mode == RunMode::WorkloadGated
            && self.workload.label_selector.trim().is_empty()
        {
            return Err(Error::Config(
                "workload.label_selector is required in run mode 4".into(),
            ));
        }
        Ok(())
    }

    /// The cluster ownership tag key, e.g. `kubernetes.io/cluster/prod`.
    pub fn ownership_tag(&self) -> String {
        format!("{}{}", self.ownership_tag_prefix, self.cluster_name)
    }

    /// Retry policy for health checks and lifecycle convergence.
    pub fn health_retry(&self) -> RetryPolicy {
        RetryPolicy::new(self.health.max_attempts, self.health.interval)
    }

    /// Retry policy for eviction rounds.
    pub fn drain_retry(&self) -> RetryPolicy {
        RetryPolicy::new(self.drain.max_attempts, self.drain.eviction_pause)
    }
}

/// Parse a duration string like "5s", "500ms", "2m"; a bare number is seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else if let Some(hours) = s.strip_suffix('h') {
        hours.parse::<u64>().ok().map(|h| Duration::from_secs(h * 3600))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

/// Format a duration the way [`parse_duration`] reads it.
pub fn format_duration(d: Duration) -> String {
    if d.subsec_millis() != 0 {
        format!("{}ms", d.as_millis())
    } else {
        format!("{}s", d.as_secs())
    }
}

mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_duration(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid duration {raw:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = CycleConfig::default();
        assert_eq!(config.run_mode, RunMode::Sequential);
        assert_eq!(config.health.max_attempts, 12);
        assert_eq!(config.health.interval, Duration::from_secs(20));
        assert_eq!(config.health.settle_wait, Duration::from_secs(90));
        assert_eq!(config.removal.policy, RemovalPolicy::Terminate);
        assert_eq!(config.drain.max_attempts, 60);
        assert_eq!(config.drain.eviction_pause, Duration::from_secs(5));
        assert_eq!(config.checkpoint.desired_key, "nodecycle:desired_capacity");
        assert!(!config.dry_run);
    }

    #[test]
    fn parse_partial_file() {
        let config = CycleConfig::from_toml(
            r#"
cluster_name = "prod"
run_mode = 2

[health]
interval = "5s"
count_mode = "predictive"

[removal]
policy = "detach"

[drain]
mode = "taint"
"#,
        )
        .unwrap();
        assert_eq!(config.cluster_name, "prod");
        assert_eq!(config.run_mode, RunMode::ScaleAllFirst);
        assert_eq!(config.health.interval, Duration::from_secs(5));
        assert_eq!(config.health.max_attempts, 12);
        assert_eq!(config.health.count_mode, CountMode::Predictive);
        assert_eq!(config.removal.policy, RemovalPolicy::Detach);
        assert_eq!(config.drain.mode, CordonMode::Taint);
        assert_eq!(config.ownership_tag(), "kubernetes.io/cluster/prod");
    }

    #[test]
    fn rejects_unknown_run_mode() {
        let err = CycleConfig::from_toml("run_mode = 7").unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("run mode")));
    }

    #[test]
    fn rejects_malformed_duration() {
        let err = CycleConfig::from_toml("[health]\ninterval = \"soon\"").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn validate_requires_cluster_and_attempts() {
        let mut config = CycleConfig::default();
        assert!(config.validate().is_err());

        config.cluster_name = "prod".into();
        assert!(config.validate().is_ok());

        config.health.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn toml_roundtrip_preserves_durations() {
        let mut config = CycleConfig::default();
        config.drain.eviction_pause = Duration::from_millis(1500);
        let text = config.to_toml_string().unwrap();
        let back = CycleConfig::from_toml(&text).unwrap();
        assert_eq!(back.drain.eviction_pause, Duration::from_millis(1500));
        assert_eq!(back, config);
    }

    #[test]
    fn from_file_reads_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodecycle.toml");
        std::fs::write(&path, "cluster_name = \"staging\"\n").unwrap();
        let config = CycleConfig::from_file(&path).unwrap();
        assert_eq!(config.cluster_name, "staging");
    }

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("10"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration("soon"), None);
    }
}
