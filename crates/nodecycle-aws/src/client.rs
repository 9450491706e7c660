//! `aws` command invocation.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::process::Command;
use tracing::debug;

use nodecycle_core::types::{FleetGroup, GroupName, Lifecycle, VersionSelector};
use nodecycle_core::{Error, FleetApi, Result};

use crate::model::{
    DescribeAsgInstancesOutput, DescribeGroupsOutput, DescribeInstancesOutput,
    DescribeTemplatesOutput,
};

/// Processes suspended while members are being retired.
const SUSPENDED_PROCESSES: &[&str] = &["Launch", "ReplaceUnhealthy"];

/// Fleet client backed by the `aws` executable.
#[derive(Debug, Clone)]
pub struct AwsFleet {
    program: String,
    region: Option<String>,
    profile: Option<String>,
}

impl Default for AwsFleet {
    fn default() -> Self {
        Self {
            program: "aws".to_string(),
            region: None,
            profile: None,
        }
    }
}

impl AwsFleet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_region(mut self, region: Option<String>) -> Self {
        self.region = region;
        self
    }

    pub fn with_profile(mut self, profile: Option<String>) -> Self {
        self.profile = profile;
        self
    }

    /// Use a different executable, e.g. a wrapper script.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Run `aws <service> <operation> <args> --output json` and return stdout.
    async fn run(&self, service: &str, operation: &str, args: &[String]) -> Result<String> {
        let mut cmd = Command::new(&self.program);
        cmd.arg(service)
            .arg(operation)
            .args(args)
            .args(["--output", "json"]);
        if let Some(region) = &self.region {
            cmd.args(["--region", region.as_str()]);
        }
        if let Some(profile) = &self.profile {
            cmd.args(["--profile", profile.as_str()]);
        }
        debug!(service, operation, ?args, "running aws");

        let output = cmd
            .output()
            .await
            .map_err(|e| Error::Fleet(format!("failed to execute {}: {e}", self.program)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Fleet(format!(
                "aws {service} {operation} failed ({}): {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn query<T: DeserializeOwned>(
        &self,
        service: &str,
        operation: &str,
        args: &[String],
    ) -> Result<T> {
        let stdout = self.run(service, operation, args).await?;
        serde_json::from_str(&stdout).map_err(|e| {
            Error::Fleet(format!("unexpected aws {service} {operation} output: {e}"))
        })
    }

    async fn describe_groups(&self, args: Vec<String>) -> Result<Vec<FleetGroup>> {
        let out: DescribeGroupsOutput = self
            .query("autoscaling", "describe-auto-scaling-groups", &args)
            .await?;
        let ids: Vec<String> = out
            .auto_scaling_groups
            .iter()
            .flat_map(|g| g.instances.iter().map(|i| i.instance_id.clone()))
            .collect();
        let launch_times = self.launch_times(&ids).await?;
        Ok(out
            .auto_scaling_groups
            .into_iter()
            .map(|g| g.into_group(&launch_times))
            .collect())
    }

    async fn launch_times(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, chrono::DateTime<chrono::Utc>>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let mut args = vec!["--instance-ids".to_string()];
        args.extend(ids.iter().cloned());
        let out: DescribeInstancesOutput = self.query("ec2", "describe-instances", &args).await?;
        Ok(out
            .reservations
            .into_iter()
            .flat_map(|r| r.instances)
            .filter_map(|i| i.launch_time.map(|t| (i.instance_id, t)))
            .collect())
    }

    fn group_tag_spec(group: &str, key: &str, value: Option<&str>) -> String {
        let mut spec = format!("ResourceId={group},ResourceType=auto-scaling-group,Key={key}");
        if let Some(value) = value {
            spec.push_str(&format!(",Value={value},PropagateAtLaunch=false"));
        }
        spec
    }
}

fn decrement_flag(decrement: bool) -> String {
    if decrement {
        "--should-decrement-desired-capacity".to_string()
    } else {
        "--no-should-decrement-desired-capacity".to_string()
    }
}

fn args<const N: usize>(items: [&str; N]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[async_trait]
impl FleetApi for AwsFleet {
    async fn list_groups(&self, ownership_tag: &str) -> Result<Vec<FleetGroup>> {
        let filters = args([
            "--filters",
            &format!("Name=tag-key,Values={ownership_tag}"),
            "Name=tag-value,Values=owned",
        ]);
        let mut groups = self.describe_groups(filters).await?;
        // The two filters match independently; require the exact pair.
        groups.retain(|g| g.tag(ownership_tag) == Some("owned"));
        Ok(groups)
    }

    async fn describe_group(&self, name: &str) -> Result<FleetGroup> {
        self.describe_groups(args(["--auto-scaling-group-names", name]))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Fleet(format!("auto scaling group {name} not found")))
    }

    async fn set_capacity(&self, name: &str, desired: u32, max: u32) -> Result<()> {
        self.run(
            "autoscaling",
            "update-auto-scaling-group",
            &args([
                "--auto-scaling-group-name",
                name,
                "--desired-capacity",
                &desired.to_string(),
                "--max-size",
                &max.to_string(),
            ]),
        )
        .await?;
        Ok(())
    }

    async fn suspend_processes(&self, name: &str) -> Result<()> {
        let mut a = args(["--auto-scaling-group-name", name, "--scaling-processes"]);
        a.extend(SUSPENDED_PROCESSES.iter().map(|p| p.to_string()));
        self.run("autoscaling", "suspend-processes", &a).await?;
        Ok(())
    }

    async fn resume_processes(&self, name: &str) -> Result<()> {
        let mut a = args(["--auto-scaling-group-name", name, "--scaling-processes"]);
        a.extend(SUSPENDED_PROCESSES.iter().map(|p| p.to_string()));
        self.run("autoscaling", "resume-processes", &a).await?;
        Ok(())
    }

    async fn put_tag(&self, name: &str, key: &str, value: &str) -> Result<()> {
        let spec = Self::group_tag_spec(name, key, Some(value));
        self.run("autoscaling", "create-or-update-tags", &args(["--tags", &spec]))
            .await?;
        Ok(())
    }

    async fn delete_tag(&self, name: &str, key: &str) -> Result<()> {
        let spec = Self::group_tag_spec(name, key, None);
        self.run("autoscaling", "delete-tags", &args(["--tags", &spec]))
            .await?;
        Ok(())
    }

    async fn terminate_member(&self, instance_id: &str, decrement: bool) -> Result<()> {
        self.run(
            "autoscaling",
            "terminate-instance-in-auto-scaling-group",
            &args(["--instance-id", instance_id, &decrement_flag(decrement)]),
        )
        .await?;
        Ok(())
    }

    async fn detach_member(&self, group: &str, instance_id: &str, decrement: bool) -> Result<()> {
        self.run(
            "autoscaling",
            "detach-instances",
            &args([
                "--auto-scaling-group-name",
                group,
                "--instance-ids",
                instance_id,
                &decrement_flag(decrement),
            ]),
        )
        .await?;
        Ok(())
    }

    async fn member_lifecycle(&self, instance_id: &str) -> Result<Lifecycle> {
        let out: DescribeInstancesOutput = self
            .query("ec2", "describe-instances", &args(["--instance-ids", instance_id]))
            .await?;
        out.reservations
            .iter()
            .flat_map(|r| r.instances.iter())
            .find(|i| i.instance_id == instance_id)
            .ok_or_else(|| Error::Fleet(format!("instance {instance_id} not found")))?
            .lifecycle()
    }

    async fn member_group(&self, instance_id: &str) -> Result<Option<GroupName>> {
        let out: DescribeAsgInstancesOutput = self
            .query(
                "autoscaling",
                "describe-auto-scaling-instances",
                &args(["--instance-ids", instance_id]),
            )
            .await?;
        Ok(out
            .auto_scaling_instances
            .into_iter()
            .next()
            .map(|i| i.auto_scaling_group_name))
    }

    async fn resolve_template_version(
        &self,
        template: &str,
        selector: &VersionSelector,
    ) -> Result<u64> {
        if let VersionSelector::Number(n) = selector {
            return Ok(*n);
        }
        let out: DescribeTemplatesOutput = self
            .query(
                "ec2",
                "describe-launch-templates",
                &args(["--launch-template-names", template]),
            )
            .await?;
        let lt = out
            .launch_templates
            .into_iter()
            .next()
            .ok_or_else(|| Error::Fleet(format!("launch template {template} not found")))?;
        Ok(match selector {
            VersionSelector::Default => lt.default_version_number,
            _ => lt.latest_version_number,
        })
    }
}
