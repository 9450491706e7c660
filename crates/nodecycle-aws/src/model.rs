//! Response shapes of the autoscaling and ec2 commands we call, and their
//! conversion into domain types.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::warn;

use nodecycle_core::types::{
    FleetGroup, FleetMember, LaunchDescriptor, Lifecycle, MemberHealth, MemberLaunch,
    VersionSelector,
};
use nodecycle_core::{Error, Result};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct DescribeGroupsOutput {
    #[serde(default)]
    pub auto_scaling_groups: Vec<AsgGroup>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct AsgGroup {
    pub auto_scaling_group_name: String,
    pub desired_capacity: u32,
    pub min_size: u32,
    pub max_size: u32,
    pub launch_configuration_name: Option<String>,
    pub launch_template: Option<TemplateSpec>,
    pub mixed_instances_policy: Option<MixedInstancesPolicy>,
    #[serde(default)]
    pub instances: Vec<AsgInstance>,
    #[serde(default)]
    pub tags: Vec<AsgTag>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct TemplateSpec {
    pub launch_template_name: String,
    pub version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct MixedInstancesPolicy {
    pub launch_template: MixedTemplate,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct MixedTemplate {
    pub launch_template_specification: TemplateSpec,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct AsgInstance {
    pub instance_id: String,
    pub launch_configuration_name: Option<String>,
    pub launch_template: Option<TemplateSpec>,
    pub health_status: String,
    pub lifecycle_state: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct AsgTag {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct DescribeInstancesOutput {
    #[serde(default)]
    pub reservations: Vec<Reservation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct Reservation {
    #[serde(default)]
    pub instances: Vec<Ec2Instance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct Ec2Instance {
    pub instance_id: String,
    pub launch_time: Option<DateTime<Utc>>,
    pub state: Ec2State,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct Ec2State {
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct DescribeAsgInstancesOutput {
    #[serde(default)]
    pub auto_scaling_instances: Vec<AsgInstanceGroup>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct AsgInstanceGroup {
    pub auto_scaling_group_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct DescribeTemplatesOutput {
    #[serde(default)]
    pub launch_templates: Vec<LaunchTemplate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct LaunchTemplate {
    pub latest_version_number: u64,
    pub default_version_number: u64,
}

impl Ec2Instance {
    pub fn lifecycle(&self) -> Result<Lifecycle> {
        Lifecycle::parse(&self.state.name).ok_or_else(|| {
            Error::Fleet(format!(
                "instance {} reports unknown state {:?}",
                self.instance_id, self.state.name
            ))
        })
    }
}

impl AsgGroup {
    /// The group's launch descriptor. An unreadable template version is
    /// reported as no descriptor so the planner skips only this group.
    fn descriptor(&self) -> Option<LaunchDescriptor> {
        if let Some(name) = &self.launch_configuration_name {
            return Some(LaunchDescriptor::Configuration { name: name.clone() });
        }
        if let Some(spec) = &self.launch_template {
            let (name, version) = self.template(spec)?;
            return Some(LaunchDescriptor::Template { name, version });
        }
        if let Some(policy) = &self.mixed_instances_policy {
            let (name, version) =
                self.template(&policy.launch_template.launch_template_specification)?;
            return Some(LaunchDescriptor::MixedInstances { name, version });
        }
        None
    }

    fn template(&self, spec: &TemplateSpec) -> Option<(String, VersionSelector)> {
        // The API omits the version when the group tracks $Default.
        let raw = spec.version.as_deref().unwrap_or("$Default");
        let Some(version) = VersionSelector::parse(raw) else {
            warn!(
                group = %self.auto_scaling_group_name,
                template = %spec.launch_template_name,
                version = raw,
                "unrecognized launch template version"
            );
            return None;
        };
        Some((spec.launch_template_name.clone(), version))
    }

    /// Convert to a domain snapshot. `launch_times` comes from ec2.
    pub fn into_group(self, launch_times: &HashMap<String, DateTime<Utc>>) -> FleetGroup {
        let launch = self.descriptor();
        let members = self
            .instances
            .iter()
            .map(|i| FleetMember {
                instance_id: i.instance_id.clone(),
                launch: member_launch(i),
                health: if i.health_status.eq_ignore_ascii_case("healthy") {
                    MemberHealth::Healthy
                } else {
                    MemberHealth::Unhealthy
                },
                lifecycle: asg_lifecycle(&i.lifecycle_state),
                launched_at: launch_times.get(&i.instance_id).copied(),
            })
            .collect();
        FleetGroup {
            name: self.auto_scaling_group_name,
            desired_capacity: self.desired_capacity,
            min_size: self.min_size,
            max_size: self.max_size,
            launch,
            members,
            tags: self.tags.into_iter().map(|t| (t.key, t.value)).collect(),
        }
    }
}

fn member_launch(instance: &AsgInstance) -> MemberLaunch {
    if let Some(name) = &instance.launch_configuration_name {
        return MemberLaunch::Configuration { name: name.clone() };
    }
    match &instance.launch_template {
        Some(spec) => match spec.version.as_deref().and_then(|v| v.parse().ok()) {
            Some(version) => MemberLaunch::Template {
                name: spec.launch_template_name.clone(),
                version,
            },
            None => MemberLaunch::Unknown,
        },
        None => MemberLaunch::Unknown,
    }
}

/// Map an Auto Scaling lifecycle state (`InService`, `Terminating:Wait`, ...).
fn asg_lifecycle(state: &str) -> Lifecycle {
    if state.starts_with("Pending") {
        Lifecycle::Pending
    } else if state == "Terminated" {
        Lifecycle::Terminated
    } else if state.starts_with("Terminating") {
        Lifecycle::ShuttingDown
    } else {
        Lifecycle::Running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GROUPS: &str = r#"{
      "AutoScalingGroups": [
        {
          "AutoScalingGroupName": "prod-ng-1",
          "MinSize": 1,
          "MaxSize": 6,
          "DesiredCapacity": 3,
          "MixedInstancesPolicy": {
            "LaunchTemplate": {
              "LaunchTemplateSpecification": {
                "LaunchTemplateId": "lt-0abc",
                "LaunchTemplateName": "prod-workers",
                "Version": "$Latest"
              }
            }
          },
          "Instances": [
            {
              "InstanceId": "i-0aaa",
              "LifecycleState": "InService",
              "HealthStatus": "Healthy",
              "LaunchTemplate": {"LaunchTemplateName": "prod-workers", "Version": "7"}
            },
            {
              "InstanceId": "i-0bbb",
              "LifecycleState": "Terminating:Wait",
              "HealthStatus": "Unhealthy"
            }
          ],
          "Tags": [
            {"Key": "kubernetes.io/cluster/prod", "Value": "owned", "ResourceId": "prod-ng-1"},
            {"Key": "nodecycle:desired_capacity", "Value": "4", "ResourceId": "prod-ng-1"}
          ]
        }
      ]
    }"#;

    #[test]
    fn parses_mixed_instances_group() {
        let out: DescribeGroupsOutput = serde_json::from_str(GROUPS).unwrap();
        let mut times = HashMap::new();
        let launched: DateTime<Utc> = "2024-05-01T10:00:00Z".parse().unwrap();
        times.insert("i-0aaa".to_string(), launched);

        let group = out.auto_scaling_groups.into_iter().next().unwrap().into_group(&times);
        assert_eq!(group.name, "prod-ng-1");
        assert_eq!(group.desired_capacity, 3);
        assert_eq!(
            group.launch,
            Some(LaunchDescriptor::MixedInstances {
                name: "prod-workers".into(),
                version: VersionSelector::Latest
            })
        );
        assert_eq!(group.tag("nodecycle:desired_capacity"), Some("4"));

        let first = &group.members[0];
        assert_eq!(
            first.launch,
            MemberLaunch::Template {
                name: "prod-workers".into(),
                version: 7
            }
        );
        assert_eq!(first.launched_at, Some(launched));
        assert_eq!(first.health, MemberHealth::Healthy);

        let second = &group.members[1];
        assert_eq!(second.launch, MemberLaunch::Unknown);
        assert_eq!(second.lifecycle, Lifecycle::ShuttingDown);
        assert_eq!(second.health, MemberHealth::Unhealthy);
        assert_eq!(second.launched_at, None);
    }

    #[test]
    fn group_without_descriptor_has_none() {
        let raw = r#"{"AutoScalingGroupName": "bare", "MinSize": 0, "MaxSize": 1, "DesiredCapacity": 0}"#;
        let group: AsgGroup = serde_json::from_str(raw).unwrap();
        assert_eq!(group.into_group(&HashMap::new()).launch, None);
    }

    #[test]
    fn template_without_version_tracks_default() {
        let raw = r#"{
          "AutoScalingGroupName": "lt", "MinSize": 0, "MaxSize": 1, "DesiredCapacity": 0,
          "LaunchTemplate": {"LaunchTemplateName": "web"}
        }"#;
        let group: AsgGroup = serde_json::from_str(raw).unwrap();
        assert_eq!(
            group.into_group(&HashMap::new()).launch,
            Some(LaunchDescriptor::Template {
                name: "web".into(),
                version: VersionSelector::Default
            })
        );
    }

    #[test]
    fn unreadable_template_version_drops_descriptor() {
        let raw = r#"{
          "AutoScalingGroupName": "odd", "MinSize": 0, "MaxSize": 2, "DesiredCapacity": 1,
          "LaunchTemplate": {"LaunchTemplateName": "web", "Version": "newest"},
          "Instances": [{"InstanceId": "i-0aaa", "LifecycleState": "InService", "HealthStatus": "Healthy"}]
        }"#;
        let group: AsgGroup = serde_json::from_str(raw).unwrap();
        let group = group.into_group(&HashMap::new());
        assert_eq!(group.name, "odd");
        assert_eq!(group.launch, None);
        assert_eq!(group.members.len(), 1);
    }

    #[test]
    fn parses_instance_state_and_launch_time() {
        let raw = r#"{
          "Reservations": [{"Instances": [{
            "InstanceId": "i-0aaa",
            "LaunchTime": "2024-05-01T10:00:00+00:00",
            "State": {"Code": 48, "Name": "terminated"}
          }]}]
        }"#;
        let out: DescribeInstancesOutput = serde_json::from_str(raw).unwrap();
        let instance = &out.reservations[0].instances[0];
        assert_eq!(instance.lifecycle().unwrap(), Lifecycle::Terminated);
        assert!(instance.launch_time.is_some());
    }

    #[test]
    fn asg_lifecycle_states() {
        assert_eq!(asg_lifecycle("Pending:Wait"), Lifecycle::Pending);
        assert_eq!(asg_lifecycle("InService"), Lifecycle::Running);
        assert_eq!(asg_lifecycle("Terminating"), Lifecycle::ShuttingDown);
        assert_eq!(asg_lifecycle("Terminated"), Lifecycle::Terminated);
    }
}
