//! Classify fleet members as current or outdated.
//!
//! Two bases are supported. Descriptor planning compares each member's
//! launch configuration or template version against the group's. Age
//! planning marks members older than `workload.max_age_days`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use nodecycle_core::types::{FleetGroup, FleetMember, LaunchDescriptor, MemberLaunch};
use nodecycle_core::{Error, Result};

use crate::context::Context;

/// What makes a member outdated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanBasis {
    Descriptor,
    Age { max_age_days: u32 },
}

/// Outdated members of one group, with the group as seen at planning time.
#[derive(Debug, Clone, Serialize)]
pub struct GroupPlan {
    pub group: FleetGroup,
    pub outdated: Vec<FleetMember>,
}

impl GroupPlan {
    pub fn name(&self) -> &str {
        &self.group.name
    }

    pub fn outdated_ids(&self) -> Vec<&str> {
        self.outdated.iter().map(|m| m.instance_id.as_str()).collect()
    }
}

/// A group left out of the plan, and why.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedGroup {
    pub name: String,
    pub reason: String,
}

/// Result of one planning pass. Never mutated after it is built.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdatePlan {
    pub groups: Vec<GroupPlan>,
    pub skipped: Vec<SkippedGroup>,
}

impl UpdatePlan {
    pub fn outdated_total(&self) -> usize {
        self.groups.iter().map(|g| g.outdated.len()).sum()
    }

    /// One line per group: `name: outdated/total outdated`.
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .groups
            .iter()
            .map(|g| {
                format!(
                    "{}: {}/{} outdated {:?}",
                    g.name(),
                    g.outdated.len(),
                    g.group.members.len(),
                    g.outdated_ids()
                )
            })
            .collect();
        lines.extend(
            self.skipped
                .iter()
                .map(|s| format!("{}: skipped ({})", s.name, s.reason)),
        );
        lines
    }
}

pub struct FleetPlanner<'a> {
    ctx: Context<'a>,
}

impl<'a> FleetPlanner<'a> {
    pub fn new(ctx: Context<'a>) -> Self {
        Self { ctx }
    }

    /// Groups owned by the cluster, narrowed to the configured allow-list.
    pub async fn discover(&self) -> Result<Vec<FleetGroup>> {
        let tag = self.ctx.config.ownership_tag();
        let mut groups = self.ctx.fleet.list_groups(&tag).await?;
        let allow = &self.ctx.config.group_names;
        if !allow.is_empty() {
            groups.retain(|g| allow.contains(&g.name));
        }
        info!(count = groups.len(), tag = %tag, "discovered fleet groups");
        Ok(groups)
    }

    /// Discover and classify every owned group.
    pub async fn plan(&self, basis: PlanBasis, now: DateTime<Utc>) -> Result<UpdatePlan> {
        let groups = self.discover().await?;
        self.classify(groups, basis, now).await
    }

    pub async fn classify(
        &self,
        groups: Vec<FleetGroup>,
        basis: PlanBasis,
        now: DateTime<Utc>,
    ) -> Result<UpdatePlan> {
        let mut plan = UpdatePlan::default();
        for group in groups {
            info!(group = %group.name, ?basis, "checking group");
            let outdated = match basis {
                PlanBasis::Descriptor => match self.outdated_by_descriptor(&group).await {
                    Ok(outdated) => outdated,
                    Err(e @ Error::MissingLaunchDescriptor { .. }) => {
                        error!(group = %group.name, "{e}");
                        plan.skipped.push(SkippedGroup {
                            name: group.name.clone(),
                            reason: e.to_string(),
                        });
                        continue;
                    }
                    Err(e) => return Err(e),
                },
                PlanBasis::Age { max_age_days } => outdated_by_age(&group, max_age_days, now),
            };
            info!(group = %group.name, outdated = outdated.len(), "found outdated members");
            plan.groups.push(GroupPlan { group, outdated });
        }
        Ok(plan)
    }

    async fn outdated_by_descriptor(&self, group: &FleetGroup) -> Result<Vec<FleetMember>> {
        let Some(descriptor) = &group.launch else {
            return Err(Error::MissingLaunchDescriptor {
                group: group.name.clone(),
            });
        };

        match descriptor {
            LaunchDescriptor::Configuration { name } => Ok(group
                .members
                .iter()
                .filter(|m| {
                    let stale = !matches!(&m.launch, MemberLaunch::Configuration { name: lc } if lc == name);
                    log_verdict(m, stale);
                    stale
                })
                .cloned()
                .collect()),
            LaunchDescriptor::Template { name, version }
            | LaunchDescriptor::MixedInstances { name, version } => {
                let resolved = self
                    .ctx
                    .fleet
                    .resolve_template_version(name, version)
                    .await?;
                debug!(group = %group.name, template = %name, selector = %version, resolved, "resolved template version");
                Ok(group
                    .members
                    .iter()
                    .filter(|m| {
                        let stale = !matches!(
                            &m.launch,
                            MemberLaunch::Template { name: lt, version: v } if lt == name && *v == resolved
                        );
                        log_verdict(m, stale);
                        stale
                    })
                    .cloned()
                    .collect())
            }
        }
    }
}

/// Members launched more than `max_age_days` before `now`. Members with an
/// unknown launch time are kept.
pub fn outdated_by_age(group: &FleetGroup, max_age_days: u32, now: DateTime<Utc>) -> Vec<FleetMember> {
    let limit = chrono::Duration::days(i64::from(max_age_days));
    group
        .members
        .iter()
        .filter(|m| match m.launched_at {
            Some(launched) => {
                let stale = now - launched > limit;
                log_verdict(m, stale);
                stale
            }
            None => {
                warn!(instance = %m.instance_id, "launch time unknown, keeping member");
                false
            }
        })
        .cloned()
        .collect()
}

fn log_verdict(member: &FleetMember, stale: bool) {
    if stale {
        info!(instance = %member.instance_id, launch = ?member.launch, "member is outdated");
    } else {
        debug!(instance = %member.instance_id, "member is current");
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use nodecycle_core::CycleConfig;
    use nodecycle_core::fake::{FakeCloud, TEST_CLUSTER, group, member, outdated_member};
    use nodecycle_core::types::VersionSelector;

    use super::*;

    fn config() -> CycleConfig {
        CycleConfig {
            cluster_name: TEST_CLUSTER.to_string(),
            ..CycleConfig::default()
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn one_mismatch_out_of_three() {
        let cloud = FakeCloud::new(vec![group(
            "ng-1",
            3,
            6,
            vec![member("i-1"), outdated_member("i-2"), member("i-3")],
        )]);
        let config = config();
        let planner = FleetPlanner::new(Context::new(&cloud, &cloud, &config));

        let plan = planner.plan(PlanBasis::Descriptor, now()).await.unwrap();
        assert_eq!(plan.groups.len(), 1);
        assert_eq!(plan.groups[0].outdated_ids(), vec!["i-2"]);
        assert_eq!(plan.groups[0].group.members.len(), 3);
        assert!(cloud.calls().is_empty());
    }

    #[tokio::test]
    async fn template_versions_resolve_through_provider() {
        let mut g = group("ng-lt", 2, 4, vec![]);
        g.launch = Some(LaunchDescriptor::Template {
            name: "lt-web".into(),
            version: VersionSelector::Latest,
        });
        let on = |id: &str, version: u64| FleetMember {
            launch: MemberLaunch::Template {
                name: "lt-web".into(),
                version,
            },
            ..member(id)
        };
        g.members = vec![on("i-1", 7), on("i-2", 6), member("i-3")];
        let cloud = FakeCloud::new(vec![g]);
        cloud.with_state(|s| {
            s.template_versions.insert("lt-web".into(), (7, 5));
        });
        let config = config();
        let planner = FleetPlanner::new(Context::new(&cloud, &cloud, &config));

        let plan = planner.plan(PlanBasis::Descriptor, now()).await.unwrap();
        // i-3 carries a launch configuration, not the template.
        assert_eq!(plan.groups[0].outdated_ids(), vec!["i-2", "i-3"]);
    }

    #[tokio::test]
    async fn mixed_instances_use_policy_template() {
        let mut g = group("ng-mixed", 1, 2, vec![]);
        g.launch = Some(LaunchDescriptor::MixedInstances {
            name: "lt-spot".into(),
            version: VersionSelector::Default,
        });
        g.members = vec![FleetMember {
            launch: MemberLaunch::Template {
                name: "lt-spot".into(),
                version: 3,
            },
            ..member("i-1")
        }];
        let cloud = FakeCloud::new(vec![g]);
        cloud.with_state(|s| {
            s.template_versions.insert("lt-spot".into(), (4, 3));
        });
        let config = config();
        let planner = FleetPlanner::new(Context::new(&cloud, &cloud, &config));

        let plan = planner.plan(PlanBasis::Descriptor, now()).await.unwrap();
        assert!(plan.groups[0].outdated.is_empty());
    }

    #[tokio::test]
    async fn group_without_descriptor_is_skipped() {
        let mut bare = group("ng-bare", 1, 1, vec![member("i-9")]);
        bare.launch = None;
        let cloud = FakeCloud::new(vec![bare, group("ng-1", 1, 1, vec![outdated_member("i-1")])]);
        let config = config();
        let planner = FleetPlanner::new(Context::new(&cloud, &cloud, &config));

        let plan = planner.plan(PlanBasis::Descriptor, now()).await.unwrap();
        assert_eq!(plan.groups.len(), 1);
        assert_eq!(plan.groups[0].name(), "ng-1");
        assert_eq!(plan.skipped.len(), 1);
        assert_eq!(plan.skipped[0].name, "ng-bare");
    }

    #[tokio::test]
    async fn allow_list_and_ownership_filter_groups() {
        let mut foreign = group("ng-other", 1, 1, vec![]);
        foreign.tags.clear();
        let cloud = FakeCloud::new(vec![
            group("ng-1", 1, 1, vec![]),
            group("ng-2", 1, 1, vec![]),
            foreign,
        ]);
        let mut config = config();
        let ctx = Context::new(&cloud, &cloud, &config);
        assert_eq!(FleetPlanner::new(ctx).discover().await.unwrap().len(), 2);

        config.group_names = vec!["ng-2".into()];
        let ctx = Context::new(&cloud, &cloud, &config);
        let groups = FleetPlanner::new(ctx).discover().await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name, "ng-2");
    }

    #[test]
    fn age_threshold_is_strict() {
        let aged = |id: &str, days: i64, secs: i64| FleetMember {
            launched_at: Some(now() - chrono::Duration::days(days) - chrono::Duration::seconds(secs)),
            ..member(id)
        };
        let g = group(
            "ng-1",
            4,
            4,
            vec![aged("i-old", 31, 0), aged("i-edge", 30, 0), aged("i-over", 30, 1), member("i-unknown")],
        );

        let outdated: Vec<_> = outdated_by_age(&g, 30, now())
            .into_iter()
            .map(|m| m.instance_id)
            .collect();
        assert_eq!(outdated, vec!["i-old", "i-over"]);
    }

    #[test]
    fn summary_lines_report_counts() {
        let plan = UpdatePlan {
            groups: vec![GroupPlan {
                group: group("ng-1", 2, 2, vec![member("i-1"), outdated_member("i-2")]),
                outdated: vec![outdated_member("i-2")],
            }],
            skipped: vec![SkippedGroup {
                name: "ng-bare".into(),
                reason: "no descriptor".into(),
            }],
        };
        let lines = plan.summary_lines();
        assert!(lines[0].starts_with("ng-1: 1/2 outdated"));
        assert_eq!(lines[1], "ng-bare: skipped (no descriptor)");
        assert_eq!(plan.outdated_total(), 1);
    }
}
