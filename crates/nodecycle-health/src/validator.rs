//! The four-condition health predicate.
//!
//! One bounded retry loop; every attempt re-reads both control planes and
//! checks, in order:
//!
//! 1. the group's member count equals the target capacity
//! 2. every member reports healthy
//! 3. the managed node count equals the expected cluster member count
//! 4. every managed node is ready
//!
//! A partial pass never carries over to the next attempt.

use tracing::{debug, info, warn};

use nodecycle_core::config::CountMode;
use nodecycle_core::nodes::managed_nodes;
use nodecycle_core::{CycleConfig, Error, FleetApi, OrchestratorApi, Result};

/// Outcome of one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Verdict {
    Healthy,
    GroupSize { actual: usize, target: u32 },
    UnhealthyMembers(Vec<String>),
    NodeCount { actual: usize, expected: u32 },
    NodesNotReady(Vec<String>),
}

pub struct HealthValidator<'a> {
    fleet: &'a dyn FleetApi,
    orchestrator: &'a dyn OrchestratorApi,
    config: &'a CycleConfig,
}

impl<'a> HealthValidator<'a> {
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

    /// Number of nodes the orchestrator should see across every group the
    /// cluster owns.
    ///
    /// Predictive mode sums desired capacities, which is right when members
    /// are mid-termination but already subtracted from desired capacity.
    /// Actual mode sums live member lists.
    pub async fn expected_node_count(&self) -> Result<u32> {
        let groups = self.fleet.list_groups(&self.config.ownership_tag()).await?;
        let count: u32 = match self.config.health.count_mode {
            CountMode::Predictive => groups.iter().map(|g| g.desired_capacity).sum(),
            CountMode::Actual => groups.iter().map(|g| g.members.len() as u32).sum(),
        };
        info!(
            count,
            mode = ?self.config.health.count_mode,
            "expected cluster node count"
        );
        Ok(count)
    }

    /// Confirm `group` holds `target` healthy members and the cluster shows
    /// `expected_nodes` ready nodes, within the configured attempts.
    pub async fn validate(&self, group: &str, target: u32, expected_nodes: u32) -> Result<()> {
        if self.config.dry_run {
            info!(group, target, expected_nodes, "skipping health validation (dry run)");
            return Ok(());
        }

        let policy = self.config.health_retry();
        let outcome = policy
            .poll("cluster health", |attempt| async move {
                let verdict = self.check(group, target, expected_nodes).await?;
                if verdict != Verdict::Healthy {
                    debug!(group, attempt, ?verdict, "cluster not healthy yet");
                }
                Ok(verdict == Verdict::Healthy)
            })
            .await;

        match outcome {
            Ok(attempt) => {
                info!(group, target, expected_nodes, attempt, "cluster is healthy");
                Ok(())
            }
            Err(Error::Timeout { attempts, .. }) => {
                warn!(group, attempts, "cluster health validation exhausted its attempts");
                Err(Error::HealthCheckFailed {
                    group: group.to_string(),
                    attempts,
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn check(&self, group: &str, target: u32, expected_nodes: u32) -> Result<Verdict> {
        let snapshot = self.fleet.describe_group(group).await?;
        if snapshot.members.len() != target as usize {
            return Ok(Verdict::GroupSize {
                actual: snapshot.members.len(),
                target,
            });
        }

        let unhealthy: Vec<String> = snapshot
            .unhealthy_members()
            .map(|m| m.instance_id.clone())
            .collect();
        if !unhealthy.is_empty() {
            return Ok(Verdict::UnhealthyMembers(unhealthy));
        }

        let nodes = managed_nodes(
            self.orchestrator.list_nodes().await?,
            &self.config.nodes.exclude_label_keys,
        );
        if nodes.len() != expected_nodes as usize {
            return Ok(Verdict::NodeCount {
                actual: nodes.len(),
                expected: expected_nodes,
            });
        }

        let not_ready: Vec<String> = nodes
            .iter()
            .filter(|n| !n.ready)
            .map(|n| n.name.clone())
            .collect();
        if !not_ready.is_empty() {
            return Ok(Verdict::NodesNotReady(not_ready));
        }

        Ok(Verdict::Healthy)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use nodecycle_core::fake::{FakeCloud, TEST_CLUSTER, group, member, node};
    use nodecycle_core::types::MemberHealth;

    use super::*;

    fn config() -> CycleConfig {
        let mut config = CycleConfig::default();
        config.cluster_name = TEST_CLUSTER.to_string();
        config.health.max_attempts = 3;
        config.health.interval = Duration::ZERO;
        config
    }

    fn cloud() -> FakeCloud {
        FakeCloud::new(vec![group(
            "ng-1",
            3,
            6,
            vec![member("i-1"), member("i-2"), member("i-3")],
        )])
    }

    #[tokio::test]
    async fn passes_when_all_conditions_hold() {
        let cloud = cloud();
        let config = config();
        let validator = HealthValidator::new(&cloud, &cloud, &config);
        validator.validate("ng-1", 3, 3).await.unwrap();
    }

    #[tokio::test]
    async fn count_match_with_unready_node_fails() {
        let cloud = cloud();
        cloud.with_state(|s| s.nodes[1].ready = false);
        let config = config();
        let validator = HealthValidator::new(&cloud, &cloud, &config);

        let err = validator.validate("ng-1", 3, 3).await.unwrap_err();
        assert!(matches!(
            err,
            Error::HealthCheckFailed { ref group, attempts: 3 } if group == "ng-1"
        ));
    }

    #[tokio::test]
    async fn wrong_group_size_fails() {
        let cloud = cloud();
        let config = config();
        let validator = HealthValidator::new(&cloud, &cloud, &config);
        assert!(validator.validate("ng-1", 4, 3).await.is_err());
    }

    #[tokio::test]
    async fn unhealthy_member_fails() {
        let cloud = cloud();
        cloud.with_state(|s| {
            if let Some(g) = s.groups.get_mut("ng-1") {
                g.members[0].health = MemberHealth::Unhealthy;
            }
        });
        let config = config();
        let validator = HealthValidator::new(&cloud, &cloud, &config);
        assert!(validator.validate("ng-1", 3, 3).await.is_err());
    }

    #[tokio::test]
    async fn excluded_nodes_are_not_counted() {
        let cloud = cloud();
        cloud.with_state(|s| {
            let mut spot = node("spot-1", "i-spot");
            spot.labels
                .insert("spotinst.io/node-lifecycle".into(), "spot".into());
            spot.ready = false;
            s.nodes.push(spot);
        });
        let config = config();
        let validator = HealthValidator::new(&cloud, &cloud, &config);
        validator.validate("ng-1", 3, 3).await.unwrap();
    }

    #[tokio::test]
    async fn recovers_within_attempts() {
        let cloud = cloud();
        cloud.with_state(|s| {
            s.slow_health = true;
            s.auto_provision = true;
        });
        let config = config();
        // New member starts unhealthy and flips after the first describe.
        cloud.set_capacity("ng-1", 4, 6).await.unwrap();
        let validator = HealthValidator::new(&cloud, &cloud, &config);
        validator.validate("ng-1", 4, 4).await.unwrap();
    }

    #[tokio::test]
    async fn expected_count_modes() {
        let cloud = FakeCloud::new(vec![
            group("ng-1", 3, 6, vec![member("i-1"), member("i-2")]),
            group("ng-2", 1, 2, vec![member("i-3")]),
        ]);
        let mut config = config();
        assert_eq!(
            HealthValidator::new(&cloud, &cloud, &config)
                .expected_node_count()
                .await
                .unwrap(),
            3
        );

        config.health.count_mode = CountMode::Predictive;
        assert_eq!(
            HealthValidator::new(&cloud, &cloud, &config)
                .expected_node_count()
                .await
                .unwrap(),
            4
        );
    }

    #[tokio::test]
    async fn dry_run_skips_validation() {
        let cloud = cloud();
        let mut config = config();
        config.dry_run = true;
        let validator = HealthValidator::new(&cloud, &cloud, &config);
        validator.validate("ng-1", 10, 10).await.unwrap();
    }
}
