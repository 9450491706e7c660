//! Make a node unschedulable and evict its pods.

use tracing::{debug, info, warn};

use nodecycle_core::config::CordonMode;
use nodecycle_core::types::{Eviction, Pod};
use nodecycle_core::{Error, Result};

use crate::context::Context;

/// Owner kinds whose pods stay on the node until it is deleted.
const NODE_LOCAL_OWNERS: &[&str] = &["DaemonSet", "Node"];

pub struct NodeDrainer<'a> {
    ctx: Context<'a>,
}

impl<'a> NodeDrainer<'a> {
    pub fn new(ctx: Context<'a>) -> Self {
        Self { ctx }
    }

    /// Cordon or taint `node`, per `drain.mode`.
    pub async fn make_unschedulable(&self, node: &str) -> Result<()> {
        match self.ctx.config.drain.mode {
            CordonMode::Cordon => {
                info!(node, "cordoning node");
                self.ctx.orchestrator.cordon_node(node).await
            }
            CordonMode::Taint => {
                let taint = self.ctx.config.drain.taint();
                info!(node, key = %taint.key, effect = %taint.effect, "tainting node");
                self.ctx.orchestrator.taint_node(node, &taint).await
            }
        }
    }

    /// Evict every pod not owned by a node-local controller.
    ///
    /// Throttled evictions are retried on the next round. When rounds run
    /// out, pods are deleted directly if `drain.force_on_failure` is set;
    /// otherwise the drain fails.
    pub async fn drain(&self, node: &str) -> Result<()> {
        info!(node, "draining node");
        let policy = self.ctx.config.drain_retry();

        if self.ctx.config.dry_run {
            let pods = self.evictable(node).await?;
            for pod in &pods {
                info!(node, pod = %pod.key(), "would evict pod (dry run)");
            }
            return Ok(());
        }

        let evicted = policy
            .poll(&format!("drain of node {node}"), |attempt| async move {
                let pods = self.evictable(node).await?;
                if pods.is_empty() {
                    return Ok(true);
                }
                for pod in &pods {
                    match self.ctx.orchestrator.evict_pod(&pod.namespace, &pod.name).await? {
                        Eviction::Evicted => debug!(node, pod = %pod.key(), "evicted pod"),
                        Eviction::Throttled => {
                            warn!(node, pod = %pod.key(), attempt, "eviction throttled by disruption budget")
                        }
                    }
                }
                Ok(self.evictable(node).await?.is_empty())
            })
            .await;

        match evicted {
            Ok(_) => {
                info!(node, "node drained");
                Ok(())
            }
            Err(Error::Timeout { attempts, .. }) => {
                let remaining = self.evictable(node).await?;
                if !self.ctx.config.drain.force_on_failure {
                    return Err(Error::DrainFailed {
                        node: node.to_string(),
                        reason: format!(
                            "{} pod(s) still present after {attempts} eviction rounds: {}",
                            remaining.len(),
                            keys(&remaining)
                        ),
                    });
                }
                warn!(node, remaining = remaining.len(), "eviction exhausted, deleting pods");
                self.force(node, &remaining).await
            }
            Err(e) => Err(e),
        }
    }

    async fn force(&self, node: &str, pods: &[Pod]) -> Result<()> {
        let grace = self.ctx.config.drain.delete_grace_period_secs;
        for pod in pods {
            self.ctx
                .orchestrator
                .delete_pod(&pod.namespace, &pod.name, grace)
                .await?;
        }
        self.ctx
            .config
            .drain_retry()
            .poll(&format!("forced drain of node {node}"), |_| async move {
                Ok(self.evictable(node).await?.is_empty())
            })
            .await
            .map_err(|e| match e {
                Error::Timeout { attempts, .. } => Error::DrainFailed {
                    node: node.to_string(),
                    reason: format!("pods survived deletion after {attempts} checks"),
                },
                other => other,
            })?;
        info!(node, "node drained by deletion");
        Ok(())
    }

    /// Pods on `node` that must leave before it is removed.
    async fn evictable(&self, node: &str) -> Result<Vec<Pod>> {
        let pods = self.ctx.orchestrator.list_pods(node, None, false).await?;
        let mut evictable = Vec::new();
        for pod in pods {
            if pod.owners.is_empty() {
                return Err(Error::Inconsistent(format!(
                    "pod {} on node {node} has no owning controller and cannot be rescheduled",
                    pod.key()
                )));
            }
            if pod
                .owners
                .iter()
                .any(|o| NODE_LOCAL_OWNERS.contains(&o.kind.as_str()))
            {
                continue;
            }
            evictable.push(pod);
        }
        Ok(evictable)
    }
}

fn keys(pods: &[Pod]) -> String {
    pods.iter().map(Pod::key).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use nodecycle_core::CycleConfig;
    use nodecycle_core::fake::{Call, FakeCloud, TEST_CLUSTER, group, member, node_for, pod};
    use nodecycle_core::types::PodOwner;

    use super::*;

    fn config() -> CycleConfig {
        let mut config = CycleConfig {
            cluster_name: TEST_CLUSTER.to_string(),
            ..CycleConfig::default()
        };
        config.drain.max_attempts = 3;
        config.drain.eviction_pause = Duration::ZERO;
        config
    }

    fn cloud() -> FakeCloud {
        FakeCloud::new(vec![group("ng-1", 1, 2, vec![member("i-1")])])
    }

    fn owned_by(kind: &str, name: &str) -> Pod {
        Pod {
            owners: vec![PodOwner {
                kind: kind.to_string(),
                name: format!("{name}-owner"),
                controller: true,
            }],
            ..pod("kube-system", name)
        }
    }

    #[tokio::test]
    async fn evicts_workloads_and_keeps_daemon_pods() {
        let cloud = cloud();
        let n = node_for("i-1");
        cloud.add_pod(&n, pod("default", "web"));
        cloud.add_pod(&n, owned_by("DaemonSet", "fluentd"));
        cloud.add_pod(&n, owned_by("Node", "kube-proxy"));
        let config = config();
        let drainer = NodeDrainer::new(Context::new(&cloud, &cloud, &config));

        drainer.drain(&n).await.unwrap();
        let left: Vec<_> = cloud.pods_on(&n).into_iter().map(|p| p.name).collect();
        assert_eq!(left, vec!["fluentd", "kube-proxy"]);
        assert!(cloud.calls().contains(&Call::Evict("default/web".into())));
    }

    #[tokio::test]
    async fn ownerless_pod_is_fatal() {
        let cloud = cloud();
        let n = node_for("i-1");
        cloud.add_pod(
            &n,
            Pod {
                owners: vec![],
                ..pod("default", "bare")
            },
        );
        let config = config();
        let drainer = NodeDrainer::new(Context::new(&cloud, &cloud, &config));

        let err = drainer.drain(&n).await.unwrap_err();
        assert!(matches!(err, Error::Inconsistent(_)));
        assert!(cloud.calls().is_empty());
    }

    #[tokio::test]
    async fn throttled_evictions_are_retried() {
        let cloud = cloud();
        let n = node_for("i-1");
        cloud.add_pod(&n, pod("default", "web"));
        cloud.with_state(|s| s.throttle_evictions = 2);
        let config = config();
        let drainer = NodeDrainer::new(Context::new(&cloud, &cloud, &config));

        drainer.drain(&n).await.unwrap();
        assert!(cloud.pods_on(&n).is_empty());
    }

    #[tokio::test]
    async fn stuck_pod_fails_without_force() {
        let cloud = cloud();
        let n = node_for("i-1");
        cloud.add_pod(&n, pod("default", "web"));
        cloud.with_state(|s| s.stuck_pods.insert("default/web".into()));
        let config = config();
        let drainer = NodeDrainer::new(Context::new(&cloud, &cloud, &config));

        let err = drainer.drain(&n).await.unwrap_err();
        assert!(matches!(err, Error::DrainFailed { ref node, .. } if *node == n));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn stuck_pod_is_deleted_with_force() {
        let cloud = cloud();
        let n = node_for("i-1");
        cloud.add_pod(&n, pod("default", "web"));
        cloud.with_state(|s| s.stuck_pods.insert("default/web".into()));
        let mut config = config();
        config.drain.force_on_failure = true;
        let drainer = NodeDrainer::new(Context::new(&cloud, &cloud, &config));

        drainer.drain(&n).await.unwrap();
        assert!(cloud.pods_on(&n).is_empty());
        assert!(cloud.calls().contains(&Call::DeletePod("default/web".into())));
    }

    #[tokio::test]
    async fn taint_mode_taints_instead_of_cordoning() {
        let cloud = cloud();
        let mut config = config();
        config.drain.mode = CordonMode::Taint;
        let drainer = NodeDrainer::new(Context::new(&cloud, &cloud, &config));

        drainer.make_unschedulable(&node_for("i-1")).await.unwrap();
        assert_eq!(cloud.calls(), vec![Call::Taint(node_for("i-1"))]);
    }

    #[tokio::test(start_paused = true)]
    async fn default_budget_outlasts_pod_grace_period() {
        let cloud = cloud();
        let n = node_for("i-1");
        cloud.add_pod(&n, pod("default", "web"));
        // Terminating for many rounds after the eviction is accepted.
        cloud.with_state(|s| s.linger_after_eviction.insert("default/web".into(), 30));
        let config = CycleConfig {
            cluster_name: TEST_CLUSTER.to_string(),
            ..CycleConfig::default()
        };
        let drainer = NodeDrainer::new(Context::new(&cloud, &cloud, &config));

        let started = tokio::time::Instant::now();
        drainer.drain(&n).await.unwrap();
        let waited = started.elapsed();

        assert!(cloud.pods_on(&n).is_empty());
        assert!(waited > Duration::from_secs(30), "drained after {waited:?}");
        let budget = config.drain.eviction_pause * config.drain.max_attempts;
        assert!(waited <= budget);
        assert!(!cloud.calls().contains(&Call::DeletePod("default/web".into())));
    }
}
