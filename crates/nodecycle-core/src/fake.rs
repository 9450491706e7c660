//! In-memory fleet and orchestrator for tests.
//!
//! [`FakeCloud`] implements both [`FleetApi`] and [`OrchestratorApi`] over
//! one shared state so a test can observe the full, ordered sequence of
//! mutations the engine issued. Scaling a group up provisions healthy
//! members (and ready nodes) immediately unless `auto_provision` is off.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::time::Instant;

use crate::api::{FleetApi, OrchestratorApi};
use crate::error::{Error, Result};
use crate::types::*;

/// Cluster name the fixture helpers tag groups with.
pub const TEST_CLUSTER: &str = "test";

/// Launch configuration name fixtures treat as current.
pub const CURRENT_LC: &str = "lc-v2";

/// A mutation recorded by [`FakeCloud`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    SetCapacity { group: String, desired: u32, max: u32 },
    Suspend(String),
    Resume(String),
    PutTag { group: String, key: String, value: String },
    DeleteTag { group: String, key: String },
    Terminate { instance: String, decrement: bool },
    Detach { group: String, instance: String, decrement: bool },
    Cordon(String),
    Taint(String),
    DeleteNode(String),
    Evict(String),
    DeletePod(String),
    ScaleDeployment { name: String, replicas: i32 },
}

/// Everything the fake knows about both control planes.
#[derive(Debug, Default)]
pub struct CloudState {
    pub groups: BTreeMap<String, FleetGroup>,
    pub nodes: Vec<OrchestratorNode>,
    /// node name → pods scheduled on it.
    pub pods: BTreeMap<String, Vec<Pod>>,
    pub lifecycles: HashMap<InstanceId, Lifecycle>,
    /// template name → (latest, default) version numbers.
    pub template_versions: HashMap<String, (u64, u64)>,
    pub calls: Vec<Call>,
    /// When each entry of `calls` was issued.
    pub call_times: Vec<Instant>,
    pub auto_provision: bool,
    /// New members start unhealthy and flip to healthy on the next describe.
    pub slow_health: bool,
    /// Evictions answered with `Throttled` before any is accepted.
    pub throttle_evictions: u32,
    /// Pods that accept eviction but never leave.
    pub stuck_pods: HashSet<String>,
    /// pod → number of pod listings that still show it after eviction.
    pub linger_after_eviction: HashMap<String, u32>,
    /// Instances that never reach a stopped state.
    pub stuck_instances: HashSet<InstanceId>,
    /// node → workload checks left before its labeled pods complete.
    pub workload_checks: HashMap<String, u32>,
    /// Number of workload-labeled pod queries per node.
    pub workload_queries: HashMap<String, u32>,
    /// Number of `describe_group` calls served.
    pub describes: u32,
    next_instance: u32,
    pending_health: HashSet<InstanceId>,
    terminating: HashMap<String, u32>,
}

/// Shared-state fake implementing both control-plane traits.
#[derive(Debug, Clone)]
pub struct FakeCloud {
    state: Arc<Mutex<CloudState>>,
}

impl FakeCloud {
    /// Seed with groups; every member gets a running lifecycle and a ready node.
    pub fn new(groups: Vec<FleetGroup>) -> Self {
        let mut state = CloudState {
            auto_provision: true,
            ..CloudState::default()
        };
        for group in groups {
            for m in &group.members {
                state.lifecycles.insert(m.instance_id.clone(), m.lifecycle);
                state.nodes.push(node(&node_name(&m.instance_id), &m.instance_id));
            }
            state.groups.insert(group.name.clone(), group);
        }
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CloudState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Inspect or tweak the state directly.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut CloudState) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn group(&self, name: &str) -> FleetGroup {
        self.lock().groups[name].clone()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Calls paired with the (tokio) time they were issued.
    pub fn timed_calls(&self) -> Vec<(Instant, Call)> {
        let state = self.lock();
        state
            .call_times
            .iter()
            .copied()
            .zip(state.calls.iter().cloned())
            .collect()
    }

    pub fn node(&self, name: &str) -> Option<OrchestratorNode> {
        self.lock().nodes.iter().find(|n| n.name == name).cloned()
    }

    /// Put a pod on a node.
    pub fn add_pod(&self, node: &str, pod: Pod) {
        self.lock().pods.entry(node.to_string()).or_default().push(pod);
    }

    pub fn pods_on(&self, node: &str) -> Vec<Pod> {
        self.lock().pods.get(node).cloned().unwrap_or_default()
    }
}

impl CloudState {
    fn record(&mut self, call: Call) {
        self.calls.push(call);
        self.call_times.push(Instant::now());
    }

    fn remove_pod(&mut self, key: &str) {
        for pods in self.pods.values_mut() {
            pods.retain(|p| p.key() != key);
        }
    }

    /// Advance every terminating pod by one listing.
    fn tick_terminating(&mut self) {
        let mut gone = Vec::new();
        for (key, left) in self.terminating.iter_mut() {
            if *left == 0 {
                gone.push(key.clone());
            } else {
                *left -= 1;
            }
        }
        for key in gone {
            self.terminating.remove(&key);
            self.remove_pod(&key);
        }
    }

    fn group_mut(&mut self, name: &str) -> Result<&mut FleetGroup> {
        self.groups
            .get_mut(name)
            .ok_or_else(|| Error::Fleet(format!("group {name} not found")))
    }

    fn provision(&mut self, group_name: &str) {
        let Some(group) = self.groups.get(group_name) else {
            return;
        };
        let missing = (group.desired_capacity as usize).saturating_sub(group.members.len());
        let launch = match &group.launch {
            Some(LaunchDescriptor::Configuration { name }) => {
                MemberLaunch::Configuration { name: name.clone() }
            }
            Some(
                LaunchDescriptor::Template { name, version }
                | LaunchDescriptor::MixedInstances { name, version },
            ) => {
                let (latest, default) = self.template_versions.get(name).copied().unwrap_or((1, 1));
                let version = match version {
                    VersionSelector::Latest => latest,
                    VersionSelector::Default => default,
                    VersionSelector::Number(n) => *n,
                };
                MemberLaunch::Template {
                    name: name.clone(),
                    version,
                }
            }
            None => MemberLaunch::Unknown,
        };

        for _ in 0..missing {
            self.next_instance += 1;
            let id = format!("i-new{:04}", self.next_instance);
            let mut m = member(&id);
            m.launch = launch.clone();
            if self.slow_health {
                m.health = MemberHealth::Unhealthy;
                self.pending_health.insert(id.clone());
            }
            self.lifecycles.insert(id.clone(), Lifecycle::Running);
            self.nodes.push(node(&node_name(&id), &id));
            if let Some(group) = self.groups.get_mut(group_name) {
                group.members.push(m);
            }
        }
    }

    fn remove_member(&mut self, instance_id: &str) -> Option<String> {
        for group in self.groups.values_mut() {
            if let Some(pos) = group.members.iter().position(|m| m.instance_id == instance_id) {
                group.members.remove(pos);
                return Some(group.name.clone());
            }
        }
        None
    }
}

fn node_name(instance_id: &str) -> String {
    format!("node-{instance_id}")
}

fn selector_matches(selector: &str, labels: &BTreeMap<String, String>) -> bool {
    selector.split(',').filter(|s| !s.is_empty()).all(|term| {
        match term.split_once('=') {
            Some((k, v)) => labels.get(k.trim()).is_some_and(|l| l == v.trim()),
            None => labels.contains_key(term.trim()),
        }
    })
}

#[async_trait]
impl FleetApi for FakeCloud {
    async fn list_groups(&self, ownership_tag: &str) -> Result<Vec<FleetGroup>> {
        Ok(self
            .lock()
            .groups
            .values()
            .filter(|g| g.tag(ownership_tag) == Some("owned"))
            .cloned()
            .collect())
    }

    async fn describe_group(&self, name: &str) -> Result<FleetGroup> {
        let mut state = self.lock();
        let snapshot = state
            .groups
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Fleet(format!("group {name} not found")))?;
        state.describes += 1;
        let pending = std::mem::take(&mut state.pending_health);
        for m in state.groups.values_mut().flat_map(|g| g.members.iter_mut()) {
            if pending.contains(&m.instance_id) {
                m.health = MemberHealth::Healthy;
            }
        }
        Ok(snapshot)
    }

    async fn set_capacity(&self, name: &str, desired: u32, max: u32) -> Result<()> {
        let mut state = self.lock();
        state.record(Call::SetCapacity {
            group: name.to_string(),
            desired,
            max,
        });
        let group = state.group_mut(name)?;
        group.desired_capacity = desired;
        group.max_size = max;
        let surplus = group.members.len().saturating_sub(desired as usize);
        let retired: Vec<_> = group.members.drain(..surplus).map(|m| m.instance_id).collect();
        for id in retired {
            state.lifecycles.insert(id, Lifecycle::Terminated);
        }
        if state.auto_provision {
            state.provision(name);
        }
        Ok(())
    }

    async fn suspend_processes(&self, name: &str) -> Result<()> {
        self.lock().record(Call::Suspend(name.to_string()));
        Ok(())
    }

    async fn resume_processes(&self, name: &str) -> Result<()> {
        self.lock().record(Call::Resume(name.to_string()));
        Ok(())
    }

    async fn put_tag(&self, name: &str, key: &str, value: &str) -> Result<()> {
        let mut state = self.lock();
        state.record(Call::PutTag {
            group: name.to_string(),
            key: key.to_string(),
            value: value.to_string(),
        });
        state.group_mut(name)?.tags.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete_tag(&self, name: &str, key: &str) -> Result<()> {
        let mut state = self.lock();
        state.record(Call::DeleteTag {
            group: name.to_string(),
            key: key.to_string(),
        });
        state.group_mut(name)?.tags.remove(key);
        Ok(())
    }

    async fn terminate_member(&self, instance_id: &str, decrement: bool) -> Result<()> {
        let mut state = self.lock();
        state.record(Call::Terminate {
            instance: instance_id.to_string(),
            decrement,
        });
        let group = state
            .remove_member(instance_id)
            .ok_or_else(|| Error::Fleet(format!("instance {instance_id} is not in a group")))?;
        if decrement {
            let g = state.group_mut(&group)?;
            g.desired_capacity = g.desired_capacity.saturating_sub(1);
        }
        if !state.stuck_instances.contains(instance_id) {
            state
                .lifecycles
                .insert(instance_id.to_string(), Lifecycle::Terminated);
        }
        Ok(())
    }

    async fn detach_member(&self, group: &str, instance_id: &str, decrement: bool) -> Result<()> {
        let mut state = self.lock();
        state.record(Call::Detach {
            group: group.to_string(),
            instance: instance_id.to_string(),
            decrement,
        });
        if state.stuck_instances.contains(instance_id) {
            return Ok(());
        }
        let g = state.group_mut(group)?;
        g.members.retain(|m| m.instance_id != instance_id);
        if decrement {
            g.desired_capacity = g.desired_capacity.saturating_sub(1);
        }
        Ok(())
    }

    async fn member_lifecycle(&self, instance_id: &str) -> Result<Lifecycle> {
        self.lock()
            .lifecycles
            .get(instance_id)
            .copied()
            .ok_or_else(|| Error::Fleet(format!("instance {instance_id} not found")))
    }

    async fn member_group(&self, instance_id: &str) -> Result<Option<GroupName>> {
        Ok(self
            .lock()
            .groups
            .values()
            .find(|g| g.members.iter().any(|m| m.instance_id == instance_id))
            .map(|g| g.name.clone()))
    }

    async fn resolve_template_version(
        &self,
        template: &str,
        selector: &VersionSelector,
    ) -> Result<u64> {
        let state = self.lock();
        let (latest, default) = state
            .template_versions
            .get(template)
            .copied()
            .ok_or_else(|| Error::Fleet(format!("launch template {template} not found")))?;
        Ok(match selector {
            VersionSelector::Latest => latest,
            VersionSelector::Default => default,
            VersionSelector::Number(n) => *n,
        })
    }
}

#[async_trait]
impl OrchestratorApi for FakeCloud {
    async fn list_nodes(&self) -> Result<Vec<OrchestratorNode>> {
        Ok(self.lock().nodes.clone())
    }

    async fn cordon_node(&self, name: &str) -> Result<()> {
        let mut state = self.lock();
        state.record(Call::Cordon(name.to_string()));
        let node = state
            .nodes
            .iter_mut()
            .find(|n| n.name == name)
            .ok_or_else(|| Error::Orchestrator(format!("node {name} not found")))?;
        node.unschedulable = true;
        Ok(())
    }

    async fn taint_node(&self, name: &str, _taint: &Taint) -> Result<()> {
        let mut state = self.lock();
        state.record(Call::Taint(name.to_string()));
        if !state.nodes.iter().any(|n| n.name == name) {
            return Err(Error::Orchestrator(format!("node {name} not found")));
        }
        Ok(())
    }

    async fn delete_node(&self, name: &str) -> Result<()> {
        let mut state = self.lock();
        state.record(Call::DeleteNode(name.to_string()));
        state.nodes.retain(|n| n.name != name);
        state.pods.remove(name);
        Ok(())
    }

    async fn list_pods(
        &self,
        node: &str,
        label_selector: Option<&str>,
        running_only: bool,
    ) -> Result<Vec<Pod>> {
        let mut guard = self.lock();
        let state = &mut *guard;
        state.tick_terminating();
        if let Some(selector) = label_selector {
            *state.workload_queries.entry(node.to_string()).or_default() += 1;
            if let Some(left) = state.workload_checks.get_mut(node) {
                *left = left.saturating_sub(1);
                if *left == 0 {
                    state.workload_checks.remove(node);
                    if let Some(pods) = state.pods.get_mut(node) {
                        for pod in pods.iter_mut().filter(|p| selector_matches(selector, &p.labels)) {
                            pod.phase = "Succeeded".to_string();
                        }
                    }
                }
            }
        }
        Ok(state
            .pods
            .get(node)
            .map(|pods| {
                pods.iter()
                    .filter(|p| label_selector.is_none_or(|s| selector_matches(s, &p.labels)))
                    .filter(|p| !running_only || p.phase == "Running")
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn evict_pod(&self, namespace: &str, name: &str) -> Result<Eviction> {
        let mut state = self.lock();
        let key = format!("{namespace}/{name}");
        if state.throttle_evictions > 0 {
            state.throttle_evictions -= 1;
            return Ok(Eviction::Throttled);
        }
        state.record(Call::Evict(key.clone()));
        if state.stuck_pods.contains(&key) || state.terminating.contains_key(&key) {
            return Ok(Eviction::Evicted);
        }
        match state.linger_after_eviction.remove(&key) {
            Some(listings) => {
                state.terminating.insert(key, listings);
            }
            None => state.remove_pod(&key),
        }
        Ok(Eviction::Evicted)
    }

    async fn delete_pod(
        &self,
        namespace: &str,
        name: &str,
        _grace_secs: Option<u32>,
    ) -> Result<()> {
        let mut state = self.lock();
        let key = format!("{namespace}/{name}");
        state.record(Call::DeletePod(key.clone()));
        state.terminating.remove(&key);
        state.remove_pod(&key);
        Ok(())
    }

    async fn scale_deployment(&self, _namespace: &str, name: &str, replicas: i32) -> Result<()> {
        self.lock().record(Call::ScaleDeployment {
            name: name.to_string(),
            replicas,
        });
        Ok(())
    }
}

// ── Fixture builders ────────────────────────────────────────────────

/// A group owned by [`TEST_CLUSTER`] launching from [`CURRENT_LC`].
pub fn group(name: &str, desired: u32, max: u32, members: Vec<FleetMember>) -> FleetGroup {
    let mut tags = HashMap::new();
    tags.insert(format!("kubernetes.io/cluster/{TEST_CLUSTER}"), "owned".to_string());
    FleetGroup {
        name: name.to_string(),
        desired_capacity: desired,
        min_size: 0,
        max_size: max,
        launch: Some(LaunchDescriptor::Configuration {
            name: CURRENT_LC.to_string(),
        }),
        members,
        tags,
    }
}

/// A healthy, running member on the current launch configuration.
pub fn member(id: &str) -> FleetMember {
    FleetMember {
        instance_id: id.to_string(),
        launch: MemberLaunch::Configuration {
            name: CURRENT_LC.to_string(),
        },
        health: MemberHealth::Healthy,
        lifecycle: Lifecycle::Running,
        launched_at: None,
    }
}

/// A healthy, running member on a stale launch configuration.
pub fn outdated_member(id: &str) -> FleetMember {
    FleetMember {
        launch: MemberLaunch::Configuration {
            name: "lc-v1".to_string(),
        },
        ..member(id)
    }
}

/// A ready, schedulable node backing `instance_id`.
pub fn node(name: &str, instance_id: &str) -> OrchestratorNode {
    OrchestratorNode {
        name: name.to_string(),
        provider_id: format!("aws:///us-east-1a/{instance_id}"),
        ready: true,
        unschedulable: false,
        labels: BTreeMap::new(),
    }
}

/// A pod controlled by a ReplicaSet.
pub fn pod(namespace: &str, name: &str) -> Pod {
    Pod {
        namespace: namespace.to_string(),
        name: name.to_string(),
        phase: "Running".to_string(),
        owners: vec![PodOwner {
            kind: "ReplicaSet".to_string(),
            name: format!("{name}-rs"),
            controller: true,
        }],
        labels: BTreeMap::new(),
    }
}

/// Name of the node [`FakeCloud`] creates for an instance.
pub fn node_for(instance_id: &str) -> String {
    node_name(instance_id)
}
