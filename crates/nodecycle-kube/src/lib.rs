//! Kubernetes implementation of [`nodecycle_core::OrchestratorApi`].

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Node, Pod as KubePod};
use kube::api::{Api, DeleteParams, EvictParams, ListParams, Patch, PatchParams};
use kube::Client;
use serde_json::json;
use tracing::{debug, info};

use nodecycle_core::types::{Eviction, OrchestratorNode, Pod, PodOwner, Taint};
use nodecycle_core::{Error, OrchestratorApi, Result};

/// Orchestrator client over the Kubernetes API.
#[derive(Clone)]
pub struct KubeOrchestrator {
    client: Client,
}

impl KubeOrchestrator {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect with the ambient kubeconfig or in-cluster service account.
    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default().await.map_err(kube_error)?;
        Ok(Self::new(client))
    }

    fn nodes(&self) -> Api<Node> {
        Api::all(self.client.clone())
    }

    fn pods(&self, namespace: &str) -> Api<KubePod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn kube_error(e: kube::Error) -> Error {
    Error::Orchestrator(e.to_string())
}

fn is_status(e: &kube::Error, code: u16) -> bool {
    matches!(e, kube::Error::Api(ae) if ae.code == code)
}

/// Field selector for pods bound to `node`.
fn pod_field_selector(node: &str, running_only: bool) -> String {
    if running_only {
        format!("spec.nodeName={node},status.phase=Running")
    } else {
        format!("spec.nodeName={node}")
    }
}

fn to_node(node: Node) -> OrchestratorNode {
    let ready = node
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conds| conds.iter().any(|c| c.type_ == "Ready" && c.status == "True"))
        .unwrap_or(false);
    let spec = node.spec.unwrap_or_default();
    OrchestratorNode {
        name: node.metadata.name.unwrap_or_default(),
        provider_id: spec.provider_id.unwrap_or_default(),
        ready,
        unschedulable: spec.unschedulable.unwrap_or(false),
        labels: node.metadata.labels.unwrap_or_default(),
    }
}

fn to_pod(pod: KubePod) -> Pod {
    Pod {
        namespace: pod.metadata.namespace.unwrap_or_default(),
        name: pod.metadata.name.unwrap_or_default(),
        phase: pod
            .status
            .and_then(|s| s.phase)
            .unwrap_or_else(|| "Unknown".to_string()),
        owners: pod
            .metadata
            .owner_references
            .unwrap_or_default()
            .into_iter()
            .map(|o| PodOwner {
                kind: o.kind,
                name: o.name,
                controller: o.controller.unwrap_or(false),
            })
            .collect(),
        labels: pod.metadata.labels.unwrap_or_default(),
    }
}

#[async_trait]
impl OrchestratorApi for KubeOrchestrator {
    async fn list_nodes(&self) -> Result<Vec<OrchestratorNode>> {
        let nodes = self
            .nodes()
            .list(&ListParams::default())
            .await
            .map_err(kube_error)?;
        debug!(count = nodes.items.len(), "listed cluster nodes");
        Ok(nodes.items.into_iter().map(to_node).collect())
    }

    async fn cordon_node(&self, name: &str) -> Result<()> {
        let patch = json!({ "spec": { "unschedulable": true } });
        self.nodes()
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(kube_error)?;
        Ok(())
    }

    async fn taint_node(&self, name: &str, taint: &Taint) -> Result<()> {
        let api = self.nodes();
        let node = api.get(name).await.map_err(kube_error)?;
        let mut taints = node.spec.and_then(|s| s.taints).unwrap_or_default();
        if taints.iter().any(|t| t.key == taint.key && t.effect == taint.effect) {
            debug!(node = name, key = %taint.key, "taint already present");
            return Ok(());
        }
        taints.push(k8s_openapi::api::core::v1::Taint {
            key: taint.key.clone(),
            effect: taint.effect.clone(),
            ..Default::default()
        });
        // Merge patches replace lists, so the full set is sent.
        let patch = json!({ "spec": { "taints": taints } });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(kube_error)?;
        Ok(())
    }

    async fn delete_node(&self, name: &str) -> Result<()> {
        match self.nodes().delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_status(&e, 404) => {
                info!(node = name, "node already gone");
                Ok(())
            }
            Err(e) => Err(kube_error(e)),
        }
    }

    async fn list_pods(
        &self,
        node: &str,
        label_selector: Option<&str>,
        running_only: bool,
    ) -> Result<Vec<Pod>> {
        let mut params = ListParams::default().fields(&pod_field_selector(node, running_only));
        if let Some(selector) = label_selector {
            params = params.labels(selector);
        }
        let api: Api<KubePod> = Api::all(self.client.clone());
        let pods = api.list(&params).await.map_err(kube_error)?;
        Ok(pods.items.into_iter().map(to_pod).collect())
    }

    async fn evict_pod(&self, namespace: &str, name: &str) -> Result<Eviction> {
        match self.pods(namespace).evict(name, &EvictParams::default()).await {
            Ok(_) => Ok(Eviction::Evicted),
            Err(e) if is_status(&e, 429) => Ok(Eviction::Throttled),
            Err(e) if is_status(&e, 404) => Ok(Eviction::Evicted),
            Err(e) => Err(kube_error(e)),
        }
    }

    async fn delete_pod(
        &self,
        namespace: &str,
        name: &str,
        grace_secs: Option<u32>,
    ) -> Result<()> {
        let params = DeleteParams {
            grace_period_seconds: grace_secs,
            ..DeleteParams::default()
        };
        match self.pods(namespace).delete(name, &params).await {
            Ok(_) => Ok(()),
            Err(e) if is_status(&e, 404) => Ok(()),
            Err(e) => Err(kube_error(e)),
        }
    }

    async fn scale_deployment(&self, namespace: &str, name: &str, replicas: i32) -> Result<()> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let patch = json!({ "spec": { "replicas": replicas } });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(kube_error)?;
        info!(namespace, deployment = name, replicas, "scaled deployment");
        Ok(())
    }
}
