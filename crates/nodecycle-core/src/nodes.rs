//! Mapping between fleet members and the cluster nodes they back.

use crate::error::{Error, Result};
use crate::types::{FleetMember, OrchestratorNode};

/// Nodes carrying none of the excluded label keys.
///
/// Nodes managed by an external lifecycle controller are labeled and must
/// neither be counted nor touched.
pub fn managed_nodes(nodes: Vec<OrchestratorNode>, exclude_label_keys: &[String]) -> Vec<OrchestratorNode> {
    nodes
        .into_iter()
        .filter(|n| !exclude_label_keys.iter().any(|k| n.labels.contains_key(k)))
        .collect()
}

/// The node backing `member`. The first match on provider id wins.
pub fn node_for_member<'a>(
    nodes: &'a [OrchestratorNode],
    member: &FleetMember,
) -> Result<&'a OrchestratorNode> {
    nodes
        .iter()
        .find(|n| n.backs(&member.instance_id))
        .ok_or_else(|| {
            Error::Inconsistent(format!(
                "no cluster node backs instance {}",
                member.instance_id
            ))
        })
}
