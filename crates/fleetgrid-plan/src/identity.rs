//! Cluster identity — explicit context instead of process-wide state.
//!
//! Probe payloads carry an identifier that tells a worker which cluster
//! and application are asking. The identifier is a pure function of the
//! context plus the node id, so checkers constructed with the same
//! context always agree.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::NodeId;

/// Identifies the cluster and application a controller acts for.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterContext {
    /// Address of the cluster's coordination endpoint.
    pub cluster_address: String,
    /// Application this controller manages.
    pub application_id: String,
}

/// Derive the probe identifier for one worker node.
pub fn node_identifier(ctx: &ClusterContext, node_id: &NodeId) -> String {
    let mut hasher = Sha256::new();
    hasher.update(ctx.cluster_address.as_bytes());
    hasher.update(b"/");
    hasher.update(ctx.application_id.as_bytes());
    let digest = hex::encode(&hasher.finalize()[..4]);
    format!("{}:{}:{}", ctx.application_id, digest, node_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ClusterContext {
        ClusterContext {
            cluster_address: "fleet.example.com:2181".to_string(),
            application_id: "search-app".to_string(),
        }
    }

    #[test]
    fn identifier_is_deterministic() {
        let id = "role.replica-0".to_string();
        assert_eq!(node_identifier(&ctx(), &id), node_identifier(&ctx(), &id));
    }

    #[test]
    fn identifier_separates_clusters() {
        let id = "role.replica-0".to_string();
        let other = ClusterContext {
            cluster_address: "other.example.com:2181".to_string(),
            ..ctx()
        };
        assert_ne!(node_identifier(&ctx(), &id), node_identifier(&other, &id));
    }

    #[test]
    fn identifier_embeds_node_id() {
        let id = "role.replica-7".to_string();
        assert!(node_identifier(&ctx(), &id).ends_with("role.replica-7"));
    }
}
