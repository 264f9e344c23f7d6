//! Worker-node error types.
//!
//! Reconciliation itself never fails: faults are absorbed into state
//! transitions (stall, release, broken classification). Errors exist
//! only at the recovery boundary.

use thiserror::Error;

/// Result type alias for worker-node operations.
pub type NodeResult<T> = Result<T, NodeError>;

/// Errors that can occur while rehydrating a worker node.
#[derive(Debug, Error)]
pub enum NodeError {
    /// The external plan-version map lacks a version this node needs.
    /// A hard recovery failure for the node; the owner discards and
    /// recreates it.
    #[error("node {node_id}: missing plan version {version}")]
    MissingPlanVersion { node_id: String, version: String },
}
