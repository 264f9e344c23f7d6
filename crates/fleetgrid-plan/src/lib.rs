//! fleetgrid-plan — value types shared across the FleetGrid control plane.
//!
//! Holds the immutable desired-configuration snapshots (`ResourcePlan`,
//! `LaunchPlan`, `VersionedPlan`) and the observation types pushed into
//! worker nodes each reconciliation round (slot, service, and health
//! observations). All types are serde-serializable for status export
//! and probe payloads.
//!
//! Plans are compared by value for change detection; each carries a
//! checksum-like signature derived from its content.

pub mod identity;
pub mod types;

pub use identity::{node_identifier, ClusterContext};
pub use types::*;

/// Current time as epoch milliseconds.
///
/// Timestamp fields across the workspace use `u64` millis with
/// `0 = unset`.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
