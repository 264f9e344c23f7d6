//! The health checker capability trait and its inputs.
//!
//! A checker snapshots a target node set (`update`), probes it
//! (`check`), and publishes a per-node health-result map
//! (`health_infos`). Strategies differ only in how a single node is
//! probed; the surrounding contract is identical.

use std::collections::HashMap;

use async_trait::async_trait;

use fleetgrid_plan::{
    HealthInfo, HostStatus, NodeId, PackageStatus, ProcessStatus, VersionId,
};

/// Slot-status signals forwarded to checkers that classify without
/// probing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotSignals {
    pub host_status: HostStatus,
    pub package_status: PackageStatus,
    pub process_status: ProcessStatus,
}

/// One tracked node: identity plus the plan/slot summary a probe needs.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckTarget {
    pub node_id: NodeId,
    /// Worker address (ip) to probe.
    pub address: String,
    /// Plan version the node is being driven toward.
    pub version: VersionId,
    /// Target plan signature; a worker echoing it back is ready.
    pub signature: String,
    /// Opaque per-plan payload forwarded in the probe request.
    pub custom_info: String,
    pub preload: bool,
    /// Present when a slot is currently attached.
    pub slot: Option<SlotSignals>,
}

/// Configuration handed to the manager when requesting a checker.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckerConfig {
    /// Strategy type name; empty or unknown falls back to the default
    /// slot-signal strategy.
    pub checker_type: String,
    /// Strategy-specific arguments, parsed by `init`.
    pub args: HashMap<String, String>,
}

impl CheckerConfig {
    pub fn arg(&self, key: &str) -> Option<&str> {
        self.args.get(key).map(String::as_str)
    }

    pub fn arg_u64(&self, key: &str) -> Option<u64> {
        self.arg(key).and_then(|v| v.parse().ok())
    }

    pub fn arg_u32(&self, key: &str) -> Option<u32> {
        self.arg(key).and_then(|v| v.parse().ok())
    }

    pub fn arg_bool(&self, key: &str) -> Option<bool> {
        self.arg(key).and_then(|v| v.parse().ok())
    }
}

/// A named health checking strategy.
///
/// `update` replaces the tracked snapshot wholesale; nodes absent from
/// the new snapshot are dropped, results and all. `check` performs one
/// probing pass over the current snapshot and is a no-op until the
/// first `update`. `health_infos` returns a copy of the latest
/// published results, never a partially updated map.
#[async_trait]
pub trait HealthChecker: Send + Sync {
    /// Strategy type name this instance was built as.
    fn name(&self) -> &str;

    async fn update(&self, targets: Vec<CheckTarget>);

    async fn check(&self);

    fn health_infos(&self) -> HashMap<NodeId, HealthInfo>;
}
