//! Plan and observation value types.
//!
//! A `VersionedPlan` is the desired configuration for one logical role,
//! tagged with a version string. Slot, service, and health observations
//! are the inputs the reconciliation state machine consumes each tick.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};

/// Unique identifier for a worker node replica.
pub type NodeId = String;

/// Plan version string. Empty means "no version".
pub type VersionId = String;

// ── Plans ─────────────────────────────────────────────────────────

/// Desired physical resources for one worker slot.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourcePlan {
    /// Resource tag; changes only when the plan is regenerated wholesale.
    pub tag: String,
    /// Resource name → amount (cpu millicores, memory bytes, ...).
    pub resources: BTreeMap<String, i64>,
}

impl ResourcePlan {
    /// Stable requirement id for this plan.
    ///
    /// The allocator stamps the same id on a slot once it has applied
    /// the corresponding resource request, which is how the node tells
    /// "allocator hasn't caught up" apart from "resources diverged".
    pub fn requirement_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.tag.as_bytes());
        for (name, amount) in &self.resources {
            hasher.update(name.as_bytes());
            hasher.update(amount.to_le_bytes());
        }
        hex::encode(&hasher.finalize()[..8])
    }
}

/// Desired launch configuration for a worker process.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LaunchPlan {
    /// Package URIs to install before launch.
    pub package_uris: Vec<String>,
    /// Executable to run.
    pub command: String,
    /// Command-line arguments.
    pub args: Vec<String>,
    /// Environment variables.
    pub env: BTreeMap<String, String>,
}

impl LaunchPlan {
    /// Checksum-like signature of the launch configuration.
    ///
    /// The node daemon reports the signature of the launch plan it last
    /// realized; equality means the slot runs this exact plan.
    pub fn signature(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(&Sha256::digest(&bytes)[..8])
    }
}

/// Immutable desired-configuration snapshot for one plan version.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VersionedPlan {
    pub resource_plan: ResourcePlan,
    pub launch_plan: LaunchPlan,
    /// Checksum-like signature probed workers echo back when ready.
    pub signature: String,
    /// Operator-supplied version label (opaque).
    pub user_def_version: String,
    /// Opaque payload forwarded to workers in probe requests.
    pub custom_info: String,
    /// Whether this role should serve traffic.
    pub online: bool,
    /// How long a launch-plan mismatch may persist before the node is
    /// classified broken. `<= 0` disables the check.
    pub not_match_timeout_ms: i64,
    /// How long a not-ready health state may persist before the node is
    /// classified broken. `<= 0` disables the check.
    pub not_ready_timeout_ms: i64,
    /// Drain traffic before applying a version change.
    pub updating_gracefully: bool,
    /// Restart the worker process after a resource-plan change.
    pub restart_after_resource_change: bool,
    /// Ask workers to preload the new version's data before switching.
    pub preload: bool,
}

impl VersionedPlan {
    /// Derive the plan signature from its content.
    pub fn compute_signature(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.resource_plan.requirement_id().as_bytes());
        hasher.update(self.launch_plan.signature().as_bytes());
        hasher.update(self.user_def_version.as_bytes());
        hasher.update(self.custom_info.as_bytes());
        hex::encode(&hasher.finalize()[..8])
    }

    /// Fill in `signature` from content, returning self.
    pub fn with_signature(mut self) -> Self {
        self.signature = self.compute_signature();
        self
    }
}

// ── Slot observation ──────────────────────────────────────────────

/// Identity of a physical slot: a (host, id) pair.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SlotId {
    /// Host address (ip).
    pub host: String,
    /// Slot index on the host.
    pub id: u32,
}

/// Liveness of the host a slot lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostStatus {
    Alive,
    Unreachable,
    Dead,
}

/// Package install state on a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageStatus {
    Installing,
    Installed,
    Failed,
    Unknown,
}

/// Worker process state on a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    NotStarted,
    Running,
    Failed,
    Terminated,
    Unknown,
}

/// One slot observation, pushed by the resource allocator.
///
/// An absent observation (`Option::None`) means "no slot".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlotInfo {
    pub slot_id: SlotId,
    /// Requirement id of the resource request the allocator last applied.
    pub requirement_id: String,
    /// Physical resources actually granted.
    pub resources: BTreeMap<String, i64>,
    /// Signature of the launch plan the node daemon last realized.
    pub launch_signature: String,
    pub host_status: HostStatus,
    pub package_status: PackageStatus,
    pub process_status: ProcessStatus,
    /// The allocator wants this slot back (preemption).
    pub reclaiming: bool,
}

// ── Service observation ───────────────────────────────────────────

/// Traffic availability as reported by service discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Available,
    #[default]
    Unavailable,
}

/// One service observation for a worker node.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServiceInfo {
    pub status: ServiceStatus,
    /// Registration metadata (topo info, weights, ...).
    pub metas: HashMap<String, String>,
}

// ── Health observation ────────────────────────────────────────────

/// Stable health classification produced by a health checker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Alive,
    #[default]
    Unknown,
    Lost,
    Dead,
}

/// Whether the worker reports itself ready for its current version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Ready,
    #[default]
    NotReady,
}

/// One health observation for a worker node.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HealthInfo {
    pub status: HealthState,
    /// Plan version the worker reported serving (empty if unknown).
    pub version: VersionId,
    pub worker_status: WorkerStatus,
}
