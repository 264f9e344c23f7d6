//! Read-only status export for dashboards and RPC.

use serde::{Deserialize, Serialize};

use fleetgrid_plan::{HealthInfo, ServiceInfo, SlotInfo, VersionId};

use crate::worker::SlotAllocStatus;

/// Point-in-time view of one worker node. Producing it has no side
/// effects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerNodeSnapshot {
    pub node_id: String,
    pub cur_version: VersionId,
    pub next_version: VersionId,
    pub final_version: VersionId,
    pub offline: bool,
    pub releasing: bool,
    /// The allocator is preempting this node's slot.
    pub reclaiming: bool,
    /// Classified unrecoverable in its current incarnation.
    pub broken: bool,
    pub slot_alloc_status: SlotAllocStatus,
    pub slot: Option<SlotInfo>,
    pub health_info: HealthInfo,
    pub service_info: ServiceInfo,
    /// Health matches the current version with alive + ready.
    pub ready_for_cur_version: bool,
}
