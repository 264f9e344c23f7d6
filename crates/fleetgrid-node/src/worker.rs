//! WorkerNode — per-replica reconciliation.
//!
//! The node consumes slot, health, and service observations and runs
//! the gate pipeline each tick. Decisions (release, stall, advance) are
//! read back by the surrounding scheduler; the node itself performs no
//! I/O and never blocks.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use fleetgrid_plan::{
    now_ms, HealthInfo, HealthState, NodeId, ServiceInfo, ServiceStatus, SlotInfo, VersionId,
    VersionedPlan, WorkerStatus,
};

use crate::error::{NodeError, NodeResult};
use crate::snapshot::WorkerNodeSnapshot;

/// Slot allocation lifecycle. `Released` is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotAllocStatus {
    Unassigned,
    Assigned,
    Lost,
    Offlining,
    Releasing,
    Released,
}

/// How the slot should be released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ReleasePreference {
    /// Forbid reallocating the freed slot to this role for the lease.
    pub prohibit_realloc: bool,
    /// Lease duration attached to the release request.
    pub lease_ms: u64,
}

impl ReleasePreference {
    /// Lease used when releasing a broken node, long enough to stop
    /// rapid recreate/fail thrash.
    pub const PROHIBIT_LEASE_MS: u64 = 600_000;

    pub fn prohibit() -> Self {
        Self {
            prohibit_realloc: true,
            lease_ms: Self::PROHIBIT_LEASE_MS,
        }
    }
}

impl Default for ReleasePreference {
    fn default() -> Self {
        Self {
            prohibit_realloc: false,
            lease_ms: 60_000,
        }
    }
}

/// Version strings recovered from the external plan-version map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecoveredVersions {
    pub final_version: VersionId,
    pub cur_version: VersionId,
    pub next_version: VersionId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateOutcome {
    Pass,
    Stall,
}

type GateFn = fn(&mut WorkerNode, u64) -> GateOutcome;

/// One physical worker replica under reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerNode {
    node_id: NodeId,
    slot: Option<SlotInfo>,

    /// Applied plan.
    cur_version: VersionId,
    cur_plan: Option<VersionedPlan>,
    /// Desired plan; always reflects the most recent external request.
    next_version: VersionId,
    next_plan: Option<VersionedPlan>,
    /// End-state plan, recorded for global broadcast only.
    final_version: VersionId,
    final_plan: Option<VersionedPlan>,

    slot_alloc_status: SlotAllocStatus,
    /// Pipeline progress marker; reset at the top of every tick.
    assigned_step: u32,
    offline: bool,
    releasing: bool,
    release_pref: ReleasePreference,
    /// Epoch millis since the launch plan stopped matching. 0 = in sync.
    last_not_match_time: u64,
    /// Epoch millis since health stopped being alive+ready. 0 = healthy.
    last_not_ready_time: u64,
    resource_not_match: bool,
    health_info: HealthInfo,
    service_info: ServiceInfo,
    target_has_reached: bool,

    /// Keep a resource-mismatched node alive (flagged broken) instead
    /// of releasing it outright.
    recover_on_resource_mismatch: bool,
}

impl WorkerNode {
    const GATES: [(&'static str, GateFn); 5] = [
        ("graceful_update", Self::gate_graceful_update),
        ("resource_plan", Self::gate_resource_plan),
        ("launch_plan", Self::gate_launch_plan),
        ("health_info", Self::gate_health_info),
        ("service_info", Self::gate_service_info),
    ];

    pub fn new(node_id: impl Into<NodeId>) -> Self {
        Self {
            node_id: node_id.into(),
            slot: None,
            cur_version: VersionId::new(),
            cur_plan: None,
            next_version: VersionId::new(),
            next_plan: None,
            final_version: VersionId::new(),
            final_plan: None,
            slot_alloc_status: SlotAllocStatus::Unassigned,
            assigned_step: 0,
            offline: false,
            releasing: false,
            release_pref: ReleasePreference::default(),
            last_not_match_time: 0,
            last_not_ready_time: 0,
            resource_not_match: false,
            health_info: HealthInfo::default(),
            service_info: ServiceInfo::default(),
            target_has_reached: false,
            recover_on_resource_mismatch: true,
        }
    }

    /// Set whether a resource mismatch keeps the node alive (broken)
    /// or releases it outright.
    pub fn with_recover_on_resource_mismatch(mut self, recover: bool) -> Self {
        self.recover_on_resource_mismatch = recover;
        self
    }

    /// Rehydrate a node from the external plan-version map.
    ///
    /// Every non-empty recovered version must resolve; a missing one is
    /// a hard recovery failure for this node.
    pub fn recover(
        node_id: impl Into<NodeId>,
        versions: &RecoveredVersions,
        plans: &HashMap<VersionId, VersionedPlan>,
    ) -> NodeResult<Self> {
        let node_id = node_id.into();
        let lookup = |version: &VersionId| -> NodeResult<Option<VersionedPlan>> {
            if version.is_empty() {
                return Ok(None);
            }
            plans
                .get(version)
                .cloned()
                .map(Some)
                .ok_or_else(|| NodeError::MissingPlanVersion {
                    node_id: node_id.clone(),
                    version: version.clone(),
                })
        };

        let mut node = Self::new(node_id.clone());
        node.final_plan = lookup(&versions.final_version)?;
        node.final_version = versions.final_version.clone();
        node.cur_plan = lookup(&versions.cur_version)?;
        node.cur_version = versions.cur_version.clone();
        node.next_plan = lookup(&versions.next_version)?;
        node.next_version = versions.next_version.clone();
        info!(%node_id, cur = %node.cur_version, next = %node.next_version,
              "worker node recovered");
        Ok(node)
    }

    // ── Observation inputs ─────────────────────────────────────────

    /// Record the desired plan. The current plan adopts it immediately
    /// when the node has never applied one; otherwise the version
    /// advances only inside the health-info gate.
    pub fn update_plan(&mut self, version: impl Into<VersionId>, plan: VersionedPlan) {
        let version = version.into();
        debug!(node_id = %self.node_id, %version, "plan updated");
        self.next_version = version.clone();
        self.next_plan = Some(plan);
        if self.cur_plan.is_none() {
            self.cur_version = version;
            self.cur_plan = self.next_plan.clone();
        }
    }

    /// Record the end-state plan used for global broadcast.
    pub fn set_final_plan(&mut self, version: impl Into<VersionId>, plan: VersionedPlan) {
        self.final_version = version.into();
        self.final_plan = Some(plan);
    }

    /// Attach a slot observation.
    pub fn assign_slot(&mut self, slot: SlotInfo) {
        debug!(node_id = %self.node_id, host = %slot.slot_id.host, slot = slot.slot_id.id,
               "slot assigned");
        self.slot = Some(slot);
    }

    /// Replace the slot observation; `None` means "no slot".
    pub fn update_slot_info(&mut self, slot: Option<SlotInfo>) {
        self.slot = slot;
    }

    pub fn update_service_info(&mut self, info: ServiceInfo) {
        self.service_info = info;
    }

    pub fn update_health_info(&mut self, info: HealthInfo) {
        if info.status != self.health_info.status {
            info!(node_id = %self.node_id, from = ?self.health_info.status,
                  to = ?info.status, "health status changed");
        }
        self.health_info = info;
    }

    // ── Release ────────────────────────────────────────────────────

    /// Begin draining. A currently broken node escalates to the long
    /// prohibit-reallocation lease so a replacement cannot land on the
    /// same bad slot immediately.
    pub fn release(&mut self) {
        let pref = if self.is_broken() {
            ReleasePreference::prohibit()
        } else {
            ReleasePreference::default()
        };
        self.release_with_pref(pref);
    }

    /// Begin draining with an explicit release preference.
    pub fn release_with_pref(&mut self, pref: ReleasePreference) {
        if self.slot_alloc_status == SlotAllocStatus::Released {
            return;
        }
        if !self.releasing {
            info!(node_id = %self.node_id, prohibit = pref.prohibit_realloc,
                  lease_ms = pref.lease_ms, "release requested");
        }
        self.releasing = true;
        self.release_pref = pref;
    }

    // ── Scheduling ─────────────────────────────────────────────────

    /// Run one reconciliation tick against the wall clock.
    pub fn schedule(&mut self) {
        self.schedule_at(now_ms());
    }

    /// Run one reconciliation tick at an explicit instant.
    ///
    /// Idempotent: a second call with no intervening observation change
    /// leaves the node exactly as the first did.
    pub fn schedule_at(&mut self, now: u64) {
        self.assigned_step = 0;
        self.target_has_reached = false;

        // Resolve slot-status transitions to a fixed point so a state
        // whose successor condition already holds advances through it
        // within the same tick.
        while let Some(next) = self.next_slot_status() {
            info!(node_id = %self.node_id, from = ?self.slot_alloc_status, to = ?next,
                  "slot status transition");
            self.slot_alloc_status = next;
        }

        if self.slot_alloc_status == SlotAllocStatus::Assigned && !self.releasing {
            self.run_pipeline(now);
        }
    }

    fn next_slot_status(&self) -> Option<SlotAllocStatus> {
        use SlotAllocStatus::*;
        match self.slot_alloc_status {
            Unassigned => {
                if self.slot.is_some() {
                    Some(Assigned)
                } else if self.releasing {
                    Some(Released)
                } else {
                    None
                }
            }
            Assigned => {
                if self.slot.is_none() {
                    Some(Lost)
                } else if self.releasing {
                    Some(Offlining)
                } else {
                    None
                }
            }
            Lost => {
                if self.slot.is_some() {
                    Some(Assigned)
                } else if self.releasing {
                    Some(Releasing)
                } else {
                    None
                }
            }
            Offlining => {
                (self.service_info.status == ServiceStatus::Unavailable).then_some(Releasing)
            }
            Releasing => self.slot.is_none().then_some(Released),
            Released => None,
        }
    }

    /// Evaluate gates in order until the first stall. Always restarts
    /// from gate 1; a plan arriving mid-sequence is picked up from the
    /// top on the next tick.
    fn run_pipeline(&mut self, now: u64) {
        if self.next_plan.is_none() {
            return;
        }
        for (name, gate) in Self::GATES {
            match gate(self, now) {
                GateOutcome::Pass => self.assigned_step += 1,
                GateOutcome::Stall => {
                    debug!(node_id = %self.node_id, gate = name,
                           step = self.assigned_step, "pipeline stalled");
                    break;
                }
            }
        }
    }

    /// Gate 1: drain traffic before a graceful version change.
    fn gate_graceful_update(&mut self, _now: u64) -> GateOutcome {
        let Some(next) = &self.next_plan else {
            return GateOutcome::Stall;
        };
        if next.updating_gracefully && self.cur_version != self.next_version {
            self.offline = true;
            return if self.service_info.status == ServiceStatus::Unavailable {
                GateOutcome::Pass
            } else {
                GateOutcome::Stall
            };
        }
        let online = self.cur_plan.as_ref().map(|p| p.online).unwrap_or(next.online);
        self.offline = !online;
        GateOutcome::Pass
    }

    /// Gate 2: wait for the allocator to realize the target resources.
    fn gate_resource_plan(&mut self, _now: u64) -> GateOutcome {
        let Some(next) = &self.next_plan else {
            return GateOutcome::Stall;
        };
        let target = next.resource_plan.clone();
        let restart_after = next.restart_after_resource_change;
        let Some(current) = self.cur_plan.as_ref().map(|p| p.resource_plan.clone()) else {
            return GateOutcome::Stall;
        };

        if current.tag != target.tag {
            // A regenerated tag means the whole requirement was
            // re-authored; this incarnation cannot be migrated.
            warn!(node_id = %self.node_id, old_tag = %current.tag, new_tag = %target.tag,
                  "resource tag regenerated, releasing node");
            self.release_with_pref(ReleasePreference::default());
            return GateOutcome::Stall;
        }

        if current != target {
            let Some(slot) = &self.slot else {
                return GateOutcome::Stall;
            };
            if slot.requirement_id != target.requirement_id() {
                // Allocator has not applied the new request yet.
                return GateOutcome::Stall;
            }
            if slot.resources == target.resources {
                if let Some(cur) = self.cur_plan.as_mut() {
                    cur.resource_plan = target;
                }
                self.resource_not_match = false;
                if restart_after {
                    // The worker restarts after a resource change; let
                    // it re-prove health from a clean slate.
                    self.last_not_ready_time = 0;
                }
                return GateOutcome::Pass;
            }
            if self.recover_on_resource_mismatch {
                self.resource_not_match = true;
                return GateOutcome::Stall;
            }
            warn!(node_id = %self.node_id, "resource plan irreconcilable, releasing node");
            self.release_with_pref(ReleasePreference::prohibit());
            return GateOutcome::Stall;
        }

        self.resource_not_match = false;
        GateOutcome::Pass
    }

    /// Gate 3: wait for the node daemon to realize the launch plan.
    fn gate_launch_plan(&mut self, now: u64) -> GateOutcome {
        let Some(next) = &self.next_plan else {
            return GateOutcome::Stall;
        };
        let target = next.launch_plan.clone();
        if let Some(cur) = self.cur_plan.as_mut() {
            cur.launch_plan = target.clone();
        }

        let realized = self
            .slot
            .as_ref()
            .map(|s| s.launch_signature.as_str())
            .unwrap_or_default();
        if realized == target.signature() {
            self.last_not_match_time = 0;
            GateOutcome::Pass
        } else {
            if self.last_not_match_time == 0 {
                self.last_not_match_time = now;
            }
            GateOutcome::Stall
        }
    }

    /// Gate 4: the version commit point. Waits for health to confirm
    /// the committed version alive and ready.
    fn gate_health_info(&mut self, now: u64) -> GateOutcome {
        if self.cur_version != self.next_version {
            info!(node_id = %self.node_id, from = %self.cur_version,
                  to = %self.next_version, "version committed");
        }
        self.cur_version = self.next_version.clone();
        self.cur_plan = self.next_plan.clone();

        if self.ready_for_cur_version() {
            self.last_not_ready_time = 0;
            GateOutcome::Pass
        } else {
            if self.last_not_ready_time == 0 {
                self.last_not_ready_time = now;
            }
            GateOutcome::Stall
        }
    }

    /// Gate 5: traffic availability must match the plan.
    fn gate_service_info(&mut self, _now: u64) -> GateOutcome {
        let Some(cur) = &self.cur_plan else {
            return GateOutcome::Stall;
        };
        let online = cur.online;
        if cur.updating_gracefully {
            self.offline = !online;
        }
        let expected = if online {
            ServiceStatus::Available
        } else {
            ServiceStatus::Unavailable
        };
        if self.service_info.status == expected {
            self.target_has_reached = true;
            GateOutcome::Pass
        } else {
            GateOutcome::Stall
        }
    }

    // ── Classification ─────────────────────────────────────────────

    /// Broken: unrecoverable in this incarnation, a candidate for
    /// release and replacement.
    pub fn is_broken(&self) -> bool {
        self.is_broken_at(now_ms())
    }

    pub fn is_broken_at(&self, now: u64) -> bool {
        if self.health_info.status == HealthState::Dead {
            return true;
        }
        if self.resource_not_match {
            return true;
        }
        let Some(plan) = self.next_plan.as_ref().or(self.cur_plan.as_ref()) else {
            return false;
        };
        if plan.not_match_timeout_ms > 0
            && self.last_not_match_time > 0
            && now.saturating_sub(self.last_not_match_time) > plan.not_match_timeout_ms as u64
        {
            return true;
        }
        if plan.not_ready_timeout_ms > 0
            && self.last_not_ready_time > 0
            && now.saturating_sub(self.last_not_ready_time) > plan.not_ready_timeout_ms as u64
        {
            return true;
        }
        false
    }

    /// Health confirms the current version, alive and ready.
    pub fn ready_for_cur_version(&self) -> bool {
        !self.cur_version.is_empty()
            && self.health_info.version == self.cur_version
            && self.health_info.status == HealthState::Alive
            && self.health_info.worker_status == WorkerStatus::Ready
    }

    /// The allocator is preempting this node's slot.
    pub fn is_reclaiming(&self) -> bool {
        self.slot.as_ref().map(|s| s.reclaiming).unwrap_or(false)
    }

    /// The node has fully converged on its desired plan.
    pub fn is_completed(&self) -> bool {
        let Some(cur) = &self.cur_plan else {
            return false;
        };
        if self.cur_version.is_empty() || self.cur_version != self.next_version {
            return false;
        }
        if self.releasing || self.is_reclaiming() {
            return false;
        }
        let resource_ok = !self.resource_not_match
            && self
                .next_plan
                .as_ref()
                .map(|n| n.resource_plan == cur.resource_plan)
                .unwrap_or(false);
        let launch_ok = self
            .slot
            .as_ref()
            .map(|s| s.launch_signature == cur.launch_plan.signature())
            .unwrap_or(false);
        let expected = if cur.online {
            ServiceStatus::Available
        } else {
            ServiceStatus::Unavailable
        };
        resource_ok
            && launch_ok
            && self.ready_for_cur_version()
            && self.service_info.status == expected
    }

    // ── Accessors ──────────────────────────────────────────────────

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn slot_alloc_status(&self) -> SlotAllocStatus {
        self.slot_alloc_status
    }

    pub fn cur_version(&self) -> &VersionId {
        &self.cur_version
    }

    pub fn next_version(&self) -> &VersionId {
        &self.next_version
    }

    pub fn is_releasing(&self) -> bool {
        self.releasing
    }

    pub fn is_offline(&self) -> bool {
        self.offline
    }

    pub fn release_preference(&self) -> ReleasePreference {
        self.release_pref
    }

    pub fn target_has_reached(&self) -> bool {
        self.target_has_reached
    }

    /// Read-only snapshot for dashboards/RPC; produces no side effects.
    pub fn status(&self) -> WorkerNodeSnapshot {
        WorkerNodeSnapshot {
            node_id: self.node_id.clone(),
            cur_version: self.cur_version.clone(),
            next_version: self.next_version.clone(),
            final_version: self.final_version.clone(),
            offline: self.offline,
            releasing: self.releasing,
            reclaiming: self.is_reclaiming(),
            broken: self.is_broken(),
            slot_alloc_status: self.slot_alloc_status,
            slot: self.slot.clone(),
            health_info: self.health_info.clone(),
            service_info: self.service_info.clone(),
            ready_for_cur_version: self.ready_for_cur_version(),
        }
    }
}
