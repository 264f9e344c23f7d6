//! Slot-signal strategy — health without probing.
//!
//! Derives a classification purely from the slot-status signals the
//! allocator already reports: host liveness, package install state, and
//! process state. Useful for roles whose workers expose no health
//! endpoint.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use fleetgrid_plan::{
    now_ms, HealthInfo, HealthState, HostStatus, NodeId, PackageStatus, ProcessStatus,
    WorkerStatus,
};

use crate::checker::{CheckTarget, CheckerConfig, HealthChecker};
use crate::error::CheckerResult;

pub const CHECKER_TYPE: &str = "slot_signal";

const DEFAULT_UNREACHABLE_GRACE: Duration = Duration::from_secs(60);

struct Inner {
    targets: Vec<CheckTarget>,
    /// First time each node's host was seen unreachable. Pruned when
    /// the host comes back or the node leaves the snapshot.
    unreachable_since: HashMap<NodeId, u64>,
    updated: bool,
}

/// Health checker that classifies from slot signals alone.
pub struct SlotSignalChecker {
    ignore_process_status: bool,
    /// How long an unreachable host stays `Unknown` before `Lost`.
    unreachable_grace: Duration,
    inner: Mutex<Inner>,
    results: RwLock<HashMap<NodeId, HealthInfo>>,
}

impl SlotSignalChecker {
    pub fn new() -> Self {
        Self {
            ignore_process_status: false,
            unreachable_grace: DEFAULT_UNREACHABLE_GRACE,
            inner: Mutex::new(Inner {
                targets: Vec::new(),
                unreachable_since: HashMap::new(),
                updated: false,
            }),
            results: RwLock::new(HashMap::new()),
        }
    }

    pub fn init(&mut self, config: &CheckerConfig) -> CheckerResult<()> {
        if let Some(v) = config.arg_bool("ignore_process_status") {
            self.ignore_process_status = v;
        }
        if let Some(ms) = config.arg_u64("unreachable_grace_ms") {
            self.unreachable_grace = Duration::from_millis(ms);
        }
        Ok(())
    }

    fn classify(&self, target: &CheckTarget, inner: &mut Inner, now: u64) -> HealthInfo {
        let Some(signals) = target.slot else {
            // Nothing attached yet; nothing to say.
            return HealthInfo::default();
        };

        if signals.host_status == HostStatus::Unreachable {
            let since = *inner
                .unreachable_since
                .entry(target.node_id.clone())
                .or_insert(now);
            let status = if now.saturating_sub(since) > self.unreachable_grace.as_millis() as u64 {
                HealthState::Lost
            } else {
                HealthState::Unknown
            };
            return HealthInfo {
                status,
                version: String::new(),
                worker_status: WorkerStatus::NotReady,
            };
        }
        inner.unreachable_since.remove(&target.node_id);

        let dead = signals.host_status == HostStatus::Dead
            || signals.package_status == PackageStatus::Failed
            || (!self.ignore_process_status
                && matches!(
                    signals.process_status,
                    ProcessStatus::Failed | ProcessStatus::Terminated
                ));
        if dead {
            return HealthInfo {
                status: HealthState::Dead,
                version: String::new(),
                worker_status: WorkerStatus::NotReady,
            };
        }

        let ready =
            self.ignore_process_status || signals.process_status == ProcessStatus::Running;
        HealthInfo {
            status: HealthState::Alive,
            // No probe means no reported version; echo the target's so
            // the health gate's version comparison stays meaningful.
            version: target.version.clone(),
            worker_status: if ready {
                WorkerStatus::Ready
            } else {
                WorkerStatus::NotReady
            },
        }
    }
}

impl Default for SlotSignalChecker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HealthChecker for SlotSignalChecker {
    fn name(&self) -> &str {
        CHECKER_TYPE
    }

    async fn update(&self, targets: Vec<CheckTarget>) {
        let mut inner = self.inner.lock().await;
        inner
            .unreachable_since
            .retain(|id, _| targets.iter().any(|t| &t.node_id == id));
        inner.targets = targets;
        inner.updated = true;
    }

    async fn check(&self) {
        let mut inner = self.inner.lock().await;
        if !inner.updated {
            return;
        }

        let now = now_ms();
        let targets = inner.targets.clone();
        let mut fresh = HashMap::with_capacity(targets.len());
        for target in &targets {
            let info = self.classify(target, &mut inner, now);
            debug!(node_id = %target.node_id, status = ?info.status, "slot-signal check");
            fresh.insert(target.node_id.clone(), info);
        }

        // Swap the published map wholesale; readers never see a
        // partially updated view.
        *self.results.write().unwrap_or_else(|e| e.into_inner()) = fresh;
    }

    fn health_infos(&self) -> HashMap<NodeId, HealthInfo> {
        self.results
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
