//! Health status hysteresis.
//!
//! A single missed probe must not flip a node to `Dead`. The transfer
//! function absorbs misses as `Unknown`/`Lost` first, parameterized by
//! a lost-count threshold K and a lost-timeout T.

use std::time::Duration;

use tracing::{debug, warn};

use fleetgrid_plan::{HealthInfo, HealthState, NodeId};

/// Per-node probe bookkeeping carried across check cycles.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckResult {
    pub node_id: NodeId,
    pub health_info: HealthInfo,
    /// Epoch millis when the node entered `Lost`. 0 = not lost.
    pub last_lost_time: u64,
    /// Consecutive untouched cycles.
    pub lost_count: u32,
}

impl CheckResult {
    /// Fresh bookkeeping for a newly tracked node.
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            health_info: HealthInfo::default(),
            last_lost_time: 0,
            lost_count: 0,
        }
    }
}

/// Pure hysteresis state machine over `HealthState`.
///
/// `touched` means "this cycle's probe succeeded and was parseable".
/// From `Alive`/`Unknown`, K consecutive untouched cycles reach `Lost`;
/// staying `Lost` longer than T reaches `Dead`. A single touched cycle
/// resurrects from any state.
#[derive(Debug, Clone, Copy)]
pub struct HealthStatusTransfer {
    /// Consecutive untouched cycles before `Lost` (K).
    lost_count_threshold: u32,
    /// Time in `Lost` before `Dead` (T).
    lost_timeout: Duration,
}

impl HealthStatusTransfer {
    pub const DEFAULT_LOST_COUNT_THRESHOLD: u32 = 3;
    pub const DEFAULT_LOST_TIMEOUT: Duration = Duration::from_secs(300);

    pub fn new(lost_count_threshold: u32, lost_timeout: Duration) -> Self {
        Self {
            lost_count_threshold: lost_count_threshold.max(1),
            lost_timeout,
        }
    }

    /// Advance one node's classification by one cycle.
    pub fn transfer(&self, result: &mut CheckResult, touched: bool, now: u64) {
        if touched {
            if result.health_info.status != HealthState::Alive {
                debug!(node_id = %result.node_id, from = ?result.health_info.status,
                       "node resurrected to alive");
            }
            result.lost_count = 0;
            result.last_lost_time = 0;
            result.health_info.status = HealthState::Alive;
            return;
        }

        result.lost_count += 1;
        match result.health_info.status {
            HealthState::Alive | HealthState::Unknown => {
                if result.lost_count >= self.lost_count_threshold {
                    result.health_info.status = HealthState::Lost;
                    result.last_lost_time = now;
                    warn!(node_id = %result.node_id, lost_count = result.lost_count,
                          "node lost");
                }
            }
            HealthState::Lost => {
                if now.saturating_sub(result.last_lost_time) > self.lost_timeout.as_millis() as u64
                {
                    result.health_info.status = HealthState::Dead;
                    warn!(node_id = %result.node_id,
                          lost_for_ms = now.saturating_sub(result.last_lost_time),
                          "node dead");
                }
            }
            // Only a touched cycle resurrects.
            HealthState::Dead => {}
        }
    }
}

impl Default for HealthStatusTransfer {
    fn default() -> Self {
        Self::new(
            Self::DEFAULT_LOST_COUNT_THRESHOLD,
            Self::DEFAULT_LOST_TIMEOUT,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result() -> CheckResult {
        CheckResult::new("role.replica-0".to_string())
    }

    #[test]
    fn new_node_starts_unknown() {
        let r = result();
        assert_eq!(r.health_info.status, HealthState::Unknown);
        assert_eq!(r.lost_count, 0);
        assert_eq!(r.last_lost_time, 0);
    }

    #[test]
    fn touched_moves_to_alive_and_resets_counters() {
        let transfer = HealthStatusTransfer::new(3, Duration::from_secs(15));
        let mut r = result();

        transfer.transfer(&mut r, false, 1_000);
        transfer.transfer(&mut r, true, 2_000);
        assert_eq!(r.health_info.status, HealthState::Alive);
        assert_eq!(r.lost_count, 0);
        assert_eq!(r.last_lost_time, 0);
    }

    #[test]
    fn stays_put_under_lost_threshold() {
        let transfer = HealthStatusTransfer::new(3, Duration::from_secs(15));
        let mut r = result();
        transfer.transfer(&mut r, true, 0);

        transfer.transfer(&mut r, false, 1_000);
        transfer.transfer(&mut r, false, 2_000);
        assert_eq!(r.health_info.status, HealthState::Alive);
        assert_eq!(r.lost_count, 2);
    }

    #[test]
    fn third_miss_reaches_lost_with_timestamp() {
        // Scenario: K=3 — exactly three consecutive misses reach Lost,
        // and last_lost_time records the third cycle's time.
        let transfer = HealthStatusTransfer::new(3, Duration::from_secs(15));
        let mut r = result();
        transfer.transfer(&mut r, true, 0);

        transfer.transfer(&mut r, false, 1_000);
        transfer.transfer(&mut r, false, 2_000);
        transfer.transfer(&mut r, false, 3_000);
        assert_eq!(r.health_info.status, HealthState::Lost);
        assert_eq!(r.last_lost_time, 3_000);

        // A single touch returns it to Alive with counters reset.
        transfer.transfer(&mut r, true, 4_000);
        assert_eq!(r.health_info.status, HealthState::Alive);
        assert_eq!(r.lost_count, 0);
    }

    #[test]
    fn lost_escalates_to_dead_after_timeout() {
        // Scenario: lost_timeout = 15s; +10s still Lost, +16s Dead.
        let transfer = HealthStatusTransfer::new(1, Duration::from_secs(15));
        let mut r = result();

        transfer.transfer(&mut r, false, 1_000);
        assert_eq!(r.health_info.status, HealthState::Lost);
        assert_eq!(r.last_lost_time, 1_000);

        transfer.transfer(&mut r, false, 11_000);
        assert_eq!(r.health_info.status, HealthState::Lost);

        transfer.transfer(&mut r, false, 17_000);
        assert_eq!(r.health_info.status, HealthState::Dead);
    }

    #[test]
    fn dead_is_sticky_without_touch() {
        let transfer = HealthStatusTransfer::new(1, Duration::from_millis(1));
        let mut r = result();
        transfer.transfer(&mut r, false, 0);
        transfer.transfer(&mut r, false, 100);
        assert_eq!(r.health_info.status, HealthState::Dead);

        transfer.transfer(&mut r, false, 1_000_000);
        assert_eq!(r.health_info.status, HealthState::Dead);
    }

    #[test]
    fn dead_resurrects_on_touch() {
        let transfer = HealthStatusTransfer::new(1, Duration::from_millis(1));
        let mut r = result();
        transfer.transfer(&mut r, false, 0);
        transfer.transfer(&mut r, false, 100);
        assert_eq!(r.health_info.status, HealthState::Dead);

        transfer.transfer(&mut r, true, 200);
        assert_eq!(r.health_info.status, HealthState::Alive);
    }

    #[test]
    fn unknown_reaches_lost_without_ever_being_alive() {
        let transfer = HealthStatusTransfer::new(2, Duration::from_secs(15));
        let mut r = result();

        transfer.transfer(&mut r, false, 1_000);
        assert_eq!(r.health_info.status, HealthState::Unknown);
        transfer.transfer(&mut r, false, 2_000);
        assert_eq!(r.health_info.status, HealthState::Lost);
    }

    #[test]
    fn threshold_floor_is_one() {
        let transfer = HealthStatusTransfer::new(0, Duration::from_secs(15));
        let mut r = result();
        transfer.transfer(&mut r, false, 1_000);
        assert_eq!(r.health_info.status, HealthState::Lost);
    }
}
