//! Health checker registry and periodic driver.
//!
//! Callers request checkers by id; the manager constructs them via a
//! type-name-keyed factory and reuses live instances. A background task
//! reclaims checkers nobody has requested recently, then fans `check()`
//! out across the survivors under a bounded semaphore, joining all
//! before the next tick so passes never overlap.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use fleetgrid_plan::now_ms;

use crate::checker::{CheckerConfig, HealthChecker};
use crate::error::CheckerResult;
use crate::local::{self, SlotSignalChecker};
use crate::prober::Prober;
use crate::remote::{self, MetaProbeChecker, RawProbeChecker};

const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_MAX_CONCURRENT_CHECKS: usize = 8;
/// Reclaim window: three driver intervals by default.
const DEFAULT_RECLAIM_MULTIPLE: u32 = 3;

/// Construct a checker from its configured type name.
///
/// Empty and unknown names fall back to the default slot-signal
/// strategy; only an `init` failure is an error.
fn build_checker(
    config: &CheckerConfig,
    prober: &Arc<dyn Prober>,
) -> CheckerResult<Arc<dyn HealthChecker>> {
    match config.checker_type.as_str() {
        remote::RAW_CHECKER_TYPE => {
            let mut checker = RawProbeChecker::new(Arc::clone(prober));
            checker.init(config)?;
            Ok(Arc::new(checker))
        }
        remote::META_CHECKER_TYPE => {
            let mut checker = MetaProbeChecker::new(Arc::clone(prober));
            checker.init(config)?;
            Ok(Arc::new(checker))
        }
        other => {
            if !other.is_empty() && other != local::CHECKER_TYPE {
                warn!(checker_type = %other, "unknown checker type, using default");
            }
            let mut checker = SlotSignalChecker::new();
            checker.init(config)?;
            Ok(Arc::new(checker))
        }
    }
}

struct Entry {
    checker: Arc<dyn HealthChecker>,
    /// Epoch millis of the last `get_health_checker` hit. The driver's
    /// sweep drops entries whose stamp has gone stale — the explicit
    /// replacement for reference-count reclamation.
    last_requested: u64,
}

struct DriverSlot {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

/// Registry of named health checkers with a periodic check driver.
pub struct HealthCheckerManager {
    registry: Arc<Mutex<HashMap<String, Entry>>>,
    prober: Arc<dyn Prober>,
    check_interval: Duration,
    reclaim_after: Duration,
    max_concurrent_checks: usize,
    driver: Mutex<Option<DriverSlot>>,
}

impl HealthCheckerManager {
    pub fn new(prober: Arc<dyn Prober>) -> Self {
        Self {
            registry: Arc::new(Mutex::new(HashMap::new())),
            prober,
            check_interval: DEFAULT_CHECK_INTERVAL,
            reclaim_after: DEFAULT_CHECK_INTERVAL * DEFAULT_RECLAIM_MULTIPLE,
            max_concurrent_checks: DEFAULT_MAX_CONCURRENT_CHECKS,
            driver: Mutex::new(None),
        }
    }

    /// Set the interval between driver ticks.
    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self.reclaim_after = interval * DEFAULT_RECLAIM_MULTIPLE;
        self
    }

    /// Set how long an unrequested checker survives before reclamation.
    pub fn with_reclaim_after(mut self, window: Duration) -> Self {
        self.reclaim_after = window;
        self
    }

    /// Bound the number of concurrent `check()` invocations per tick.
    pub fn with_max_concurrent_checks(mut self, max: usize) -> Self {
        self.max_concurrent_checks = max.max(1);
        self
    }

    /// Return the checker registered under `id`, constructing it on
    /// first request.
    ///
    /// Returns `None` when construction or `init` fails; callers decide
    /// their own retry/report policy.
    pub fn get_health_checker(
        &self,
        id: &str,
        config: &CheckerConfig,
    ) -> Option<Arc<dyn HealthChecker>> {
        let mut registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = registry.get_mut(id) {
            entry.last_requested = now_ms();
            return Some(Arc::clone(&entry.checker));
        }

        match build_checker(config, &self.prober) {
            Ok(checker) => {
                info!(%id, checker_type = %checker.name(), "health checker created");
                registry.insert(
                    id.to_string(),
                    Entry {
                        checker: Arc::clone(&checker),
                        last_requested: now_ms(),
                    },
                );
                Some(checker)
            }
            Err(e) => {
                warn!(%id, error = %e, "health checker construction failed");
                None
            }
        }
    }

    /// Ids of currently registered checkers.
    pub fn registered_ids(&self) -> Vec<String> {
        let registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        registry.keys().cloned().collect()
    }

    /// Start the periodic driver task.
    pub fn start(&self) {
        let mut driver = self.driver.lock().unwrap_or_else(|e| e.into_inner());
        if driver.is_some() {
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let registry = Arc::clone(&self.registry);
        let interval = self.check_interval;
        let reclaim_after = self.reclaim_after;
        let max_concurrent = self.max_concurrent_checks;

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        let live = Self::sweep_stale(&registry, now_ms(), reclaim_after);
                        Self::run_checks(live, max_concurrent).await;
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("health checker driver shutting down");
                        break;
                    }
                }
            }
        });

        *driver = Some(DriverSlot {
            handle,
            shutdown_tx,
        });
        info!(interval_ms = interval.as_millis() as u64, "health checker driver started");
    }

    /// Stop the periodic driver task.
    pub fn stop(&self) {
        let mut driver = self.driver.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = driver.take() {
            let _ = slot.shutdown_tx.send(true);
            slot.handle.abort();
            info!("health checker driver stopped");
        }
    }

    /// Drop entries nobody requested within the reclaim window, and
    /// return the survivors for this tick's check pass.
    fn sweep_stale(
        registry: &Arc<Mutex<HashMap<String, Entry>>>,
        now: u64,
        reclaim_after: Duration,
    ) -> Vec<Arc<dyn HealthChecker>> {
        let mut registry = registry.lock().unwrap_or_else(|e| e.into_inner());
        registry.retain(|id, entry| {
            let stale = now.saturating_sub(entry.last_requested) > reclaim_after.as_millis() as u64;
            if stale {
                info!(%id, "reclaiming unused health checker");
            }
            !stale
        });
        registry
            .values()
            .map(|entry| Arc::clone(&entry.checker))
            .collect()
    }

    /// Fan `check()` out across live checkers, bounded, joining all.
    async fn run_checks(checkers: Vec<Arc<dyn HealthChecker>>, max_concurrent: usize) {
        let semaphore = Arc::new(Semaphore::new(max_concurrent));
        let mut handles = Vec::with_capacity(checkers.len());

        for checker in checkers {
            let permit_source = Arc::clone(&semaphore);
            handles.push(tokio::spawn(async move {
                let _permit = permit_source.acquire_owned().await;
                checker.check().await;
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "check task panicked");
            }
        }
    }
}

impl Drop for HealthCheckerManager {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prober::HttpProber;

    fn manager() -> HealthCheckerManager {
        HealthCheckerManager::new(Arc::new(HttpProber))
    }

    fn probe_config() -> CheckerConfig {
        CheckerConfig {
            checker_type: remote::RAW_CHECKER_TYPE.to_string(),
            args: HashMap::from([("port".to_string(), "7008".to_string())]),
        }
    }

    #[tokio::test]
    async fn same_id_returns_same_instance() {
        let manager = manager();
        let a = manager
            .get_health_checker("role-a", &probe_config())
            .unwrap();
        let b = manager
            .get_health_checker("role-a", &probe_config())
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(manager.registered_ids(), vec!["role-a".to_string()]);
    }

    #[tokio::test]
    async fn empty_type_falls_back_to_default() {
        let manager = manager();
        let checker = manager
            .get_health_checker("role-a", &CheckerConfig::default())
            .unwrap();
        assert_eq!(checker.name(), local::CHECKER_TYPE);
    }

    #[tokio::test]
    async fn unknown_type_falls_back_to_default() {
        let manager = manager();
        let config = CheckerConfig {
            checker_type: "no_such_strategy".to_string(),
            args: HashMap::new(),
        };
        let checker = manager.get_health_checker("role-a", &config).unwrap();
        assert_eq!(checker.name(), local::CHECKER_TYPE);
    }

    #[tokio::test]
    async fn init_failure_surfaces_as_none() {
        let manager = manager();
        // raw_probe without a port cannot init.
        let config = CheckerConfig {
            checker_type: remote::RAW_CHECKER_TYPE.to_string(),
            args: HashMap::new(),
        };
        assert!(manager.get_health_checker("role-a", &config).is_none());
        assert!(manager.registered_ids().is_empty());
    }

    #[tokio::test]
    async fn sweep_reclaims_stale_entries_only() {
        let manager = manager().with_reclaim_after(Duration::from_millis(50));
        manager.get_health_checker("stale", &probe_config());
        manager.get_health_checker("fresh", &probe_config());

        let now = now_ms() + 100;
        // Re-request "fresh" at the later instant.
        {
            let mut registry = manager.registry.lock().unwrap();
            registry.get_mut("fresh").unwrap().last_requested = now;
        }

        let live =
            HealthCheckerManager::sweep_stale(&manager.registry, now, Duration::from_millis(50));
        assert_eq!(live.len(), 1);
        assert_eq!(manager.registered_ids(), vec!["fresh".to_string()]);
    }

    #[tokio::test]
    async fn requesting_again_revives_the_stamp() {
        let manager = manager().with_reclaim_after(Duration::from_millis(10_000));
        manager.get_health_checker("role-a", &probe_config());

        let live = HealthCheckerManager::sweep_stale(
            &manager.registry,
            now_ms(),
            Duration::from_millis(10_000),
        );
        assert_eq!(live.len(), 1);
    }

    #[tokio::test]
    async fn driver_starts_and_stops() {
        let manager = manager().with_check_interval(Duration::from_millis(5));
        manager.start();
        // Second start is a no-op.
        manager.start();
        tokio::time::sleep(Duration::from_millis(20)).await;
        manager.stop();
        manager.stop();
    }

    #[tokio::test]
    async fn driver_reclaims_unrequested_checkers() {
        let manager = manager()
            .with_check_interval(Duration::from_millis(5))
            .with_reclaim_after(Duration::from_millis(10));
        manager.get_health_checker("role-a", &CheckerConfig::default());
        manager.start();

        tokio::time::sleep(Duration::from_millis(60)).await;
        manager.stop();
        assert!(manager.registered_ids().is_empty());
    }
}
