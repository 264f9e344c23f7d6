//! Probe-based strategies — remote health checks over an injected
//! transport.
//!
//! Both strategies share the same pipeline: snapshot the target set,
//! fan probes out under a bounded semaphore with a hard deadline, feed
//! `touched` into the hysteresis, and publish a fresh result map
//! wholesale. They differ only in the wire shape of the payload: an
//! opaque JSON document (`RawProbeChecker`) or a flat key-value
//! metadata map (`MetaProbeChecker`).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, warn};

use fleetgrid_plan::{
    node_identifier, now_ms, ClusterContext, HealthInfo, NodeId, WorkerStatus,
};

use crate::checker::{CheckTarget, CheckerConfig, HealthChecker};
use crate::error::{CheckerError, CheckerResult};
use crate::prober::Prober;
use crate::transfer::{CheckResult, HealthStatusTransfer};

pub const RAW_CHECKER_TYPE: &str = "raw_probe";
pub const META_CHECKER_TYPE: &str = "meta_probe";

const DEFAULT_CHECK_PATH: &str = "/healthz";
const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_MAX_INFLIGHT: usize = 64;

/// Metadata exchanged with a worker on every probe.
///
/// The worker echoes the signature of the plan it currently serves;
/// equality with the target signature means ready.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ProbePayload {
    pub signature: String,
    pub custom_info: String,
    pub global_custom_info: String,
    pub identifier: String,
    pub scheduler_info: String,
    pub preload: bool,
}

/// Wire shape of the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PayloadCodec {
    /// Opaque JSON document.
    Json,
    /// Flat string→string metadata map.
    Metas,
}

impl PayloadCodec {
    fn encode(self, payload: &ProbePayload) -> Vec<u8> {
        match self {
            PayloadCodec::Json => serde_json::to_vec(payload).unwrap_or_default(),
            PayloadCodec::Metas => {
                let metas: HashMap<&str, String> = HashMap::from([
                    ("signature", payload.signature.clone()),
                    ("customInfo", payload.custom_info.clone()),
                    ("globalCustomInfo", payload.global_custom_info.clone()),
                    ("identifier", payload.identifier.clone()),
                    ("schedulerInfo", payload.scheduler_info.clone()),
                    ("preload", payload.preload.to_string()),
                ]);
                serde_json::to_vec(&metas).unwrap_or_default()
            }
        }
    }

    fn decode(self, body: &[u8]) -> Option<ProbePayload> {
        match self {
            PayloadCodec::Json => serde_json::from_slice(body).ok(),
            PayloadCodec::Metas => {
                let metas: HashMap<String, String> = serde_json::from_slice(body).ok()?;
                let take = |key: &str| metas.get(key).cloned().unwrap_or_default();
                Some(ProbePayload {
                    signature: take("signature"),
                    custom_info: take("customInfo"),
                    global_custom_info: take("globalCustomInfo"),
                    identifier: take("identifier"),
                    scheduler_info: take("schedulerInfo"),
                    preload: metas
                        .get("preload")
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(false),
                })
            }
        }
    }
}

struct Inner {
    targets: Vec<CheckTarget>,
    /// Per-node bookkeeping carried across cycles; pruned when a node
    /// leaves the tracked set.
    check_results: HashMap<NodeId, CheckResult>,
    updated: bool,
}

/// Shared pipeline for both probe-based strategies.
struct ProbeCore {
    name: &'static str,
    codec: PayloadCodec,
    prober: Arc<dyn Prober>,
    ctx: ClusterContext,
    port: u16,
    check_path: String,
    probe_timeout: Duration,
    max_inflight: usize,
    global_custom_info: String,
    scheduler_info: String,
    transfer: HealthStatusTransfer,
    /// Guards the snapshot and bookkeeping; held across a pass so two
    /// `check()` calls on the same checker never overlap.
    inner: Mutex<Inner>,
    /// Published results, swapped wholesale each cycle.
    results: RwLock<HashMap<NodeId, HealthInfo>>,
}

impl ProbeCore {
    fn new(name: &'static str, codec: PayloadCodec, prober: Arc<dyn Prober>) -> Self {
        Self {
            name,
            codec,
            prober,
            ctx: ClusterContext::default(),
            port: 0,
            check_path: DEFAULT_CHECK_PATH.to_string(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            max_inflight: DEFAULT_MAX_INFLIGHT,
            global_custom_info: String::new(),
            scheduler_info: String::new(),
            transfer: HealthStatusTransfer::default(),
            inner: Mutex::new(Inner {
                targets: Vec::new(),
                check_results: HashMap::new(),
                updated: false,
            }),
            results: RwLock::new(HashMap::new()),
        }
    }

    fn init(&mut self, config: &CheckerConfig) -> CheckerResult<()> {
        let port = config.arg("port").ok_or(CheckerError::MissingArg("port"))?;
        self.port = port
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid port {port:?}: {e}"))?;
        if let Some(path) = config.arg("check_path") {
            self.check_path = path.to_string();
        }
        if let Some(ms) = config.arg_u64("probe_timeout_ms") {
            self.probe_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = config.arg_u64("max_inflight") {
            self.max_inflight = (n as usize).max(1);
        }
        if let Some(info) = config.arg("global_custom_info") {
            self.global_custom_info = info.to_string();
        }
        if let Some(info) = config.arg("scheduler_info") {
            self.scheduler_info = info.to_string();
        }
        if let Some(address) = config.arg("cluster_address") {
            self.ctx.cluster_address = address.to_string();
        }
        if let Some(app) = config.arg("application_id") {
            self.ctx.application_id = app.to_string();
        }

        let threshold = config
            .arg_u32("lost_count_threshold")
            .unwrap_or(HealthStatusTransfer::DEFAULT_LOST_COUNT_THRESHOLD);
        let timeout = config
            .arg_u64("lost_timeout_ms")
            .map(Duration::from_millis)
            .unwrap_or(HealthStatusTransfer::DEFAULT_LOST_TIMEOUT);
        self.transfer = HealthStatusTransfer::new(threshold, timeout);
        Ok(())
    }

    fn payload_for(&self, target: &CheckTarget) -> ProbePayload {
        ProbePayload {
            signature: target.signature.clone(),
            custom_info: target.custom_info.clone(),
            global_custom_info: self.global_custom_info.clone(),
            identifier: node_identifier(&self.ctx, &target.node_id),
            scheduler_info: self.scheduler_info.clone(),
            preload: target.preload,
        }
    }

    /// Probe every target concurrently; one failed probe never affects
    /// its siblings.
    async fn probe_all(&self, targets: &[CheckTarget]) -> HashMap<NodeId, Option<ProbePayload>> {
        let semaphore = Arc::new(Semaphore::new(self.max_inflight));
        let mut handles = Vec::with_capacity(targets.len());

        for target in targets {
            let prober = Arc::clone(&self.prober);
            let permit_source = Arc::clone(&semaphore);
            let codec = self.codec;
            let address = format!("{}:{}", target.address, self.port);
            let path = self.check_path.clone();
            let payload = codec.encode(&self.payload_for(target));
            let timeout = self.probe_timeout;
            let node_id = target.node_id.clone();

            handles.push(tokio::spawn(async move {
                // Closed only if the semaphore is dropped first, which
                // cannot happen while this task holds a clone.
                let _permit = permit_source.acquire_owned().await;
                let body = prober.probe(&address, &path, &payload, timeout).await;
                let parsed = body.as_deref().and_then(|b| codec.decode(b));
                (node_id, parsed)
            }));
        }

        let mut responses = HashMap::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok((node_id, parsed)) => {
                    responses.insert(node_id, parsed);
                }
                Err(e) => warn!(error = %e, "probe task panicked"),
            }
        }
        responses
    }
}

#[async_trait]
impl HealthChecker for ProbeCore {
    fn name(&self) -> &str {
        self.name
    }

    async fn update(&self, targets: Vec<CheckTarget>) {
        let mut inner = self.inner.lock().await;
        inner
            .check_results
            .retain(|id, _| targets.iter().any(|t| &t.node_id == id));
        inner.targets = targets;
        inner.updated = true;
    }

    async fn check(&self) {
        let mut inner = self.inner.lock().await;
        if !inner.updated {
            return;
        }

        let targets = inner.targets.clone();
        let responses = self.probe_all(&targets).await;
        let now = now_ms();

        let mut fresh = HashMap::with_capacity(targets.len());
        for target in &targets {
            let result = inner
                .check_results
                .entry(target.node_id.clone())
                .or_insert_with(|| CheckResult::new(target.node_id.clone()));

            let response = responses.get(&target.node_id).cloned().flatten();
            let touched = response.is_some();
            self.transfer.transfer(result, touched, now);

            // Readiness is decided only for nodes that responded.
            if let Some(resp) = response {
                if resp.signature == target.signature {
                    result.health_info.version = target.version.clone();
                    result.health_info.worker_status = WorkerStatus::Ready;
                } else {
                    result.health_info.worker_status = WorkerStatus::NotReady;
                }
            }

            debug!(node_id = %target.node_id, touched,
                   status = ?result.health_info.status, "probe check");
            fresh.insert(target.node_id.clone(), result.health_info.clone());
        }

        // Build the new map first, then publish it atomically.
        *self.results.write().unwrap_or_else(|e| e.into_inner()) = fresh;
    }

    fn health_infos(&self) -> HashMap<NodeId, HealthInfo> {
        self.results
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

macro_rules! probe_checker {
    ($name:ident, $type_name:ident, $codec:expr, $doc:literal) => {
        #[doc = $doc]
        pub struct $name(ProbeCore);

        impl $name {
            pub fn new(prober: Arc<dyn Prober>) -> Self {
                Self(ProbeCore::new($type_name, $codec, prober))
            }

            pub fn init(&mut self, config: &CheckerConfig) -> CheckerResult<()> {
                self.0.init(config)
            }
        }

        #[async_trait]
        impl HealthChecker for $name {
            fn name(&self) -> &str {
                self.0.name()
            }

            async fn update(&self, targets: Vec<CheckTarget>) {
                self.0.update(targets).await
            }

            async fn check(&self) {
                self.0.check().await
            }

            fn health_infos(&self) -> HashMap<NodeId, HealthInfo> {
                self.0.health_infos()
            }
        }
    };
}

probe_checker!(
    RawProbeChecker,
    RAW_CHECKER_TYPE,
    PayloadCodec::Json,
    "Probe strategy exchanging the payload as an opaque JSON document."
);

probe_checker!(
    MetaProbeChecker,
    META_CHECKER_TYPE,
    PayloadCodec::Metas,
    "Probe strategy exchanging the payload as a key-value metadata map."
);

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use fleetgrid_plan::HealthState;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted prober: echoes a payload with the configured signature,
    /// or nothing at all.
    struct FakeProber {
        /// Signature to echo back; `None` simulates a dead transport.
        echo_signature: std::sync::Mutex<Option<String>>,
        calls: AtomicUsize,
    }

    impl FakeProber {
        fn answering(signature: &str) -> Self {
            Self {
                echo_signature: std::sync::Mutex::new(Some(signature.to_string())),
                calls: AtomicUsize::new(0),
            }
        }

        fn silent() -> Self {
            Self {
                echo_signature: std::sync::Mutex::new(None),
                calls: AtomicUsize::new(0),
            }
        }

        fn set_signature(&self, signature: Option<&str>) {
            *self.echo_signature.lock().unwrap() = signature.map(str::to_string);
        }
    }

    #[async_trait]
    impl Prober for FakeProber {
        async fn probe(
            &self,
            _address: &str,
            _path: &str,
            payload: &[u8],
            _timeout: Duration,
        ) -> Option<Bytes> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let signature = self.echo_signature.lock().unwrap().clone()?;
            // Answer in the same wire shape the request arrived in.
            if let Ok(mut echoed) = serde_json::from_slice::<ProbePayload>(payload) {
                echoed.signature = signature;
                return Some(Bytes::from(serde_json::to_vec(&echoed).unwrap()));
            }
            let mut echoed = PayloadCodec::Metas.decode(payload)?;
            echoed.signature = signature;
            Some(Bytes::from(PayloadCodec::Metas.encode(&echoed)))
        }
    }

    fn target(node_id: &str, signature: &str) -> CheckTarget {
        CheckTarget {
            node_id: node_id.to_string(),
            address: "10.0.0.1".to_string(),
            version: "v2".to_string(),
            signature: signature.to_string(),
            custom_info: "shard=1".to_string(),
            preload: false,
            slot: None,
        }
    }

    fn config() -> CheckerConfig {
        CheckerConfig {
            checker_type: RAW_CHECKER_TYPE.to_string(),
            args: HashMap::from([
                ("port".to_string(), "7008".to_string()),
                ("lost_count_threshold".to_string(), "2".to_string()),
                ("lost_timeout_ms".to_string(), "60000".to_string()),
            ]),
        }
    }

    fn raw_checker(prober: Arc<FakeProber>) -> RawProbeChecker {
        let mut checker = RawProbeChecker::new(prober);
        checker.init(&config()).unwrap();
        checker
    }

    #[tokio::test]
    async fn init_requires_port() {
        let mut checker = RawProbeChecker::new(Arc::new(FakeProber::silent()));
        let err = checker.init(&CheckerConfig::default()).unwrap_err();
        assert!(matches!(err, CheckerError::MissingArg("port")));
    }

    #[tokio::test]
    async fn init_rejects_malformed_port() {
        let mut checker = RawProbeChecker::new(Arc::new(FakeProber::silent()));
        let config = CheckerConfig {
            checker_type: RAW_CHECKER_TYPE.to_string(),
            args: HashMap::from([("port".to_string(), "not-a-port".to_string())]),
        };
        let err = checker.init(&config).unwrap_err();
        assert!(matches!(err, CheckerError::Init(_)));
    }

    #[tokio::test]
    async fn check_is_noop_before_update() {
        let prober = Arc::new(FakeProber::answering("sig"));
        let checker = raw_checker(Arc::clone(&prober));
        checker.check().await;
        assert_eq!(prober.calls.load(Ordering::SeqCst), 0);
        assert!(checker.health_infos().is_empty());
    }

    #[tokio::test]
    async fn matching_signature_is_alive_and_ready() {
        let prober = Arc::new(FakeProber::answering("sig-a"));
        let checker = raw_checker(Arc::clone(&prober));

        checker.update(vec![target("n0", "sig-a")]).await;
        checker.check().await;

        let infos = checker.health_infos();
        assert_eq!(infos["n0"].status, HealthState::Alive);
        assert_eq!(infos["n0"].worker_status, WorkerStatus::Ready);
        assert_eq!(infos["n0"].version, "v2");
    }

    #[tokio::test]
    async fn mismatched_signature_is_alive_but_not_ready() {
        let prober = Arc::new(FakeProber::answering("old-sig"));
        let checker = raw_checker(prober);

        checker.update(vec![target("n0", "new-sig")]).await;
        checker.check().await;

        let infos = checker.health_infos();
        assert_eq!(infos["n0"].status, HealthState::Alive);
        assert_eq!(infos["n0"].worker_status, WorkerStatus::NotReady);
    }

    #[tokio::test]
    async fn silent_transport_degrades_through_hysteresis() {
        let prober = Arc::new(FakeProber::silent());
        let checker = raw_checker(prober);

        checker.update(vec![target("n0", "sig")]).await;
        checker.check().await;
        assert_eq!(checker.health_infos()["n0"].status, HealthState::Unknown);

        // Threshold is 2 in the test config.
        checker.check().await;
        assert_eq!(checker.health_infos()["n0"].status, HealthState::Lost);
    }

    #[tokio::test]
    async fn recovery_resets_to_alive() {
        let prober = Arc::new(FakeProber::silent());
        let checker = raw_checker(Arc::clone(&prober));

        checker.update(vec![target("n0", "sig")]).await;
        checker.check().await;
        checker.check().await;
        assert_eq!(checker.health_infos()["n0"].status, HealthState::Lost);

        prober.set_signature(Some("sig"));
        checker.check().await;
        assert_eq!(checker.health_infos()["n0"].status, HealthState::Alive);
    }

    #[tokio::test]
    async fn departed_nodes_lose_their_bookkeeping() {
        let prober = Arc::new(FakeProber::silent());
        let checker = raw_checker(Arc::clone(&prober));

        checker.update(vec![target("n0", "sig")]).await;
        checker.check().await;
        assert_eq!(checker.health_infos()["n0"].status, HealthState::Unknown);

        // n0 leaves, then returns: its lost_count starts over.
        checker.update(vec![target("n1", "sig")]).await;
        checker.update(vec![target("n0", "sig"), target("n1", "sig")]).await;
        checker.check().await;
        // Threshold 2 — a fresh n0 with one miss is still Unknown.
        assert_eq!(checker.health_infos()["n0"].status, HealthState::Unknown);
    }

    #[tokio::test]
    async fn one_nodes_failure_never_affects_siblings() {
        // The fake answers every address; simulate one bad node by
        // giving it an unmatchable signature instead.
        let prober = Arc::new(FakeProber::answering("sig-good"));
        let checker = raw_checker(prober);

        checker
            .update(vec![target("good", "sig-good"), target("bad", "sig-other")])
            .await;
        checker.check().await;

        let infos = checker.health_infos();
        assert_eq!(infos["good"].worker_status, WorkerStatus::Ready);
        assert_eq!(infos["bad"].worker_status, WorkerStatus::NotReady);
        assert_eq!(infos["bad"].status, HealthState::Alive);
    }

    #[tokio::test]
    async fn meta_checker_round_trips_kv_payload() {
        let prober = Arc::new(FakeProber::answering("sig-a"));
        let mut checker = MetaProbeChecker::new(prober);
        checker.init(&config()).unwrap();

        checker.update(vec![target("n0", "sig-a")]).await;
        checker.check().await;

        let infos = checker.health_infos();
        assert_eq!(infos["n0"].status, HealthState::Alive);
        assert_eq!(infos["n0"].worker_status, WorkerStatus::Ready);
        assert_eq!(infos["n0"].version, "v2");
    }

    #[tokio::test]
    async fn meta_checker_counts_misses_when_silent() {
        let prober = Arc::new(FakeProber::silent());
        let mut checker = MetaProbeChecker::new(prober);
        checker.init(&config()).unwrap();

        checker.update(vec![target("n0", "sig-a")]).await;
        checker.check().await;
        assert_eq!(checker.health_infos()["n0"].status, HealthState::Unknown);
    }

    #[test]
    fn metas_codec_round_trip() {
        let payload = ProbePayload {
            signature: "sig".to_string(),
            custom_info: "ci".to_string(),
            global_custom_info: "gci".to_string(),
            identifier: "app:abcd:n0".to_string(),
            scheduler_info: "si".to_string(),
            preload: true,
        };
        let decoded = PayloadCodec::Metas
            .decode(&PayloadCodec::Metas.encode(&payload))
            .unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn garbage_body_fails_to_decode() {
        assert!(PayloadCodec::Json.decode(b"not json").is_none());
        assert!(PayloadCodec::Metas.decode(b"[1,2,3]").is_none());
    }
}
