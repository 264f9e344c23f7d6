//! fleetgrid-health — health checking for FleetGrid worker nodes.
//!
//! Turns noisy per-node liveness signals into a stable classification
//! that the reconciliation state machine can trust.
//!
//! # Architecture
//!
//! ```text
//! HealthCheckerManager
//!   ├── registry: id → Arc<dyn HealthChecker> (+ last-requested stamp)
//!   ├── periodic driver task
//!   │   ├── reclaim checkers nobody requested recently
//!   │   └── fan check() out under a bounded semaphore, join all
//!   └── factory keyed on checker type name
//!
//! HealthChecker strategies
//!   ├── SlotSignalChecker — no probe; classifies from slot signals
//!   ├── RawProbeChecker   — HTTP probe, opaque JSON payload
//!   └── MetaProbeChecker  — HTTP probe, key-value metadata payload
//!         └── Prober (injected transport; HttpProber in production)
//!
//! HealthStatusTransfer — per-node hysteresis (lost count K, timeout T)
//! ```
//!
//! A probe that times out, fails to connect, or returns garbage is a
//! `touched=false` cycle, absorbed by the hysteresis before anything
//! escalates to `Dead`. One node's failure never affects its siblings
//! within the same pass.

pub mod checker;
pub mod error;
pub mod local;
pub mod manager;
pub mod prober;
pub mod remote;
pub mod transfer;

pub use checker::{CheckTarget, CheckerConfig, HealthChecker, SlotSignals};
pub use error::{CheckerError, CheckerResult};
pub use local::SlotSignalChecker;
pub use manager::HealthCheckerManager;
pub use prober::{HttpProber, Prober};
pub use remote::{MetaProbeChecker, RawProbeChecker};
pub use transfer::{CheckResult, HealthStatusTransfer};
