//! fleetgrid-node — the worker-node reconciliation state machine.
//!
//! A `WorkerNode` tracks one physical replica through slot assignment,
//! version rollout, health observation, and graceful draining. Each
//! orchestration tick the owner pushes fresh observations (slot,
//! service, health) and calls `schedule()`, which resolves slot-status
//! transitions and runs the gate pipeline:
//!
//! ```text
//! schedule()
//!   ├── slot status: Unassigned → Assigned → (Lost ⇄) → Offlining
//!   │                → Releasing → Released (absorbing)
//!   └── while Assigned, gates in order until the first stall:
//!       1. graceful-update  (drain before a version change)
//!       2. resource-plan    (allocator caught up? resources match?)
//!       3. launch-plan      (realized launch signature matches?)
//!       4. health-info      (version commit point; alive + ready?)
//!       5. service-info     (traffic availability matches plan)
//! ```
//!
//! `schedule()` is a pure, idempotent, non-blocking mutation of local
//! state — no I/O, no locking. The surrounding scheduler reads the
//! node's decisions back (release preference, broken classification,
//! completion) and drives physical slot and service changes itself.

pub mod error;
pub mod snapshot;
pub mod worker;

pub use error::{NodeError, NodeResult};
pub use snapshot::WorkerNodeSnapshot;
pub use worker::{RecoveredVersions, ReleasePreference, SlotAllocStatus, WorkerNode};
