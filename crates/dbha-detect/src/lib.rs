//! dbha-detect — the detector agent.
//!
//! Detectors run next to the databases, probe the instances of their
//! shard and stream results to the controllers over the wire protocol.
//!
//! - [`shard`]: which instances this detector owns
//! - [`router`]: which controller receives a given instance's reports
//! - [`tracker`]: which probe results are worth shipping
//! - [`agent`]: the heartbeat and per-engine worker loops

pub mod agent;
pub mod error;
pub mod router;
pub mod shard;
pub mod tracker;

pub use agent::{CycleStats, EngineWorker, registrations, run_heartbeat, send_heartbeats};
pub use error::{DetectError, ShardError};
pub use router::GmRouter;
pub use shard::{ShardAssignment, bucket};
pub use tracker::ReportTracker;
