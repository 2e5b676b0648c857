//! dbha-pipeline — the controller's governance pipeline.
//!
//! Reports flow through four stages, each a task reading one bounded
//! queue and writing the next:
//!
//! - **dedup** ([`dedup`]): drops repeats of an identity's last status.
//! - **re-verification** ([`verify`]): re-probes from the controller.
//! - **admission** ([`admission`]): per-instance, per-IDC and global
//!   switch-rate limits.
//! - **execution** ([`execute`]): tickets and the switch state machine.

pub mod admission;
pub mod controller;
pub mod dedup;
pub mod error;
pub mod execute;
pub mod messages;
pub mod verify;

pub use admission::{AdmissionStage, Decision, Hold, IdcCooldown};
pub use controller::{Pipeline, PipelineServices, StageExit, gm_registration, known_engines};
pub use dedup::{DedupCache, Verdict, run_dedup};
pub use error::PipelineError;
pub use execute::{ExecuteServices, ExecuteStage, run_failover};
pub use messages::{Admitted, Confirmed, SettleSender, Suspect, TicketAck};
pub use verify::{Judgement, VerifyStage, judge, judge_outcome};
