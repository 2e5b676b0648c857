//! dbha-core — shared vocabulary of the DBHA detector and controller.
//!
//! Domain types, the YAML configuration, the `Detectable`/`Switchable`
//! capability interfaces with their engine registry, the traits of the
//! external services, and the timeout-guarded probe helper.

pub mod capability;
pub mod config;
pub mod duration;
pub mod error;
pub mod probe;
pub mod service;
pub mod types;

pub use capability::{Detectable, Engine, EngineRegistry, SwitchInfo, Switchable};
pub use config::{Config, RunMode};
pub use error::{ConfigError, CoreError, ProbeError, ServiceError, ServiceResult, SwitchError};
pub use service::{Alert, Inventory, LogNotifier, NameService, Notifier, StatusStore, SwitchScope};
pub use types::*;
