//! Capability interfaces and the engine registry.
//!
//! The pipeline never special-cases an engine by name. Each database
//! engine contributes an [`Engine`] that builds [`Detectable`] probes
//! (detector side, and controller-side re-verification) and
//! [`Switchable`] failover state machines (execution stage).
//!
//! # Architecture
//!
//! ```text
//! EngineRegistry (closed-world, built once at startup)
//!   └── "engine-type" → Arc<dyn Engine>
//!         ├── from_inventory()     → Vec<Arc<dyn Detectable>>
//!         ├── deserialize_report() → (DetectionReport, Arc<dyn Detectable>)
//!         └── switch_candidates()  → Vec<Box<dyn Switchable>>
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{CoreError, ProbeError, SwitchError};
use crate::types::{DetectionReport, InstanceId, InstanceMeta, InstanceRole, Status};

/// A database instance that can be probed for liveness.
#[async_trait]
pub trait Detectable: Send + Sync + fmt::Debug {
    /// Inventory record this probe targets.
    fn meta(&self) -> &InstanceMeta;

    fn id(&self) -> InstanceId {
        self.meta().id()
    }

    fn engine_type(&self) -> &str {
        &self.meta().engine_type
    }

    fn app(&self) -> &str {
        &self.meta().app
    }

    fn cluster(&self) -> &str {
        &self.meta().cluster
    }

    /// Probe the instance. May block on network I/O up to an
    /// engine-defined timeout.
    async fn probe(&self) -> Result<Status, ProbeError>;

    /// Whether a probe result with this status should be shipped at all.
    fn report_eligible(&self, _status: Status) -> bool {
        true
    }

    /// Encode a report body for the wire protocol.
    fn serialize(&self, status: Status, timestamp: u64) -> Result<Vec<u8>, CoreError> {
        DetectionReport::new(self.meta(), status, timestamp)
            .to_bytes()
            .map_err(|e| CoreError::Serialize(e.to_string()))
    }
}

/// Data handed forward between failover steps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwitchInfo {
    /// Replica nominated to take over, set by `check_switch`/`do_switch`.
    pub chosen_replica: Option<InstanceId>,
    /// Confirmation note from re-verification.
    pub double_check_note: Option<String>,
}

/// A database instance whose failover can be driven by the execution stage.
///
/// Steps run strictly in order: `check_switch`, then `do_switch` and
/// `update_meta` if the check asked to proceed. `rollback` is invoked on
/// any step error.
#[async_trait]
pub trait Switchable: Send + Sync + fmt::Debug {
    fn meta(&self) -> &InstanceMeta;

    fn id(&self) -> InstanceId {
        self.meta().id()
    }

    fn role(&self) -> InstanceRole {
        self.meta().role
    }

    fn cluster(&self) -> &str {
        &self.meta().cluster
    }

    fn info(&self) -> &SwitchInfo;

    fn info_mut(&mut self) -> &mut SwitchInfo;

    /// Decide whether a switch is needed. `Ok(false)` ends the sequence
    /// successfully without switching.
    async fn check_switch(&mut self) -> Result<bool, SwitchError>;

    async fn do_switch(&mut self) -> Result<(), SwitchError>;

    async fn rollback(&mut self) -> Result<(), SwitchError>;

    async fn update_meta(&mut self) -> Result<(), SwitchError>;
}

/// Per-engine factory for probes and switch state machines.
pub trait Engine: Send + Sync {
    /// Registry key, also the `engine-type` line of the wire protocol.
    fn engine_type(&self) -> &str;

    /// Build a probe for one inventory record.
    fn detectable(&self, meta: InstanceMeta) -> Arc<dyn Detectable>;

    /// Build a failover state machine for one inventory record.
    fn switchable(&self, meta: InstanceMeta) -> Box<dyn Switchable>;

    /// Turn inventory rows into probes, skipping rows of other engines.
    fn from_inventory(&self, rows: Vec<InstanceMeta>) -> Vec<Arc<dyn Detectable>> {
        rows.into_iter()
            .filter(|row| row.engine_type == self.engine_type())
            .map(|row| self.detectable(row))
            .collect()
    }

    /// Decode a report body and rebuild a probe for controller-side
    /// re-verification.
    fn deserialize_report(
        &self,
        body: &[u8],
    ) -> Result<(DetectionReport, Arc<dyn Detectable>), CoreError> {
        let report = DetectionReport::from_bytes(body)
            .map_err(|e| CoreError::MalformedReport(e.to_string()))?;
        if report.engine_type != self.engine_type() {
            return Err(CoreError::MalformedReport(format!(
                "body engine {:?} does not match frame engine {:?}",
                report.engine_type,
                self.engine_type()
            )));
        }
        let detectable = self.detectable(report.to_meta());
        Ok((report, detectable))
    }

    /// Build switch candidates from the inventory rows of a failed host.
    fn switch_candidates(&self, rows: Vec<InstanceMeta>) -> Vec<Box<dyn Switchable>> {
        rows.into_iter()
            .filter(|row| row.engine_type == self.engine_type())
            .map(|row| self.switchable(row))
            .collect()
    }
}

/// Read-mostly lookup table from engine type to engine.
///
/// Built once at startup and injected into each stage, so tests can
/// register fakes without process-wide side effects.
#[derive(Clone, Default)]
pub struct EngineRegistry {
    engines: BTreeMap<String, Arc<dyn Engine>>,
}

impl fmt::Debug for EngineRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineRegistry")
            .field("engines", &self.engines.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an engine. Each engine type may be registered once.
    pub fn register(&mut self, engine: Arc<dyn Engine>) -> Result<(), CoreError> {
        let key = engine.engine_type().to_string();
        if self.engines.contains_key(&key) {
            return Err(CoreError::DuplicateEngine(key));
        }
        self.engines.insert(key, engine);
        Ok(())
    }

    /// Builder-style registration for tests and bootstrap code.
    pub fn with(mut self, engine: Arc<dyn Engine>) -> Result<Self, CoreError> {
        self.register(engine)?;
        Ok(self)
    }

    pub fn get(&self, engine_type: &str) -> Result<&Arc<dyn Engine>, CoreError> {
        self.engines
            .get(engine_type)
            .ok_or_else(|| CoreError::UnknownEngine(engine_type.to_string()))
    }

    pub fn contains(&self, engine_type: &str) -> bool {
        self.engines.contains_key(engine_type)
    }

    /// Registered engine types in sorted order.
    pub fn engine_types(&self) -> Vec<String> {
        self.engines.keys().cloned().collect()
    }

    /// Decode a framed report through the engine named by the frame.
    pub fn decode_report(
        &self,
        engine_type: &str,
        body: &[u8],
    ) -> Result<(DetectionReport, Arc<dyn Detectable>), CoreError> {
        self.get(engine_type)?.deserialize_report(body)
    }

    /// Resolve switch candidates for every row whose engine is registered.
    ///
    /// Rows of unregistered engines are returned separately so the caller
    /// can log them.
    pub fn switch_candidates(
        &self,
        rows: Vec<InstanceMeta>,
    ) -> (Vec<Box<dyn Switchable>>, Vec<InstanceMeta>) {
        let mut candidates = Vec::new();
        let mut unknown = Vec::new();
        for row in rows {
            match self.engines.get(&row.engine_type) {
                Some(engine) => candidates.push(engine.switchable(row)),
                None => unknown.push(row),
            }
        }
        (candidates, unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InventoryStatus;

    #[derive(Debug)]
    struct FixedProbe {
        meta: InstanceMeta,
    }

    #[async_trait]
    impl Detectable for FixedProbe {
        fn meta(&self) -> &InstanceMeta {
            &self.meta
        }

        async fn probe(&self) -> Result<Status, ProbeError> {
            Ok(Status::DbCheckOk)
        }
    }

    #[derive(Debug)]
    struct NoopSwitch {
        meta: InstanceMeta,
        info: SwitchInfo,
    }

    #[async_trait]
    impl Switchable for NoopSwitch {
        fn meta(&self) -> &InstanceMeta {
            &self.meta
        }
        fn info(&self) -> &SwitchInfo {
            &self.info
        }
        fn info_mut(&mut self) -> &mut SwitchInfo {
            &mut self.info
        }
        async fn check_switch(&mut self) -> Result<bool, SwitchError> {
            Ok(false)
        }
        async fn do_switch(&mut self) -> Result<(), SwitchError> {
            Ok(())
        }
        async fn rollback(&mut self) -> Result<(), SwitchError> {
            Ok(())
        }
        async fn update_meta(&mut self) -> Result<(), SwitchError> {
            Ok(())
        }
    }

    struct FakeEngine(&'static str);

    impl Engine for FakeEngine {
        fn engine_type(&self) -> &str {
            self.0
        }
        fn detectable(&self, meta: InstanceMeta) -> Arc<dyn Detectable> {
            Arc::new(FixedProbe { meta })
        }
        fn switchable(&self, meta: InstanceMeta) -> Box<dyn Switchable> {
            Box::new(NoopSwitch {
                meta,
                info: SwitchInfo::default(),
            })
        }
    }

    fn row(engine: &str, port: u16) -> InstanceMeta {
        InstanceMeta {
            ip: "10.0.0.1".to_string(),
            port,
            engine_type: engine.to_string(),
            app: "app".to_string(),
            cluster: "c1".to_string(),
            cluster_type: "ha".to_string(),
            idc: "idc-1".to_string(),
            role: InstanceRole::Master,
            status: InventoryStatus::Running,
            domain: None,
        }
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = EngineRegistry::new().with(Arc::new(FakeEngine("fake"))).unwrap();
        assert!(matches!(
            registry.with(Arc::new(FakeEngine("fake"))),
            Err(CoreError::DuplicateEngine(_))
        ));
    }

    #[test]
    fn decode_report_round_trips_through_engine() {
        let registry = EngineRegistry::new().with(Arc::new(FakeEngine("fake"))).unwrap();
        let body = DetectionReport::new(&row("fake", 3306), Status::SshCheckFailed, 7)
            .to_bytes()
            .unwrap();

        let (report, probe) = registry.decode_report("fake", &body).unwrap();
        assert_eq!(report.status, Status::SshCheckFailed);
        assert_eq!(probe.id(), InstanceId::new("10.0.0.1", 3306));
    }

    #[test]
    fn decode_report_rejects_unknown_engine() {
        let registry = EngineRegistry::new();
        assert!(matches!(
            registry.decode_report("riak", b"{}"),
            Err(CoreError::UnknownEngine(_))
        ));
    }

    #[test]
    fn decode_report_rejects_mismatched_body() {
        let registry = EngineRegistry::new()
            .with(Arc::new(FakeEngine("fake")))
            .unwrap()
            .with(Arc::new(FakeEngine("other")))
            .unwrap();
        let body = DetectionReport::new(&row("other", 1), Status::DbCheckOk, 7)
            .to_bytes()
            .unwrap();
        assert!(matches!(
            registry.decode_report("fake", &body),
            Err(CoreError::MalformedReport(_))
        ));
    }

    #[test]
    fn switch_candidates_split_unknown_rows() {
        let registry = EngineRegistry::new().with(Arc::new(FakeEngine("fake"))).unwrap();
        let (candidates, unknown) =
            registry.switch_candidates(vec![row("fake", 1), row("mongo", 2), row("fake", 3)]);
        assert_eq!(candidates.len(), 2);
        assert_eq!(unknown.len(), 1);
        assert_eq!(unknown[0].engine_type, "mongo");
    }

    #[test]
    fn from_inventory_filters_other_engines() {
        let engine = FakeEngine("fake");
        let probes = engine.from_inventory(vec![row("fake", 1), row("redis", 2)]);
        assert_eq!(probes.len(), 1);
        assert_eq!(probes[0].engine_type(), "fake");
    }
}
