//! Detector workers against the embedded store and a loopback controller.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dbha_core::config::DetectorConfig;
use dbha_core::{
    Detectable, DetectionReport, Engine, Heartbeat, InstanceId, InstanceMeta, InstanceRole,
    InventoryStatus, Module, ProbeError, Status, StatusStore, Switchable, SwitchError, SwitchInfo,
    epoch_secs,
};
use dbha_detect::{DetectError, EngineWorker, GmRouter, ShardError, registrations, send_heartbeats};
use dbha_protocol::{Inbound, serve};
use dbha_state::StateStore;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};

// ── Fake engine with scripted statuses ─────────────────────────────

type Script = Arc<Mutex<HashMap<InstanceId, Status>>>;

#[derive(Debug)]
struct ScriptedProbe {
    meta: InstanceMeta,
    script: Script,
}

#[async_trait]
impl Detectable for ScriptedProbe {
    fn meta(&self) -> &InstanceMeta {
        &self.meta
    }

    async fn probe(&self) -> Result<Status, ProbeError> {
        self.script
            .lock()
            .get(&self.meta.id())
            .copied()
            .ok_or_else(|| ProbeError::Connect("unscripted".to_string()))
    }
}

#[derive(Debug)]
struct NoSwitch {
    meta: InstanceMeta,
    info: SwitchInfo,
}

#[async_trait]
impl Switchable for NoSwitch {
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

struct ScriptedEngine {
    script: Script,
}

impl Engine for ScriptedEngine {
    fn engine_type(&self) -> &str {
        "tcp"
    }

    fn detectable(&self, meta: InstanceMeta) -> Arc<dyn Detectable> {
        Arc::new(ScriptedProbe {
            meta,
            script: Arc::clone(&self.script),
        })
    }

    fn switchable(&self, meta: InstanceMeta) -> Box<dyn Switchable> {
        Box::new(NoSwitch {
            meta,
            info: SwitchInfo::default(),
        })
    }
}

// ── Fixture ────────────────────────────────────────────────────────

fn detector_config(ip: &str) -> DetectorConfig {
    DetectorConfig {
        ip: ip.to_string(),
        idc: "sz-1".to_string(),
        engine_types: vec!["tcp".to_string()],
        detect_interval: Duration::from_secs(10),
        fetch_interval: Duration::from_secs(60),
        report_interval: Duration::from_secs(3600),
        heartbeat_interval: Duration::from_secs(10),
        probe_timeout: Duration::from_secs(1),
        send_timeout: Duration::from_secs(2),
    }
}

fn instance(ip: &str, port: u16) -> InstanceMeta {
    InstanceMeta {
        ip: ip.to_string(),
        port,
        engine_type: "tcp".to_string(),
        app: "billing".to_string(),
        cluster: format!("cluster-{ip}"),
        cluster_type: "tendbha".to_string(),
        idc: "sz-1".to_string(),
        role: InstanceRole::Master,
        status: InventoryStatus::Running,
        domain: None,
    }
}

fn worker(store: &StateStore, ip: &str, script: &Script, router: Arc<GmRouter>) -> EngineWorker {
    EngineWorker::new(
        detector_config(ip),
        Arc::new(ScriptedEngine {
            script: Arc::clone(script),
        }),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        router,
    )
}

async fn register_gm(store: &StateStore, port: u16) {
    store
        .heartbeat(&Heartbeat {
            ip: "127.0.0.1".to_string(),
            port,
            module: Module::Gm,
            idc: "sz-1".to_string(),
            engine_type: String::new(),
            last_seen: epoch_secs(),
        })
        .await
        .unwrap();
}

async fn controller() -> (u16, mpsc::Receiver<Inbound>, watch::Sender<bool>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = mpsc::channel(64);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let known = Arc::new(["tcp".to_string()].into_iter().collect::<HashSet<_>>());
    tokio::spawn(serve(listener, known, tx, shutdown_rx));
    (port, rx, shutdown_tx)
}

// ── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn two_detectors_split_hosts_disjointly() {
    let store = StateStore::open_in_memory().unwrap();
    let hosts: Vec<String> = (1..=20).map(|i| format!("10.1.0.{i}")).collect();
    for host in &hosts {
        store.put_instance(&instance(host, 3306)).unwrap();
        store.put_instance(&instance(host, 3307)).unwrap();
    }
    for ip in ["10.0.0.1", "10.0.0.2"] {
        send_heartbeats(&store, &registrations(&detector_config(ip))).await;
    }

    let script = Script::default();
    let router = Arc::new(GmRouter::new(Duration::from_secs(1)));
    let mut a = worker(&store, "10.0.0.1", &script, Arc::clone(&router));
    let mut b = worker(&store, "10.0.0.2", &script, Arc::clone(&router));
    a.refresh().await.unwrap();
    b.refresh().await.unwrap();

    assert_eq!(a.shard().unwrap().modulus, 2);
    assert_ne!(a.shard().unwrap().index, b.shard().unwrap().index);

    let owned_a: HashSet<InstanceId> = a.targets().into_iter().collect();
    let owned_b: HashSet<InstanceId> = b.targets().into_iter().collect();
    assert!(owned_a.is_disjoint(&owned_b));
    assert_eq!(owned_a.len() + owned_b.len(), hosts.len());
    assert!(owned_a.iter().chain(&owned_b).all(|id| id.port == 3306));
}

#[tokio::test]
async fn unregistered_detector_is_fatal() {
    let store = StateStore::open_in_memory().unwrap();
    send_heartbeats(&store, &registrations(&detector_config("10.0.0.1"))).await;

    let script = Script::default();
    let router = Arc::new(GmRouter::new(Duration::from_secs(1)));
    let mut stranger = worker(&store, "10.0.0.9", &script, router);
    let err = stranger.refresh().await.unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(
        err,
        DetectError::Shard(ShardError::NotInRoster { .. })
    ));
}

#[tokio::test]
async fn reports_ship_on_change_only() {
    let store = StateStore::open_in_memory().unwrap();
    let target = instance("10.1.0.1", 3306);
    store.put_instance(&target).unwrap();
    send_heartbeats(&store, &registrations(&detector_config("10.0.0.1"))).await;

    let (port, mut rx, _shutdown) = controller().await;
    register_gm(&store, port).await;

    let script = Script::default();
    script.lock().insert(target.id(), Status::DbCheckOk);

    let router = Arc::new(GmRouter::new(Duration::from_secs(2)));
    let mut worker = worker(&store, "10.0.0.1", &script, router);
    worker.refresh().await.unwrap();

    let first = worker.detect_once().await;
    assert_eq!((first.probed, first.shipped), (1, 1));
    let inbound = rx.recv().await.unwrap();
    let report = DetectionReport::from_bytes(&inbound.frame.body).unwrap();
    assert_eq!(report.id(), target.id());
    assert_eq!(report.status, Status::DbCheckOk);

    let quiet = worker.detect_once().await;
    assert_eq!((quiet.probed, quiet.shipped), (1, 0));

    script.lock().insert(target.id(), Status::SshCheckFailed);
    let changed = worker.detect_once().await;
    assert_eq!(changed.shipped, 1);
    let report = DetectionReport::from_bytes(&rx.recv().await.unwrap().frame.body).unwrap();
    assert_eq!(report.status, Status::SshCheckFailed);
}

#[tokio::test]
async fn probe_errors_are_reported_as_db_check_failed() {
    let store = StateStore::open_in_memory().unwrap();
    store.put_instance(&instance("10.1.0.1", 3306)).unwrap();
    send_heartbeats(&store, &registrations(&detector_config("10.0.0.1"))).await;
    let (port, mut rx, _shutdown) = controller().await;
    register_gm(&store, port).await;

    let script = Script::default();
    let router = Arc::new(GmRouter::new(Duration::from_secs(2)));
    let mut worker = worker(&store, "10.0.0.1", &script, router);
    worker.refresh().await.unwrap();

    worker.detect_once().await;
    let report = DetectionReport::from_bytes(&rx.recv().await.unwrap().frame.body).unwrap();
    assert_eq!(report.status, Status::DbCheckFailed);
}

#[tokio::test]
async fn no_controller_means_failed_send() {
    let store = StateStore::open_in_memory().unwrap();
    store.put_instance(&instance("10.1.0.1", 3306)).unwrap();
    send_heartbeats(&store, &registrations(&detector_config("10.0.0.1"))).await;

    let script = Script::default();
    let router = Arc::new(GmRouter::new(Duration::from_secs(1)));
    let mut worker = worker(&store, "10.0.0.1", &script, router);
    worker.refresh().await.unwrap();

    let stats = worker.detect_once().await;
    assert_eq!(stats.shipped, 0);
    assert_eq!(stats.failed_sends, 1);
}
