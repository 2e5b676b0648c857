//! Built-in engines against loopback fakes and the embedded store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dbha_core::config::EngineConfig;
use dbha_core::{
    Config, Engine, InstanceId, InstanceMeta, InstanceRole, InventoryStatus, NameService,
    ServiceResult, Status, SwitchError,
};
use dbha_engine::{RedisEngine, SwitchServices, TcpEngine, builtin_registry};
use dbha_state::StateStore;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

// ── Fakes ──────────────────────────────────────────────────────────

#[derive(Default)]
struct RecordingNames {
    calls: Mutex<Vec<(String, InstanceId)>>,
}

#[async_trait]
impl NameService for RecordingNames {
    async fn deregister(&self, domain: &str, id: &InstanceId) -> ServiceResult<()> {
        self.calls.lock().push((domain.to_string(), id.clone()));
        Ok(())
    }
}

async fn listening_port() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

async fn closed_port() -> u16 {
    listening_port().await.1
}

async fn ssh_server() -> u16 {
    let (listener, port) = listening_port().await;
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let _ = stream.write_all(b"SSH-2.0-OpenSSH_8.0\r\n").await;
        }
    });
    port
}

/// Minimal RESP responder: AUTH against `password`, PING needs auth when set.
async fn redis_server(password: Option<&'static str>) -> u16 {
    let (listener, port) = listening_port().await;
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut reader = BufReader::new(stream);
                let mut authed = password.is_none();
                let mut line = String::new();
                while reader.read_line(&mut line).await.unwrap_or(0) > 0 {
                    let cmd = line.trim_end().to_string();
                    line.clear();
                    let reply: &[u8] = if let Some(given) = cmd.strip_prefix("AUTH ") {
                        if Some(given) == password {
                            authed = true;
                            b"+OK\r\n"
                        } else {
                            b"-WRONGPASS invalid username-password pair\r\n"
                        }
                    } else if cmd == "PING" && authed {
                        b"+PONG\r\n"
                    } else if cmd == "PING" {
                        b"-NOAUTH Authentication required.\r\n"
                    } else {
                        b"-ERR unknown command\r\n"
                    };
                    if reader.get_mut().write_all(reply).await.is_err() {
                        break;
                    }
                }
            });
        }
    });
    port
}

fn engine_config(ssh_port: u16, password: Option<&str>) -> EngineConfig {
    EngineConfig {
        user: None,
        password: password.map(str::to_string),
        ssh_port,
        connect_timeout: Duration::from_millis(500),
        ssh_timeout: Duration::from_millis(500),
    }
}

fn meta(ip: &str, port: u16, engine: &str, role: InstanceRole) -> InstanceMeta {
    InstanceMeta {
        ip: ip.to_string(),
        port,
        engine_type: engine.to_string(),
        app: "billing".to_string(),
        cluster: "billing-db".to_string(),
        cluster_type: "tendbha".to_string(),
        idc: "sz-1".to_string(),
        role,
        status: InventoryStatus::Running,
        domain: None,
    }
}

fn services(store: &StateStore, names: Arc<RecordingNames>) -> SwitchServices {
    SwitchServices {
        inventory: Arc::new(store.clone()),
        names,
    }
}

// ── Probes ─────────────────────────────────────────────────────────

#[tokio::test]
async fn tcp_probe_ok_when_port_accepts() {
    let (_listener, port) = listening_port().await;
    let store = StateStore::open_in_memory().unwrap();
    let engine = TcpEngine::new(
        engine_config(closed_port().await, None),
        services(&store, Arc::default()),
    );
    let probe = engine.detectable(meta("127.0.0.1", port, "tcp", InstanceRole::Master));
    assert_eq!(probe.probe().await.unwrap(), Status::DbCheckOk);
}

#[tokio::test]
async fn tcp_probe_falls_back_to_ssh() {
    let store = StateStore::open_in_memory().unwrap();
    let dead = closed_port().await;

    let engine = TcpEngine::new(
        engine_config(ssh_server().await, None),
        services(&store, Arc::default()),
    );
    let probe = engine.detectable(meta("127.0.0.1", dead, "tcp", InstanceRole::Master));
    assert_eq!(probe.probe().await.unwrap(), Status::SshCheckOk);

    let engine = TcpEngine::new(
        engine_config(closed_port().await, None),
        services(&store, Arc::default()),
    );
    let probe = engine.detectable(meta("127.0.0.1", dead, "tcp", InstanceRole::Master));
    assert_eq!(probe.probe().await.unwrap(), Status::SshCheckFailed);
}

#[tokio::test]
async fn redis_probe_pong_and_auth() {
    let store = StateStore::open_in_memory().unwrap();
    let port = redis_server(Some("secret")).await;
    let ssh = closed_port().await;
    let target = meta("127.0.0.1", port, "redis", InstanceRole::Master);

    let good = RedisEngine::new(
        engine_config(ssh, Some("secret")),
        services(&store, Arc::default()),
    );
    assert_eq!(
        good.detectable(target.clone()).probe().await.unwrap(),
        Status::DbCheckOk
    );

    let wrong = RedisEngine::new(
        engine_config(ssh, Some("guess")),
        services(&store, Arc::default()),
    );
    assert_eq!(
        wrong.detectable(target.clone()).probe().await.unwrap(),
        Status::AuthCheckFailed
    );

    let missing = RedisEngine::new(engine_config(ssh, None), services(&store, Arc::default()));
    assert_eq!(
        missing.detectable(target).probe().await.unwrap(),
        Status::AuthCheckFailed
    );
}

#[tokio::test]
async fn redis_probe_down_uses_ssh() {
    let store = StateStore::open_in_memory().unwrap();
    let engine = RedisEngine::new(
        engine_config(ssh_server().await, None),
        services(&store, Arc::default()),
    );
    let probe = engine.detectable(meta(
        "127.0.0.1",
        closed_port().await,
        "redis",
        InstanceRole::Master,
    ));
    assert_eq!(probe.probe().await.unwrap(), Status::SshCheckOk);
}

// ── Switches ───────────────────────────────────────────────────────

#[tokio::test]
async fn master_switch_promotes_replica() {
    let store = StateStore::open_in_memory().unwrap();
    let master = meta("10.0.0.1", 3306, "tcp", InstanceRole::Master);
    let replica = meta("10.0.0.2", 3306, "tcp", InstanceRole::Slave);
    let mut stale = meta("10.0.0.0", 3306, "tcp", InstanceRole::Slave);
    stale.status = InventoryStatus::Unavailable;
    for m in [&master, &replica, &stale] {
        store.put_instance(m).unwrap();
    }

    let engine = TcpEngine::new(engine_config(22, None), services(&store, Arc::default()));
    let mut switch = engine.switchable(master.clone());
    assert!(switch.check_switch().await.unwrap());
    assert_eq!(switch.info().chosen_replica, Some(replica.id()));

    switch.do_switch().await.unwrap();
    switch.update_meta().await.unwrap();

    let old = store.get_instance(&master.id()).unwrap().unwrap();
    let new = store.get_instance(&replica.id()).unwrap().unwrap();
    assert_eq!(old.role, InstanceRole::Slave);
    assert_eq!(old.status, InventoryStatus::Unavailable);
    assert_eq!(new.role, InstanceRole::Master);
    assert_eq!(new.status, InventoryStatus::Running);
}

#[tokio::test]
async fn master_without_replica_fails_check() {
    let store = StateStore::open_in_memory().unwrap();
    let master = meta("10.0.0.1", 3306, "tcp", InstanceRole::Master);
    store.put_instance(&master).unwrap();

    let engine = TcpEngine::new(engine_config(22, None), services(&store, Arc::default()));
    let mut switch = engine.switchable(master);
    assert!(matches!(
        switch.check_switch().await,
        Err(SwitchError::Check(_))
    ));
}

#[tokio::test]
async fn rollback_reverts_role_swap() {
    let store = StateStore::open_in_memory().unwrap();
    let master = meta("10.0.0.1", 3306, "tcp", InstanceRole::Master);
    let replica = meta("10.0.0.2", 3306, "tcp", InstanceRole::Slave);
    store.put_instance(&master).unwrap();
    store.put_instance(&replica).unwrap();

    let engine = TcpEngine::new(engine_config(22, None), services(&store, Arc::default()));
    let mut switch = engine.switchable(master.clone());
    switch.check_switch().await.unwrap();
    switch.do_switch().await.unwrap();
    switch.rollback().await.unwrap();

    assert_eq!(
        store.get_instance(&master.id()).unwrap().unwrap().role,
        InstanceRole::Master
    );
    assert_eq!(
        store.get_instance(&replica.id()).unwrap().unwrap().role,
        InstanceRole::Slave
    );
}

#[tokio::test]
async fn proxy_switch_deregisters_domain() {
    let store = StateStore::open_in_memory().unwrap();
    let names = Arc::new(RecordingNames::default());
    let mut proxy = meta("10.0.0.5", 10000, "tcp", InstanceRole::Proxy);
    proxy.domain = Some("billing.proxy.db".to_string());
    store.put_instance(&proxy).unwrap();

    let engine = TcpEngine::new(engine_config(22, None), services(&store, Arc::clone(&names)));
    let mut switch = engine.switchable(proxy.clone());
    assert!(switch.check_switch().await.unwrap());
    switch.do_switch().await.unwrap();

    let calls = names.calls.lock();
    assert_eq!(
        calls.as_slice(),
        &[("billing.proxy.db".to_string(), proxy.id())]
    );
}

#[tokio::test]
async fn replicas_need_no_switch() {
    let store = StateStore::open_in_memory().unwrap();
    let engine = RedisEngine::new(engine_config(22, None), services(&store, Arc::default()));
    let mut switch = engine.switchable(meta("10.0.0.2", 6379, "redis", InstanceRole::Slave));
    assert!(!switch.check_switch().await.unwrap());
}

#[test]
fn registry_holds_builtin_engines() {
    let config = Config::from_yaml_str(
        r#"
services:
  backend: embedded
  path: /tmp/dbha.redb
engines:
  redis:
    password: secret
"#,
    )
    .unwrap();
    let store = StateStore::open_in_memory().unwrap();
    let registry = builtin_registry(&config, services(&store, Arc::default())).unwrap();
    assert_eq!(registry.engine_types(), vec!["redis".to_string(), "tcp".to_string()]);
}
