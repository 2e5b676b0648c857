//! Controller selection for outgoing reports.
//!
//! Reports for one instance always go to `gms[crc32(ip) mod len(gms)]`
//! of the current GM roster, so one controller sees every report of an
//! identity in order. One persistent connection is kept per controller
//! and shared by all engine workers of this detector.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dbha_core::Heartbeat;
use dbha_protocol::ReportClient;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::info;

use crate::shard::bucket;

#[derive(Debug, Default)]
struct Routes {
    /// Controller addresses, sorted.
    gms: Vec<String>,
    clients: HashMap<String, Arc<Mutex<ReportClient>>>,
}

#[derive(Debug)]
pub struct GmRouter {
    send_timeout: Duration,
    routes: RwLock<Routes>,
}

impl GmRouter {
    pub fn new(send_timeout: Duration) -> Self {
        Self {
            send_timeout,
            routes: RwLock::new(Routes::default()),
        }
    }

    /// Replace the controller roster; connections to departed controllers
    /// are dropped.
    pub fn update(&self, roster: &[Heartbeat]) {
        let mut gms: Vec<String> = roster.iter().map(Heartbeat::addr).collect();
        gms.sort();
        gms.dedup();

        let mut routes = self.routes.write();
        if routes.gms == gms {
            return;
        }
        routes.clients.retain(|addr, _| gms.contains(addr));
        for addr in &gms {
            routes.clients.entry(addr.clone()).or_insert_with(|| {
                Arc::new(Mutex::new(ReportClient::new(addr.clone(), self.send_timeout)))
            });
        }
        info!(controllers = gms.len(), "controller roster updated");
        routes.gms = gms;
    }

    /// Controller address responsible for reports about `ip`.
    pub fn route(&self, ip: &str) -> Option<String> {
        let routes = self.routes.read();
        if routes.gms.is_empty() {
            return None;
        }
        Some(routes.gms[bucket(ip, routes.gms.len())].clone())
    }

    /// Connection to the controller responsible for `ip`.
    pub fn client_for(&self, ip: &str) -> Option<Arc<Mutex<ReportClient>>> {
        let addr = self.route(ip)?;
        self.routes.read().clients.get(&addr).cloned()
    }

    pub fn controllers(&self) -> Vec<String> {
        self.routes.read().gms.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbha_core::Module;

    fn gm(ip: &str, port: u16) -> Heartbeat {
        Heartbeat {
            ip: ip.to_string(),
            port,
            module: Module::Gm,
            idc: "sz-1".to_string(),
            engine_type: String::new(),
            last_seen: 0,
        }
    }

    #[test]
    fn empty_roster_routes_nowhere() {
        let router = GmRouter::new(Duration::from_secs(1));
        assert_eq!(router.route("10.0.0.1"), None);
        assert!(router.client_for("10.0.0.1").is_none());
    }

    #[test]
    fn routing_is_stable_and_order_independent() {
        let a = GmRouter::new(Duration::from_secs(1));
        a.update(&[gm("10.9.0.1", 50000), gm("10.9.0.2", 50000)]);
        let b = GmRouter::new(Duration::from_secs(1));
        b.update(&[gm("10.9.0.2", 50000), gm("10.9.0.1", 50000)]);

        for ip in ["10.0.0.1", "10.0.0.2", "192.168.1.7"] {
            assert_eq!(a.route(ip), b.route(ip));
            assert!(a.route(ip).is_some());
        }
    }

    #[test]
    fn departed_controllers_lose_their_connection() {
        let router = GmRouter::new(Duration::from_secs(1));
        router.update(&[gm("10.9.0.1", 50000), gm("10.9.0.2", 50000)]);
        router.update(&[gm("10.9.0.2", 50000)]);
        assert_eq!(router.controllers(), vec!["10.9.0.2:50000".to_string()]);
        assert_eq!(router.route("10.0.0.1").as_deref(), Some("10.9.0.2:50000"));
        assert!(router.client_for("10.0.0.1").is_some());
    }
}
