//! Generic TCP engine.
//!
//! Liveness is a bare TCP connect to the instance port. When it fails the
//! host is checked over SSH to tell a dead engine from a dead machine.

use std::sync::Arc;

use async_trait::async_trait;
use dbha_core::config::EngineConfig;
use dbha_core::{Detectable, Engine, InstanceMeta, ProbeError, Status, Switchable};
use tracing::debug;

use crate::net;
use crate::switch::{HostSwitch, SwitchServices};

pub const ENGINE_TYPE: &str = "tcp";

#[derive(Debug)]
pub struct TcpEngine {
    config: Arc<EngineConfig>,
    services: SwitchServices,
}

impl TcpEngine {
    pub fn new(config: EngineConfig, services: SwitchServices) -> Self {
        Self {
            config: Arc::new(config),
            services,
        }
    }
}

impl Engine for TcpEngine {
    fn engine_type(&self) -> &str {
        ENGINE_TYPE
    }

    fn detectable(&self, meta: InstanceMeta) -> Arc<dyn Detectable> {
        Arc::new(TcpProbe {
            meta,
            config: Arc::clone(&self.config),
        })
    }

    fn switchable(&self, meta: InstanceMeta) -> Box<dyn Switchable> {
        Box::new(HostSwitch::new(meta, self.services.clone()))
    }
}

#[derive(Debug)]
pub struct TcpProbe {
    meta: InstanceMeta,
    config: Arc<EngineConfig>,
}

#[async_trait]
impl Detectable for TcpProbe {
    fn meta(&self) -> &InstanceMeta {
        &self.meta
    }

    async fn probe(&self) -> Result<Status, ProbeError> {
        let addr = self.meta.id().addr();
        match net::connect(&addr, self.config.connect_timeout).await {
            Ok(_) => Ok(Status::DbCheckOk),
            Err(e) => {
                debug!(%addr, error = %e, "tcp probe failed, checking ssh");
                let status = net::ssh_corroborate(
                    &self.meta.ip,
                    self.config.ssh_port,
                    self.config.ssh_timeout,
                )
                .await;
                Ok(status)
            }
        }
    }
}
