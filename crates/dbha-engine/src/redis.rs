//! Redis engine.
//!
//! Probes with `PING` (after `AUTH` when a password is configured) and
//! expects `+PONG`. A credential rejection is reported as
//! `auth-check-failed`; every other failure falls through to the SSH check.

use std::sync::Arc;

use async_trait::async_trait;
use dbha_core::config::EngineConfig;
use dbha_core::{Detectable, Engine, InstanceMeta, ProbeError, Status, Switchable};
use tokio::io::BufReader;
use tracing::debug;

use crate::net;
use crate::switch::{HostSwitch, SwitchServices};

pub const ENGINE_TYPE: &str = "redis";

/// Error replies that mean the credentials, not the server, are wrong.
const AUTH_ERRORS: [&str; 3] = ["-NOAUTH", "-WRONGPASS", "-ERR invalid password"];

#[derive(Debug)]
pub struct RedisEngine {
    config: Arc<EngineConfig>,
    services: SwitchServices,
}

impl RedisEngine {
    pub fn new(config: EngineConfig, services: SwitchServices) -> Self {
        Self {
            config: Arc::new(config),
            services,
        }
    }
}

impl Engine for RedisEngine {
    fn engine_type(&self) -> &str {
        ENGINE_TYPE
    }

    fn detectable(&self, meta: InstanceMeta) -> Arc<dyn Detectable> {
        Arc::new(RedisProbe {
            meta,
            config: Arc::clone(&self.config),
        })
    }

    fn switchable(&self, meta: InstanceMeta) -> Box<dyn Switchable> {
        Box::new(HostSwitch::new(meta, self.services.clone()))
    }
}

/// Outcome of the protocol-level check, before SSH corroboration.
#[derive(Debug, PartialEq, Eq)]
enum Ping {
    Pong,
    AuthRejected,
    Failed(String),
}

#[derive(Debug)]
pub struct RedisProbe {
    meta: InstanceMeta,
    config: Arc<EngineConfig>,
}

impl RedisProbe {
    fn auth_command(&self) -> Option<String> {
        let password = self.config.password.as_deref()?;
        Some(match self.config.user.as_deref() {
            Some(user) => format!("AUTH {user} {password}\r\n"),
            None => format!("AUTH {password}\r\n"),
        })
    }

    async fn ping(&self) -> Ping {
        let timeout = self.config.connect_timeout;
        let addr = self.meta.id().addr();
        let stream = match net::connect(&addr, timeout).await {
            Ok(stream) => stream,
            Err(e) => return Ping::Failed(e.to_string()),
        };
        let mut reader = BufReader::new(stream);

        if let Some(auth) = self.auth_command() {
            match net::exchange(&mut reader, auth.as_bytes(), timeout).await {
                Ok(reply) if reply.starts_with("+OK") => {}
                Ok(reply) => return classify_reply(&reply),
                Err(e) => return Ping::Failed(e.to_string()),
            }
        }

        match net::exchange(&mut reader, b"PING\r\n", timeout).await {
            Ok(reply) => classify_reply(&reply),
            Err(e) => Ping::Failed(e.to_string()),
        }
    }
}

fn classify_reply(reply: &str) -> Ping {
    if reply == "+PONG" {
        Ping::Pong
    } else if AUTH_ERRORS.iter().any(|prefix| reply.starts_with(prefix)) {
        Ping::AuthRejected
    } else {
        Ping::Failed(format!("unexpected reply {reply:?}"))
    }
}

#[async_trait]
impl Detectable for RedisProbe {
    fn meta(&self) -> &InstanceMeta {
        &self.meta
    }

    async fn probe(&self) -> Result<Status, ProbeError> {
        match self.ping().await {
            Ping::Pong => Ok(Status::DbCheckOk),
            Ping::AuthRejected => Ok(Status::AuthCheckFailed),
            Ping::Failed(reason) => {
                debug!(instance = %self.meta.id(), %reason, "redis ping failed, checking ssh");
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
