//! dbha-engine — built-in engine plugins.
//!
//! Two engines ship with the daemon:
//!
//! - `tcp`: connect-only liveness for any TCP-speaking database.
//! - `redis`: `PING`/`+PONG` liveness with credential-failure detection.
//!
//! Both corroborate a failed probe over SSH and share the host-level
//! switch procedure in [`switch`].

pub mod net;
pub mod redis;
pub mod switch;
pub mod tcp;

use std::sync::Arc;

use dbha_core::{Config, CoreError, EngineRegistry};

pub use redis::RedisEngine;
pub use switch::{HostSwitch, SwitchServices};
pub use tcp::TcpEngine;

/// Registry holding every built-in engine, configured from `config.engines`.
pub fn builtin_registry(
    config: &Config,
    services: SwitchServices,
) -> Result<EngineRegistry, CoreError> {
    EngineRegistry::new()
        .with(Arc::new(TcpEngine::new(
            config.engine(tcp::ENGINE_TYPE),
            services.clone(),
        )))?
        .with(Arc::new(RedisEngine::new(
            config.engine(redis::ENGINE_TYPE),
            services,
        )))
}
