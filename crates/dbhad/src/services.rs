//! External service backends selected by `services.backend`.

use std::sync::Arc;

use anyhow::Context;
use dbha_client::{InventoryClient, NameServiceClient, StatusClient};
use dbha_core::config::ServicesConfig;
use dbha_core::{Inventory, LogNotifier, NameService, Notifier, StatusStore};
use dbha_engine::SwitchServices;
use dbha_pipeline::PipelineServices;
use dbha_state::StateStore;
use tracing::info;

pub struct Services {
    pub inventory: Arc<dyn Inventory>,
    pub status: Arc<dyn StatusStore>,
    pub names: Arc<dyn NameService>,
    pub notifier: Arc<dyn Notifier>,
}

impl Services {
    pub fn build(config: &ServicesConfig) -> anyhow::Result<Self> {
        match config {
            ServicesConfig::Embedded { path } => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("creating {}", parent.display()))?;
                }
                let store = StateStore::open(path)
                    .with_context(|| format!("opening state store {}", path.display()))?;
                info!(path = ?path, "embedded state store opened");
                Ok(Self {
                    inventory: Arc::new(store.clone()),
                    status: Arc::new(store.clone()),
                    names: Arc::new(store),
                    notifier: Arc::new(LogNotifier),
                })
            }
            ServicesConfig::Http(http) => {
                let status = Arc::new(StatusClient::new(http).context("status client")?);
                info!(
                    inventory = %http.inventory_url,
                    status = %http.status_url,
                    names = %http.name_url,
                    "http service clients ready"
                );
                Ok(Self {
                    inventory: Arc::new(InventoryClient::new(http).context("inventory client")?),
                    names: Arc::new(NameServiceClient::new(http).context("name client")?),
                    notifier: Arc::clone(&status) as Arc<dyn Notifier>,
                    status,
                })
            }
        }
    }

    pub fn switch_services(&self) -> SwitchServices {
        SwitchServices {
            inventory: Arc::clone(&self.inventory),
            names: Arc::clone(&self.names),
        }
    }

    pub fn pipeline_services(&self) -> PipelineServices {
        PipelineServices {
            inventory: Arc::clone(&self.inventory),
            status: Arc::clone(&self.status),
            notifier: Arc::clone(&self.notifier),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbha_core::{Heartbeat, Module, epoch_secs};

    #[tokio::test]
    async fn embedded_backend_shares_one_store() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServicesConfig::Embedded {
            path: dir.path().join("state").join("dbha.redb"),
        };
        let services = Services::build(&config).unwrap();
        assert!(services.inventory.instances_on_host("10.0.0.1").await.unwrap().is_empty());

        services
            .status
            .heartbeat(&Heartbeat {
                ip: "10.0.0.9".to_string(),
                port: 0,
                module: Module::Agent,
                idc: "sz-1".to_string(),
                engine_type: "tcp".to_string(),
                last_seen: epoch_secs(),
            })
            .await
            .unwrap();
        let alive = services
            .pipeline_services()
            .status
            .alive(Module::Agent, Some("sz-1"), None, 0)
            .await
            .unwrap();
        assert_eq!(alive.len(), 1);
    }
}
