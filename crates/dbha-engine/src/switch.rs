//! Host-level failover procedure shared by the built-in engines.
//!
//! What a switch does depends on the instance's role:
//!
//! | role     | check_switch                      | do_switch                     |
//! |----------|-----------------------------------|-------------------------------|
//! | proxy    | needs a registered domain         | deregister from name service  |
//! | master   | picks a running replica           | swap master and replica roles |
//! | other    | `false`, nothing to do            | never reached                 |

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dbha_core::{
    InstanceId, InstanceMeta, InstanceRole, Inventory, InventoryStatus, NameService,
    SwitchError, SwitchInfo, Switchable,
};
use tracing::{info, warn};

/// External services a switch may touch.
#[derive(Clone)]
pub struct SwitchServices {
    pub inventory: Arc<dyn Inventory>,
    pub names: Arc<dyn NameService>,
}

impl fmt::Debug for SwitchServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwitchServices").finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct HostSwitch {
    meta: InstanceMeta,
    services: SwitchServices,
    info: SwitchInfo,
    /// Set once `do_switch` changed external state.
    switched: bool,
}

impl HostSwitch {
    pub fn new(meta: InstanceMeta, services: SwitchServices) -> Self {
        Self {
            meta,
            services,
            info: SwitchInfo::default(),
            switched: false,
        }
    }

    /// Lowest-addressed running replica of the same cluster.
    async fn pick_replica(&self) -> Result<InstanceId, SwitchError> {
        let mut replicas: Vec<InstanceMeta> = self
            .services
            .inventory
            .cluster_instances(&self.meta.cluster)
            .await?
            .into_iter()
            .filter(|m| {
                m.role == InstanceRole::Slave
                    && m.status.is_switchable()
                    && (m.ip != self.meta.ip || m.port != self.meta.port)
            })
            .collect();
        replicas.sort_by(|a, b| a.ip.cmp(&b.ip).then(a.port.cmp(&b.port)));
        replicas
            .first()
            .map(InstanceMeta::id)
            .ok_or_else(|| {
                SwitchError::Check(format!("no running replica in cluster {}", self.meta.cluster))
            })
    }

    fn replica(&self) -> Result<&InstanceId, SwitchError> {
        self.info
            .chosen_replica
            .as_ref()
            .ok_or_else(|| SwitchError::Switch("no replica chosen".to_string()))
    }

    fn domain(&self) -> Result<&str, SwitchError> {
        self.meta
            .domain
            .as_deref()
            .ok_or_else(|| SwitchError::Check(format!("proxy {} has no domain", self.meta.id())))
    }
}

#[async_trait]
impl Switchable for HostSwitch {
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
        match self.meta.role {
            InstanceRole::Proxy => {
                self.domain()?;
                Ok(true)
            }
            InstanceRole::Master => {
                let replica = self.pick_replica().await?;
                info!(instance = %self.meta.id(), %replica, "replica chosen");
                self.info.chosen_replica = Some(replica);
                Ok(true)
            }
            InstanceRole::Slave | InstanceRole::Standalone | InstanceRole::Unknown => Ok(false),
        }
    }

    async fn do_switch(&mut self) -> Result<(), SwitchError> {
        let id = self.meta.id();
        match self.meta.role {
            InstanceRole::Proxy => {
                let domain = self.domain()?.to_string();
                self.services.names.deregister(&domain, &id).await?;
            }
            InstanceRole::Master => {
                let replica = self.replica()?.clone();
                self.services.inventory.swap_role(&id, &replica).await?;
            }
            role => {
                return Err(SwitchError::Switch(format!("role {role:?} cannot be switched")));
            }
        }
        self.switched = true;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), SwitchError> {
        if !self.switched {
            return Ok(());
        }
        let id = self.meta.id();
        match self.meta.role {
            InstanceRole::Master => {
                let replica = self.replica()?.clone();
                self.services
                    .inventory
                    .swap_role(&replica, &id)
                    .await
                    .map_err(|e| SwitchError::Rollback(e.to_string()))?;
                self.switched = false;
                warn!(instance = %id, %replica, "role swap reverted");
            }
            _ => {
                warn!(instance = %id, "deregistration is not reverted automatically");
            }
        }
        Ok(())
    }

    async fn update_meta(&mut self) -> Result<(), SwitchError> {
        let inventory = &self.services.inventory;
        inventory
            .set_status(&self.meta.id(), InventoryStatus::Unavailable)
            .await
            .map_err(|e| SwitchError::UpdateMeta(e.to_string()))?;
        if let Some(replica) = &self.info.chosen_replica {
            inventory
                .set_status(replica, InventoryStatus::Running)
                .await
                .map_err(|e| SwitchError::UpdateMeta(e.to_string()))?;
        }
        Ok(())
    }
}
