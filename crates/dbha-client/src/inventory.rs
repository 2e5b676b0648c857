//! Inventory service client.

use async_trait::async_trait;
use dbha_core::config::HttpServicesConfig;
use dbha_core::{InstanceId, InstanceMeta, Inventory, InventoryStatus, ServiceResult};
use serde_json::json;
use tracing::debug;

use crate::error::ClientError;
use crate::http::ServiceClient;

#[derive(Debug, Clone)]
pub struct InventoryClient {
    inner: ServiceClient,
}

impl InventoryClient {
    pub fn new(config: &HttpServicesConfig) -> Result<Self, ClientError> {
        Ok(Self {
            inner: ServiceClient::new(config, &config.inventory_url)?,
        })
    }
}

#[async_trait]
impl Inventory for InventoryClient {
    async fn instances_in_domain(
        &self,
        idc: &str,
        engine_type: &str,
    ) -> ServiceResult<Vec<InstanceMeta>> {
        let body = json!({ "idc": idc, "engine_type": engine_type });
        Ok(self.inner.post("/instances/by_domain", &body).await?)
    }

    async fn instances_on_host(&self, ip: &str) -> ServiceResult<Vec<InstanceMeta>> {
        let body = json!({ "ip": ip });
        Ok(self.inner.post("/instances/by_host", &body).await?)
    }

    async fn cluster_instances(&self, cluster: &str) -> ServiceResult<Vec<InstanceMeta>> {
        let body = json!({ "cluster": cluster });
        Ok(self.inner.post("/instances/by_cluster", &body).await?)
    }

    async fn set_status(&self, id: &InstanceId, status: InventoryStatus) -> ServiceResult<()> {
        let body = json!({ "ip": id.ip, "port": id.port, "status": status });
        self.inner.post::<_, ()>("/instances/set_status", &body).await?;
        debug!(instance = %id, ?status, "inventory status updated");
        Ok(())
    }

    async fn swap_role(&self, master: &InstanceId, replica: &InstanceId) -> ServiceResult<()> {
        let body = json!({ "master": master, "replica": replica });
        self.inner.post::<_, ()>("/instances/swap_role", &body).await?;
        debug!(%master, %replica, "inventory roles swapped");
        Ok(())
    }
}
