//! Name-resolution service client (DNS, CLB and Polaris entries).

use async_trait::async_trait;
use dbha_core::config::HttpServicesConfig;
use dbha_core::{InstanceId, NameService, ServiceResult};
use serde_json::json;
use tracing::info;

use crate::error::ClientError;
use crate::http::ServiceClient;

#[derive(Debug, Clone)]
pub struct NameServiceClient {
    inner: ServiceClient,
}

impl NameServiceClient {
    pub fn new(config: &HttpServicesConfig) -> Result<Self, ClientError> {
        Ok(Self {
            inner: ServiceClient::new(config, &config.name_url)?,
        })
    }
}

#[async_trait]
impl NameService for NameServiceClient {
    async fn deregister(&self, domain: &str, id: &InstanceId) -> ServiceResult<()> {
        let body = json!({ "domain": domain, "ip": id.ip, "port": id.port });
        self.inner.post::<_, ()>("/entries/deregister", &body).await?;
        info!(%domain, instance = %id, "endpoint deregistered");
        Ok(())
    }
}
