//! Status/ticket service client.
//!
//! Heartbeats, switch tickets, switch logs and the admission counters all
//! live in the status service. Alerts are posted to it too; it fans them
//! out to operators.

use async_trait::async_trait;
use dbha_core::config::HttpServicesConfig;
use dbha_core::{
    Alert, Heartbeat, InstanceId, Module, Notifier, ServiceResult, StatusStore, SwitchLog,
    SwitchScope, SwitchTicket,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::warn;

use crate::error::ClientError;
use crate::http::ServiceClient;

#[derive(Debug, Clone)]
pub struct StatusClient {
    inner: ServiceClient,
}

#[derive(Debug, Deserialize)]
struct Created {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct Count {
    count: u64,
}

impl StatusClient {
    pub fn new(config: &HttpServicesConfig) -> Result<Self, ClientError> {
        Ok(Self {
            inner: ServiceClient::new(config, &config.status_url)?,
        })
    }
}

fn scope_body(scope: &SwitchScope, since: u64) -> Value {
    match scope {
        SwitchScope::Instance(id) => json!({ "ip": id.ip, "port": id.port, "since": since }),
        SwitchScope::Idc(idc) => json!({ "idc": idc, "since": since }),
        SwitchScope::All => json!({ "since": since }),
    }
}

#[async_trait]
impl StatusStore for StatusClient {
    async fn heartbeat(&self, beat: &Heartbeat) -> ServiceResult<()> {
        Ok(self.inner.post("/heartbeats/upsert", beat).await?)
    }

    async fn alive(
        &self,
        module: Module,
        idc: Option<&str>,
        engine_type: Option<&str>,
        since: u64,
    ) -> ServiceResult<Vec<Heartbeat>> {
        let body = json!({
            "module": module,
            "idc": idc,
            "engine_type": engine_type,
            "since": since,
        });
        let mut beats: Vec<Heartbeat> = self.inner.post("/heartbeats/alive", &body).await?;
        beats.sort_by(|a, b| a.ip.cmp(&b.ip).then(a.port.cmp(&b.port)));
        Ok(beats)
    }

    async fn create_ticket(&self, ticket: &SwitchTicket) -> ServiceResult<u64> {
        let created: Created = self.inner.post("/tickets/create", ticket).await?;
        Ok(created.id)
    }

    async fn update_ticket(&self, ticket: &SwitchTicket) -> ServiceResult<()> {
        Ok(self.inner.post("/tickets/update", ticket).await?)
    }

    async fn open_ticket(
        &self,
        id: &InstanceId,
        since: u64,
    ) -> ServiceResult<Option<SwitchTicket>> {
        let body = json!({ "ip": id.ip, "port": id.port, "since": since });
        Ok(self.inner.post("/tickets/open", &body).await?)
    }

    async fn append_log(&self, log: &SwitchLog) -> ServiceResult<()> {
        Ok(self.inner.post("/switch_logs/append", log).await?)
    }

    async fn count_switches(&self, scope: &SwitchScope, since: u64) -> ServiceResult<u64> {
        let count: Count = self
            .inner
            .post("/tickets/count", &scope_body(scope, since))
            .await?;
        Ok(count.count)
    }
}

#[async_trait]
impl Notifier for StatusClient {
    async fn notify(&self, alert: &Alert) {
        let body = match alert {
            Alert::SwitchSucceeded { ticket } => {
                json!({ "title": alert.title(), "ticket": ticket })
            }
            Alert::SwitchFailed { ticket, reason } => {
                json!({ "title": alert.title(), "ticket": ticket, "reason": reason })
            }
            Alert::AuthFailure { report } => {
                json!({ "title": alert.title(), "report": report })
            }
            Alert::SwitchNotStarted { instance, reason } => {
                json!({ "title": alert.title(), "instance": instance, "reason": reason })
            }
        };
        if let Err(e) = self.inner.post::<_, ()>("/alerts/send", &body).await {
            warn!(title = alert.title(), error = %e, "alert not delivered");
        }
    }
}
