//! StateStore — redb-backed inventory and status store.
//!
//! Provides typed CRUD over inventory records, switch tickets, switch
//! logs and heartbeats, and implements the [`Inventory`] and
//! [`StatusStore`] traits on top. All values are JSON-serialized into
//! redb's `&[u8]` value columns. The store supports both on-disk and
//! in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use dbha_core::{
    Heartbeat, InstanceId, InstanceMeta, InstanceRole, Inventory, InventoryStatus, Module,
    NameService, ServiceError, ServiceResult, StatusStore, SwitchLog, SwitchScope, SwitchTicket,
    TicketStatus,
};

use crate::error::{StateError, StateResult};
use crate::tables::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(INSTANCES).map_err(map_err!(Table))?;
        txn.open_table(TICKETS).map_err(map_err!(Table))?;
        txn.open_table(SWITCH_LOGS).map_err(map_err!(Table))?;
        txn.open_table(HEARTBEATS).map_err(map_err!(Table))?;
        txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Instances ──────────────────────────────────────────────────

    /// Insert or update an inventory record.
    pub fn put_instance(&self, meta: &InstanceMeta) -> StateResult<()> {
        let key = instance_key(&meta.id());
        let value = serde_json::to_vec(meta).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, "instance stored");
        Ok(())
    }

    pub fn get_instance(&self, id: &InstanceId) -> StateResult<Option<InstanceMeta>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
        match table.get(instance_key(id).as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let meta: InstanceMeta =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(meta))
            }
            None => Ok(None),
        }
    }

    /// List inventory records matching `filter`.
    pub fn list_instances<F>(&self, filter: F) -> StateResult<Vec<InstanceMeta>>
    where
        F: Fn(&InstanceMeta) -> bool,
    {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let meta: InstanceMeta =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if filter(&meta) {
                results.push(meta);
            }
        }
        Ok(results)
    }

    /// Read-modify-write a set of inventory records in one transaction.
    fn modify_instances<F>(&self, ids: &[&InstanceId], mut apply: F) -> StateResult<()>
    where
        F: FnMut(usize, &mut InstanceMeta),
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            for (index, id) in ids.iter().enumerate() {
                let key = instance_key(id);
                let mut meta: InstanceMeta = {
                    let guard = table
                        .get(key.as_str())
                        .map_err(map_err!(Read))?
                        .ok_or_else(|| StateError::NotFound(format!("instance {id}")))?;
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                };
                apply(index, &mut meta);
                let value = serde_json::to_vec(&meta).map_err(map_err!(Serialize))?;
                table
                    .insert(key.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Tickets ────────────────────────────────────────────────────

    /// Persist a new ticket under the next id and return that id.
    pub fn insert_ticket(&self, ticket: &SwitchTicket) -> StateResult<u64> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let id;
        {
            let mut sequences = txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
            id = next_sequence(&mut sequences, TICKET_SEQ)?;

            let mut stored = ticket.clone();
            stored.id = id;
            let value = serde_json::to_vec(&stored).map_err(map_err!(Serialize))?;
            let mut tickets = txn.open_table(TICKETS).map_err(map_err!(Table))?;
            tickets.insert(id, value.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(ticket_id = id, instance = %ticket.instance_id(), "ticket created");
        Ok(id)
    }

    /// Overwrite an existing ticket.
    pub fn put_ticket(&self, ticket: &SwitchTicket) -> StateResult<()> {
        let value = serde_json::to_vec(ticket).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(TICKETS).map_err(map_err!(Table))?;
            if table.get(ticket.id).map_err(map_err!(Read))?.is_none() {
                return Err(StateError::NotFound(format!("ticket {}", ticket.id)));
            }
            table
                .insert(ticket.id, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    pub fn get_ticket(&self, id: u64) -> StateResult<Option<SwitchTicket>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TICKETS).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => {
                let ticket: SwitchTicket =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(ticket))
            }
            None => Ok(None),
        }
    }

    /// List tickets started at or after `since`, oldest first.
    pub fn list_tickets(&self, since: u64) -> StateResult<Vec<SwitchTicket>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TICKETS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let ticket: SwitchTicket =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if ticket.started_at >= since {
                results.push(ticket);
            }
        }
        Ok(results)
    }

    // ── Switch logs ────────────────────────────────────────────────

    pub fn insert_log(&self, log: &SwitchLog) -> StateResult<()> {
        let value = serde_json::to_vec(log).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut sequences = txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
            let seq = next_sequence(&mut sequences, LOG_SEQ)?;
            let mut table = txn.open_table(SWITCH_LOGS).map_err(map_err!(Table))?;
            table.insert(seq, value.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// All log lines of one ticket in append order.
    pub fn list_logs(&self, ticket_id: u64) -> StateResult<Vec<SwitchLog>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SWITCH_LOGS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let log: SwitchLog =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if log.ticket_id == ticket_id {
                results.push(log);
            }
        }
        Ok(results)
    }

    // ── Heartbeats ─────────────────────────────────────────────────

    pub fn put_heartbeat(&self, beat: &Heartbeat) -> StateResult<()> {
        let key = beat.table_key();
        let value = serde_json::to_vec(beat).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(HEARTBEATS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    pub fn list_heartbeats(&self) -> StateResult<Vec<Heartbeat>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(HEARTBEATS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let beat: Heartbeat =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(beat);
        }
        Ok(results)
    }

    /// Delete a registration. Returns true if it existed.
    pub fn delete_heartbeat(&self, beat: &Heartbeat) -> StateResult<bool> {
        let key = beat.table_key();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(HEARTBEATS).map_err(map_err!(Table))?;
            existed = table.remove(key.as_str()).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }
}

fn instance_key(id: &InstanceId) -> String {
    format!("{}:{}", id.ip, id.port)
}

fn next_sequence(table: &mut redb::Table<'_, &'static str, u64>, name: &str) -> StateResult<u64> {
    let current = table
        .get(name)
        .map_err(map_err!(Read))?
        .map(|guard| guard.value())
        .unwrap_or(0);
    let next = current + 1;
    table.insert(name, next).map_err(map_err!(Write))?;
    Ok(next)
}

fn in_scope(ticket: &SwitchTicket, scope: &SwitchScope) -> bool {
    match scope {
        SwitchScope::Instance(id) => ticket.ip == id.ip && ticket.port == id.port,
        SwitchScope::Idc(idc) => &ticket.idc == idc,
        SwitchScope::All => true,
    }
}

// ── Trait implementations ──────────────────────────────────────────

#[async_trait]
impl Inventory for StateStore {
    async fn instances_in_domain(
        &self,
        idc: &str,
        engine_type: &str,
    ) -> ServiceResult<Vec<InstanceMeta>> {
        Ok(self.list_instances(|m| m.idc == idc && m.engine_type == engine_type)?)
    }

    async fn instances_on_host(&self, ip: &str) -> ServiceResult<Vec<InstanceMeta>> {
        Ok(self.list_instances(|m| m.ip == ip)?)
    }

    async fn cluster_instances(&self, cluster: &str) -> ServiceResult<Vec<InstanceMeta>> {
        Ok(self.list_instances(|m| m.cluster == cluster)?)
    }

    async fn set_status(&self, id: &InstanceId, status: InventoryStatus) -> ServiceResult<()> {
        self.modify_instances(&[id], |_, meta| meta.status = status)?;
        debug!(instance = %id, ?status, "instance status updated");
        Ok(())
    }

    async fn swap_role(&self, master: &InstanceId, replica: &InstanceId) -> ServiceResult<()> {
        self.modify_instances(&[master, replica], |index, meta| {
            meta.role = if index == 0 {
                InstanceRole::Slave
            } else {
                InstanceRole::Master
            };
        })?;
        debug!(%master, %replica, "roles swapped");
        Ok(())
    }
}

#[async_trait]
impl StatusStore for StateStore {
    async fn heartbeat(&self, beat: &Heartbeat) -> ServiceResult<()> {
        Ok(self.put_heartbeat(beat)?)
    }

    async fn alive(
        &self,
        module: Module,
        idc: Option<&str>,
        engine_type: Option<&str>,
        since: u64,
    ) -> ServiceResult<Vec<Heartbeat>> {
        let mut beats: Vec<Heartbeat> = self
            .list_heartbeats()?
            .into_iter()
            .filter(|b| b.module == module && b.last_seen >= since)
            .filter(|b| idc.is_none_or(|idc| b.idc == idc))
            .filter(|b| engine_type.is_none_or(|t| b.engine_type == t))
            .collect();
        beats.sort_by(|a, b| a.ip.cmp(&b.ip).then(a.port.cmp(&b.port)));
        Ok(beats)
    }

    async fn create_ticket(&self, ticket: &SwitchTicket) -> ServiceResult<u64> {
        Ok(self.insert_ticket(ticket)?)
    }

    async fn update_ticket(&self, ticket: &SwitchTicket) -> ServiceResult<()> {
        Ok(self.put_ticket(ticket)?)
    }

    async fn open_ticket(
        &self,
        id: &InstanceId,
        since: u64,
    ) -> ServiceResult<Option<SwitchTicket>> {
        let scope = SwitchScope::Instance(id.clone());
        Ok(self
            .list_tickets(since)?
            .into_iter()
            .find(|t| t.status == TicketStatus::Doing && in_scope(t, &scope)))
    }

    async fn append_log(&self, log: &SwitchLog) -> ServiceResult<()> {
        Ok(self.insert_log(log)?)
    }

    async fn count_switches(&self, scope: &SwitchScope, since: u64) -> ServiceResult<u64> {
        let count = self
            .list_tickets(since)?
            .iter()
            .filter(|t| in_scope(t, scope))
            .count();
        Ok(count as u64)
    }
}

/// Domains are kept on the inventory record; deregistering clears it.
#[async_trait]
impl NameService for StateStore {
    async fn deregister(&self, domain: &str, id: &InstanceId) -> ServiceResult<()> {
        let registered = self
            .get_instance(id)?
            .and_then(|meta| meta.domain)
            .is_some_and(|d| d == domain);
        if !registered {
            return Err(ServiceError::NotFound(format!("{id} in domain {domain}")));
        }
        self.modify_instances(&[id], |_, meta| meta.domain = None)?;
        debug!(%domain, instance = %id, "endpoint deregistered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbha_core::LogLevel;

    fn test_instance(ip: &str, port: u16, role: InstanceRole) -> InstanceMeta {
        InstanceMeta {
            ip: ip.to_string(),
            port,
            engine_type: "tcp".to_string(),
            app: "billing".to_string(),
            cluster: "billing-db".to_string(),
            cluster_type: "tendbha".to_string(),
            idc: "sz-1".to_string(),
            role,
            status: InventoryStatus::Running,
            domain: None,
        }
    }

    fn test_ticket(ip: &str, idc: &str, started_at: u64) -> SwitchTicket {
        let mut meta = test_instance(ip, 3306, InstanceRole::Master);
        meta.idc = idc.to_string();
        SwitchTicket::open(&meta, "confirmed", started_at)
    }

    fn beat(ip: &str, module: Module, engine: &str, last_seen: u64) -> Heartbeat {
        Heartbeat {
            ip: ip.to_string(),
            port: 0,
            module,
            idc: "sz-1".to_string(),
            engine_type: engine.to_string(),
            last_seen,
        }
    }

    // ── Inventory ──────────────────────────────────────────────────

    #[test]
    fn instance_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let meta = test_instance("10.0.0.1", 3306, InstanceRole::Master);
        store.put_instance(&meta).unwrap();
        assert_eq!(store.get_instance(&meta.id()).unwrap(), Some(meta));
    }

    #[tokio::test]
    async fn instances_by_host_and_domain() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .put_instance(&test_instance("10.0.0.1", 3306, InstanceRole::Master))
            .unwrap();
        store
            .put_instance(&test_instance("10.0.0.1", 3307, InstanceRole::Slave))
            .unwrap();
        let mut redis = test_instance("10.0.0.2", 6379, InstanceRole::Master);
        redis.engine_type = "redis".to_string();
        store.put_instance(&redis).unwrap();

        assert_eq!(store.instances_on_host("10.0.0.1").await.unwrap().len(), 2);
        assert_eq!(
            store.instances_in_domain("sz-1", "redis").await.unwrap(),
            vec![redis]
        );
        assert_eq!(store.cluster_instances("billing-db").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn set_status_and_swap_role() {
        let store = StateStore::open_in_memory().unwrap();
        let master = test_instance("10.0.0.1", 3306, InstanceRole::Master);
        let slave = test_instance("10.0.0.2", 3306, InstanceRole::Slave);
        store.put_instance(&master).unwrap();
        store.put_instance(&slave).unwrap();

        store
            .set_status(&master.id(), InventoryStatus::Unavailable)
            .await
            .unwrap();
        store.swap_role(&master.id(), &slave.id()).await.unwrap();

        let old = store.get_instance(&master.id()).unwrap().unwrap();
        let new = store.get_instance(&slave.id()).unwrap().unwrap();
        assert_eq!(old.status, InventoryStatus::Unavailable);
        assert_eq!(old.role, InstanceRole::Slave);
        assert_eq!(new.role, InstanceRole::Master);
    }

    #[tokio::test]
    async fn set_status_on_unknown_instance_fails() {
        let store = StateStore::open_in_memory().unwrap();
        let err = store
            .set_status(&InstanceId::new("10.9.9.9", 1), InventoryStatus::Unavailable)
            .await
            .unwrap_err();
        assert!(matches!(err, dbha_core::ServiceError::NotFound(_)));
    }

    // ── Tickets ────────────────────────────────────────────────────

    #[tokio::test]
    async fn tickets_get_sequential_ids() {
        let store = StateStore::open_in_memory().unwrap();
        let a = store.create_ticket(&test_ticket("10.0.0.1", "sz-1", 100)).await.unwrap();
        let b = store.create_ticket(&test_ticket("10.0.0.2", "sz-1", 100)).await.unwrap();
        assert_eq!((a, b), (1, 2));
        assert_eq!(store.get_ticket(2).unwrap().unwrap().ip, "10.0.0.2");
    }

    #[tokio::test]
    async fn update_ticket_requires_existing() {
        let store = StateStore::open_in_memory().unwrap();
        let mut ticket = test_ticket("10.0.0.1", "sz-1", 100);
        ticket.id = 42;
        assert!(store.update_ticket(&ticket).await.is_err());

        ticket.id = store.create_ticket(&ticket).await.unwrap();
        ticket.finish(TicketStatus::Success, "done", 120);
        store.update_ticket(&ticket).await.unwrap();
        let stored = store.get_ticket(ticket.id).unwrap().unwrap();
        assert_eq!(stored.status, TicketStatus::Success);
    }

    #[tokio::test]
    async fn open_ticket_only_matches_doing() {
        let store = StateStore::open_in_memory().unwrap();
        let id = InstanceId::new("10.0.0.1", 3306);
        let mut ticket = test_ticket("10.0.0.1", "sz-1", 100);
        ticket.id = store.create_ticket(&ticket).await.unwrap();

        assert!(store.open_ticket(&id, 50).await.unwrap().is_some());
        assert!(store.open_ticket(&id, 150).await.unwrap().is_none());

        ticket.finish(TicketStatus::Failed, "boom", 110);
        store.update_ticket(&ticket).await.unwrap();
        assert!(store.open_ticket(&id, 50).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn count_switches_by_scope_and_window() {
        let store = StateStore::open_in_memory().unwrap();
        store.create_ticket(&test_ticket("10.0.0.1", "sz-1", 100)).await.unwrap();
        store.create_ticket(&test_ticket("10.0.0.1", "sz-1", 200)).await.unwrap();
        store.create_ticket(&test_ticket("10.0.0.2", "sz-2", 200)).await.unwrap();

        let one = SwitchScope::Instance(InstanceId::new("10.0.0.1", 3306));
        assert_eq!(store.count_switches(&one, 0).await.unwrap(), 2);
        assert_eq!(store.count_switches(&one, 150).await.unwrap(), 1);
        assert_eq!(
            store
                .count_switches(&SwitchScope::Idc("sz-2".to_string()), 0)
                .await
                .unwrap(),
            1
        );
        assert_eq!(store.count_switches(&SwitchScope::All, 150).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn switch_logs_are_grouped_by_ticket() {
        let store = StateStore::open_in_memory().unwrap();
        let mut ticket = test_ticket("10.0.0.1", "sz-1", 100);
        ticket.id = store.create_ticket(&ticket).await.unwrap();

        store
            .append_log(&SwitchLog::new(&ticket, LogLevel::Info, "check"))
            .await
            .unwrap();
        store
            .append_log(&SwitchLog::new(&ticket, LogLevel::Success, "done"))
            .await
            .unwrap();

        let logs = store.list_logs(ticket.id).unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[1].message, "done");
        assert!(store.list_logs(ticket.id + 1).unwrap().is_empty());
    }

    // ── Heartbeats ─────────────────────────────────────────────────

    #[tokio::test]
    async fn alive_filters_and_sorts() {
        let store = StateStore::open_in_memory().unwrap();
        store.heartbeat(&beat("10.0.0.3", Module::Agent, "tcp", 100)).await.unwrap();
        store.heartbeat(&beat("10.0.0.1", Module::Agent, "tcp", 100)).await.unwrap();
        store.heartbeat(&beat("10.0.0.2", Module::Agent, "tcp", 10)).await.unwrap();
        store.heartbeat(&beat("10.0.0.4", Module::Agent, "redis", 100)).await.unwrap();
        store.heartbeat(&beat("10.0.0.9", Module::Gm, "", 100)).await.unwrap();

        let agents = store
            .alive(Module::Agent, Some("sz-1"), Some("tcp"), 50)
            .await
            .unwrap();
        let ips: Vec<_> = agents.iter().map(|b| b.ip.as_str()).collect();
        assert_eq!(ips, vec!["10.0.0.1", "10.0.0.3"]);

        let gms = store.alive(Module::Gm, None, None, 50).await.unwrap();
        assert_eq!(gms.len(), 1);
    }

    #[tokio::test]
    async fn heartbeat_refresh_overwrites_row() {
        let store = StateStore::open_in_memory().unwrap();
        store.heartbeat(&beat("10.0.0.1", Module::Agent, "tcp", 10)).await.unwrap();
        store.heartbeat(&beat("10.0.0.1", Module::Agent, "tcp", 99)).await.unwrap();
        let all = store.list_heartbeats().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].last_seen, 99);
        assert!(store.delete_heartbeat(&all[0]).unwrap());
    }

    #[tokio::test]
    async fn deregister_clears_domain() {
        let store = StateStore::open_in_memory().unwrap();
        let mut proxy = test_instance("10.0.0.5", 10000, InstanceRole::Proxy);
        proxy.domain = Some("billing.proxy.db".to_string());
        store.put_instance(&proxy).unwrap();

        assert!(store.deregister("other.db", &proxy.id()).await.is_err());
        store.deregister("billing.proxy.db", &proxy.id()).await.unwrap();
        assert_eq!(store.get_instance(&proxy.id()).unwrap().unwrap().domain, None);
    }

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dbha.redb");
        {
            let store = StateStore::open(&path).unwrap();
            store
                .put_instance(&test_instance("10.0.0.1", 3306, InstanceRole::Master))
                .unwrap();
            store.insert_ticket(&test_ticket("10.0.0.1", "sz-1", 1)).unwrap();
        }
        let store = StateStore::open(&path).unwrap();
        assert!(store.get_instance(&InstanceId::new("10.0.0.1", 3306)).unwrap().is_some());
        assert_eq!(store.insert_ticket(&test_ticket("10.0.0.1", "sz-1", 2)).unwrap(), 2);
    }
}
