//! Execution stage (GCM).
//!
//! For each admitted candidate: mark it unavailable, refuse it if another
//! ticket is already open, create the ticket and acknowledge admission,
//! then drive the switch state machine on its own task. The terminal
//! ticket state is written exactly once per attempt.

use std::sync::Arc;
use std::time::Duration;

use dbha_core::{
    Alert, Inventory, InventoryStatus, LogLevel, Notifier, StatusStore, SwitchError, SwitchLog,
    SwitchTicket, Switchable, TicketStatus, epoch_secs,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::PipelineError;
use crate::messages::{Admitted, SettleSender, settle};

/// Services the execution stage writes to.
#[derive(Clone)]
pub struct ExecuteServices {
    pub inventory: Arc<dyn Inventory>,
    pub status: Arc<dyn StatusStore>,
    pub notifier: Arc<dyn Notifier>,
}

pub struct ExecuteStage {
    services: ExecuteServices,
    open_ticket_window: Duration,
    settle_tx: SettleSender,
}

impl ExecuteStage {
    pub fn new(
        services: ExecuteServices,
        open_ticket_window: Duration,
        settle_tx: SettleSender,
    ) -> Self {
        Self {
            services,
            open_ticket_window,
            settle_tx,
        }
    }

    /// Mark the instance unavailable and open its ticket.
    pub async fn open(
        &self,
        switch: &dyn Switchable,
        note: &str,
    ) -> Result<SwitchTicket, PipelineError> {
        let id = switch.id();
        self.services
            .inventory
            .set_status(&id, InventoryStatus::Unavailable)
            .await?;

        let opened = self.ticket(switch, note).await;
        if let Err(PipelineError::Service(e)) = &opened {
            // Put the inventory back so the next report is not skipped as unavailable.
            let previous = switch.meta().status;
            if let Err(restore) = self.services.inventory.set_status(&id, previous).await {
                warn!(instance = %id, error = %e, %restore, "inventory status not restored");
            }
        }
        opened
    }

    async fn ticket(
        &self,
        switch: &dyn Switchable,
        note: &str,
    ) -> Result<SwitchTicket, PipelineError> {
        let id = switch.id();
        let since = epoch_secs().saturating_sub(self.open_ticket_window.as_secs());
        if let Some(open) = self.services.status.open_ticket(&id, since).await? {
            debug!(instance = %id, ticket = open.id, "ticket already open");
            return Err(PipelineError::TicketOpen(id.to_string()));
        }

        let mut ticket = SwitchTicket::open(switch.meta(), note, epoch_secs());
        ticket.id = self.services.status.create_ticket(&ticket).await?;
        Ok(ticket)
    }

    /// Alert on a failover that could not start and release its dedup entry
    /// so the next report retries it.
    async fn not_started(&self, switch: &dyn Switchable, reason: String) {
        let id = switch.id();
        error!(instance = %id, %reason, "failover not started");
        let alert = Alert::SwitchNotStarted {
            instance: switch.meta().clone(),
            reason,
        };
        self.services.notifier.notify(&alert).await;
        settle(&self.settle_tx, id).await;
    }

    /// Run GCM until shutdown or until GQA goes away. In-flight failovers
    /// are awaited before returning.
    pub async fn run(
        self,
        mut inbound: mpsc::Receiver<Admitted>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), PipelineError> {
        let mut failovers = JoinSet::new();

        info!("execution stage started");
        loop {
            tokio::select! {
                msg = inbound.recv() => {
                    let Some(Admitted { switch, note, ack }) = msg else { break };
                    let id = switch.id();
                    match self.open(switch.as_ref(), &note).await {
                        Ok(ticket) => {
                            info!(instance = %id, ticket = ticket.id, role = ?ticket.role, "switch ticket opened");
                            let _ = ack.send(Ok(ticket.id));
                            let services = self.services.clone();
                            let settle_tx = self.settle_tx.clone();
                            failovers.spawn(async move {
                                let ticket = run_failover(switch, ticket, &services).await;
                                settle(&settle_tx, ticket.instance_id()).await;
                                ticket
                            });
                        }
                        Err(e @ PipelineError::TicketOpen(_)) => {
                            info!(instance = %id, "failover already in progress");
                            let _ = ack.send(Err(e.to_string()));
                        }
                        Err(e) => {
                            let reason = e.to_string();
                            let _ = ack.send(Err(reason.clone()));
                            self.not_started(switch.as_ref(), reason).await;
                        }
                    }
                }
                Some(joined) = failovers.join_next() => {
                    if let Err(e) = joined {
                        error!(error = %e, "failover task failed");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        info!(in_flight = failovers.len(), "execution stage draining");
        while let Some(joined) = failovers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "failover task failed");
            }
        }
        info!("execution stage stopped");
        Ok(())
    }
}

/// Drive one failover to its terminal state and report it.
pub async fn run_failover(
    mut switch: Box<dyn Switchable>,
    mut ticket: SwitchTicket,
    services: &ExecuteServices,
) -> SwitchTicket {
    let audit = Audit {
        status: services.status.as_ref(),
    };

    let outcome = drive(switch.as_mut(), &ticket, &audit).await;
    let now = epoch_secs();
    let alert = match outcome {
        Ok(false) => {
            audit.log(&ticket, LogLevel::Success, "no need to switch").await;
            ticket.finish(TicketStatus::Success, "no need to switch", now);
            Alert::SwitchSucceeded {
                ticket: ticket.clone(),
            }
        }
        Ok(true) => {
            ticket.replica = switch.info().chosen_replica.clone();
            let result = match &ticket.replica {
                Some(replica) => format!("switched to {replica}"),
                None => "switched".to_string(),
            };
            audit.log(&ticket, LogLevel::Success, &result).await;
            ticket.finish(TicketStatus::Success, result, now);
            Alert::SwitchSucceeded {
                ticket: ticket.clone(),
            }
        }
        Err(e) => {
            let reason = e.to_string();
            audit.log(&ticket, LogLevel::Fail, &reason).await;
            match switch.rollback().await {
                Ok(()) => audit.log(&ticket, LogLevel::Info, "rolled back").await,
                Err(rb) => {
                    error!(ticket = ticket.id, error = %rb, "rollback failed");
                    audit
                        .log(&ticket, LogLevel::Fail, &format!("rollback: {rb}"))
                        .await;
                }
            }
            ticket.finish(TicketStatus::Failed, reason.clone(), now);
            Alert::SwitchFailed {
                ticket: ticket.clone(),
                reason,
            }
        }
    };

    if let Err(e) = services.status.update_ticket(&ticket).await {
        error!(ticket = ticket.id, status = ?ticket.status, error = %e, "terminal ticket write failed");
    }
    services.notifier.notify(&alert).await;
    info!(
        ticket = ticket.id,
        instance = %ticket.instance_id(),
        status = ?ticket.status,
        result = %ticket.switch_result,
        "failover finished"
    );
    ticket
}

/// `check → [do → update_meta]`; `Ok(false)` when no switch was needed.
async fn drive(
    switch: &mut dyn Switchable,
    ticket: &SwitchTicket,
    audit: &Audit<'_>,
) -> Result<bool, SwitchError> {
    switch.info_mut().double_check_note = Some(ticket.confirm_result.clone());

    audit.log(ticket, LogLevel::Info, "check switch").await;
    if !switch.check_switch().await? {
        return Ok(false);
    }
    audit.log(ticket, LogLevel::Info, "do switch").await;
    switch.do_switch().await?;
    audit.log(ticket, LogLevel::Info, "update meta").await;
    switch.update_meta().await?;
    Ok(true)
}

struct Audit<'a> {
    status: &'a dyn StatusStore,
}

impl Audit<'_> {
    async fn log(&self, ticket: &SwitchTicket, level: LogLevel, message: &str) {
        let line = SwitchLog::new(ticket, level, message);
        if let Err(e) = self.status.append_log(&line).await {
            warn!(ticket = ticket.id, error = %e, "switch log not written");
        }
    }
}
