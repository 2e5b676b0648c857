//! Re-verification stage (GMM).
//!
//! Every machine-level failure is re-probed from the controller before
//! anything is switched, so a partition between one detector and its
//! hosts cannot trigger a failover on its own.

use std::sync::Arc;
use std::time::Duration;

use dbha_core::probe::probe_with_deadline;
use dbha_core::{Alert, DetectionReport, Notifier, ProbeError, Status};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::PipelineError;
use crate::messages::{Confirmed, Suspect};

/// What the controller's own probe says about a suspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Judgement {
    /// The engine answered; the detector saw a local problem.
    Recovered,
    /// Only the engine is down; a machine failover cannot help.
    EngineDown,
    /// The host is unreachable from here too.
    Confirmed,
    /// Credentials are rejected; alert without switching.
    AuthFailure,
    /// The re-probe never finished. Nothing reached the host from here
    /// either, so this goes on to admission like `Confirmed`.
    Unanswered,
}

pub fn judge(reprobe: Status) -> Judgement {
    match reprobe {
        Status::DbCheckOk => Judgement::Recovered,
        Status::DbCheckFailed | Status::SshCheckOk => Judgement::EngineDown,
        Status::SshCheckFailed => Judgement::Confirmed,
        Status::AuthCheckFailed => Judgement::AuthFailure,
    }
}

/// Judge a raw re-probe outcome. A missed deadline or a dead probe task
/// says nothing about SSH, so it must not fold into `EngineDown`.
pub fn judge_outcome(outcome: &Result<Status, ProbeError>) -> Judgement {
    match outcome {
        Ok(status) => judge(*status),
        Err(ProbeError::Deadline(_) | ProbeError::Aborted(_)) => Judgement::Unanswered,
        Err(_) => Judgement::EngineDown,
    }
}

pub struct VerifyStage {
    controller_ip: String,
    reprobe_timeout: Duration,
    notifier: Arc<dyn Notifier>,
}

impl VerifyStage {
    pub fn new(
        controller_ip: impl Into<String>,
        reprobe_timeout: Duration,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            controller_ip: controller_ip.into(),
            reprobe_timeout,
            notifier,
        }
    }

    /// Re-probe one suspect and decide whether it goes on to admission.
    pub async fn verify(&self, suspect: Suspect) -> Option<Confirmed> {
        let Suspect { report, detectable } = suspect;
        let id = report.id();
        match report.status {
            Status::SshCheckFailed | Status::AuthCheckFailed => {}
            Status::DbCheckOk | Status::DbCheckFailed | Status::SshCheckOk => {
                debug!(instance = %id, status = %report.status, "not a failover candidate");
                return None;
            }
        }

        let outcome = probe_with_deadline(detectable, self.reprobe_timeout).await;
        let judgement = judge_outcome(&outcome);
        let reprobe = match outcome {
            Ok(status) => status.to_string(),
            Err(e) => e.to_string(),
        };
        match judgement {
            Judgement::Recovered => {
                info!(instance = %id, reported = %report.status, "instance answers the controller, ignoring report");
                None
            }
            Judgement::EngineDown => {
                info!(instance = %id, reported = %report.status, %reprobe, "engine down but host reachable, no failover");
                None
            }
            Judgement::AuthFailure => {
                warn!(instance = %id, "authentication rejected on re-probe");
                self.alert_auth(report).await;
                None
            }
            Judgement::Confirmed => {
                let note = format!(
                    "{} reported {}, controller {} re-probe: {}",
                    report.idc, report.status, self.controller_ip, reprobe
                );
                info!(instance = %id, %note, "failure confirmed");
                Some(Confirmed { report, note })
            }
            Judgement::Unanswered => {
                let note = format!(
                    "{} reported {}, controller {} re-probe unanswered: {}",
                    report.idc, report.status, self.controller_ip, reprobe
                );
                error!(instance = %id, timeout = ?self.reprobe_timeout, %note, "re-probe gave no answer, treating host as unreachable");
                Some(Confirmed { report, note })
            }
        }
    }

    async fn alert_auth(&self, report: DetectionReport) {
        self.notifier.notify(&Alert::AuthFailure { report }).await;
    }

    /// Run GMM until shutdown or until GDM goes away. Each suspect is
    /// re-probed on its own task.
    pub async fn run(
        self,
        mut inbound: mpsc::Receiver<Suspect>,
        out: mpsc::Sender<Confirmed>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), PipelineError> {
        let stage = Arc::new(self);
        let mut tasks = JoinSet::new();

        info!("re-verification stage started");
        loop {
            tokio::select! {
                msg = inbound.recv() => {
                    let Some(suspect) = msg else { break };
                    let stage = Arc::clone(&stage);
                    let out = out.clone();
                    tasks.spawn(async move {
                        if let Some(confirmed) = stage.verify(suspect).await
                            && out.send(confirmed).await.is_err()
                        {
                            debug!("admission queue closed, confirmation dropped");
                        }
                    });
                }
                Some(joined) = tasks.join_next() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "re-probe task failed");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        info!(in_flight = tasks.len(), "re-verification stage shutting down");
        tasks.shutdown().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn judgement_covers_every_status() {
        assert_eq!(judge(Status::DbCheckOk), Judgement::Recovered);
        assert_eq!(judge(Status::DbCheckFailed), Judgement::EngineDown);
        assert_eq!(judge(Status::SshCheckOk), Judgement::EngineDown);
        assert_eq!(judge(Status::SshCheckFailed), Judgement::Confirmed);
        assert_eq!(judge(Status::AuthCheckFailed), Judgement::AuthFailure);
    }

    #[test]
    fn unfinished_recheck_is_not_engine_down() {
        let deadline = Err(ProbeError::Deadline(Duration::from_secs(15)));
        assert_eq!(judge_outcome(&deadline), Judgement::Unanswered);
        let aborted = Err(ProbeError::Aborted("panicked".into()));
        assert_eq!(judge_outcome(&aborted), Judgement::Unanswered);
        let refused = Err(ProbeError::Connect("refused".into()));
        assert_eq!(judge_outcome(&refused), Judgement::EngineDown);
        assert_eq!(judge_outcome(&Ok(Status::SshCheckFailed)), Judgement::Confirmed);
    }
}
