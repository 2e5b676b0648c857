//! Timeout-guarded probing.
//!
//! A hung network call must not hold a stage past its own deadline. The
//! probe runs on a helper task; on deadline the task is detached rather
//! than aborted and exits once its own transport gives up.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::capability::Detectable;
use crate::error::ProbeError;
use crate::types::Status;

/// Run `target.probe()` on its own task and wait at most `deadline`.
pub async fn probe_with_deadline(
    target: Arc<dyn Detectable>,
    deadline: Duration,
) -> Result<Status, ProbeError> {
    let instance = target.id();
    let handle = tokio::spawn(async move { target.probe().await });

    match tokio::time::timeout(deadline, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => {
            warn!(%instance, error = %join_err, "probe task aborted");
            Err(ProbeError::Aborted(join_err.to_string()))
        }
        Err(_) => {
            // Dropping the JoinHandle detaches the task.
            warn!(%instance, ?deadline, "probe exceeded deadline, abandoning task");
            Err(ProbeError::Deadline(deadline))
        }
    }
}

/// Fold a probe outcome into a reportable status.
///
/// Errors that escape the engine's own classification only say the
/// engine did not answer.
pub fn classify(result: Result<Status, ProbeError>) -> Status {
    match result {
        Ok(status) => status,
        Err(e) => {
            debug!(error = %e, "probe error classified as db-check-failed");
            Status::DbCheckFailed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{InstanceMeta, InstanceRole, InventoryStatus};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Debug)]
    struct SlowProbe {
        meta: InstanceMeta,
        delay: Duration,
        finished: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Detectable for SlowProbe {
        fn meta(&self) -> &InstanceMeta {
            &self.meta
        }

        async fn probe(&self) -> Result<Status, ProbeError> {
            tokio::time::sleep(self.delay).await;
            self.finished.store(true, Ordering::SeqCst);
            Ok(Status::DbCheckOk)
        }
    }

    fn slow(delay: Duration, finished: Arc<AtomicBool>) -> Arc<dyn Detectable> {
        Arc::new(SlowProbe {
            meta: InstanceMeta {
                ip: "127.0.0.1".to_string(),
                port: 1,
                engine_type: "tcp".to_string(),
                app: String::new(),
                cluster: String::new(),
                cluster_type: String::new(),
                idc: String::new(),
                role: InstanceRole::Unknown,
                status: InventoryStatus::Unknown,
                domain: None,
            },
            delay,
            finished,
        })
    }

    #[tokio::test]
    async fn fast_probe_returns_its_status() {
        let done = Arc::new(AtomicBool::new(false));
        let result =
            probe_with_deadline(slow(Duration::from_millis(5), done), Duration::from_secs(1)).await;
        assert_eq!(result.unwrap(), Status::DbCheckOk);
    }

    #[tokio::test]
    async fn slow_probe_is_abandoned_not_killed() {
        let done = Arc::new(AtomicBool::new(false));
        let result = probe_with_deadline(
            slow(Duration::from_millis(200), done.clone()),
            Duration::from_millis(20),
        )
        .await;
        assert!(matches!(result, Err(ProbeError::Deadline(_))));
        assert!(!done.load(Ordering::SeqCst));

        // The detached task keeps running to completion.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(done.load(Ordering::SeqCst));
    }

    #[test]
    fn classify_maps_errors_to_db_check_failed() {
        assert_eq!(classify(Ok(Status::SshCheckFailed)), Status::SshCheckFailed);
        assert_eq!(
            classify(Err(ProbeError::Deadline(Duration::from_secs(1)))),
            Status::DbCheckFailed
        );
    }
}
