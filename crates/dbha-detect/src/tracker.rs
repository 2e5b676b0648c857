//! Report throttling.
//!
//! A status is shipped when it differs from the last one shipped for the
//! same instance, or when `report_interval` has elapsed since then.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use dbha_core::{InstanceId, Status};

#[derive(Debug)]
pub struct ReportTracker {
    interval: Duration,
    last: HashMap<InstanceId, (Status, Instant)>,
}

impl ReportTracker {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: HashMap::new(),
        }
    }

    pub fn should_report(&self, id: &InstanceId, status: Status, now: Instant) -> bool {
        match self.last.get(id) {
            Some((shipped, at)) => *shipped != status || now.duration_since(*at) >= self.interval,
            None => true,
        }
    }

    /// Remember a successfully shipped report.
    pub fn record(&mut self, id: InstanceId, status: Status, now: Instant) {
        self.last.insert(id, (status, now));
    }

    /// Forget instances this detector no longer owns.
    pub fn retain(&mut self, owned: &HashSet<InstanceId>) {
        self.last.retain(|id, _| owned.contains(id));
    }

    pub fn len(&self) -> usize {
        self.last.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_or_interval_triggers_report() {
        let mut tracker = ReportTracker::new(Duration::from_secs(60));
        let id = InstanceId::new("10.0.0.1", 3306);
        let t0 = Instant::now();

        assert!(tracker.should_report(&id, Status::DbCheckOk, t0));
        tracker.record(id.clone(), Status::DbCheckOk, t0);

        assert!(!tracker.should_report(&id, Status::DbCheckOk, t0 + Duration::from_secs(10)));
        assert!(tracker.should_report(&id, Status::SshCheckFailed, t0 + Duration::from_secs(10)));
        assert!(tracker.should_report(&id, Status::DbCheckOk, t0 + Duration::from_secs(60)));
    }

    #[test]
    fn retain_drops_unowned() {
        let mut tracker = ReportTracker::new(Duration::from_secs(60));
        let kept = InstanceId::new("10.0.0.1", 3306);
        let gone = InstanceId::new("10.0.0.2", 3306);
        let now = Instant::now();
        tracker.record(kept.clone(), Status::DbCheckOk, now);
        tracker.record(gone, Status::DbCheckOk, now);

        tracker.retain(&[kept].into_iter().collect());
        assert_eq!(tracker.len(), 1);
    }
}
