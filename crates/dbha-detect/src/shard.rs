//! Agent workload sharding.
//!
//! Every live detector of one (failure domain, engine type) pair sees the
//! same roster, sorted by ip. A detector's shard is `(modulus, index)`
//! where `modulus` is the roster length and `index` its own position. It
//! owns an instance iff `crc32(ip) mod modulus == index`, so all instances
//! of one host land on one detector, and only the lowest port of each
//! host is probed.

use std::collections::BTreeMap;

use dbha_core::{Heartbeat, InstanceMeta};

use crate::error::ShardError;

/// Bucket of `ip` among `modulus` detectors.
pub fn bucket(ip: &str, modulus: usize) -> usize {
    crc32fast::hash(ip.as_bytes()) as usize % modulus
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardAssignment {
    pub modulus: usize,
    pub index: usize,
}

impl ShardAssignment {
    /// Locate `self_ip` in `roster`.
    ///
    /// The roster is re-sorted by ip here so the result does not depend on
    /// the order the status service returned it in.
    pub fn from_roster(
        roster: &[Heartbeat],
        self_ip: &str,
        engine_type: &str,
    ) -> Result<Self, ShardError> {
        let mut ips: Vec<&str> = roster.iter().map(|b| b.ip.as_str()).collect();
        ips.sort_unstable();

        let count = ips.iter().filter(|ip| **ip == self_ip).count();
        match count {
            0 => Err(ShardError::NotInRoster {
                ip: self_ip.to_string(),
                engine_type: engine_type.to_string(),
            }),
            1 => {
                let index = ips.iter().position(|ip| *ip == self_ip).unwrap_or_default();
                Ok(Self {
                    modulus: ips.len(),
                    index,
                })
            }
            count => Err(ShardError::Duplicate {
                ip: self_ip.to_string(),
                engine_type: engine_type.to_string(),
                count,
            }),
        }
    }

    pub fn owns(&self, ip: &str) -> bool {
        bucket(ip, self.modulus) == self.index
    }

    /// Owned instances, one per host (the lowest port), ordered by ip.
    pub fn select(&self, instances: Vec<InstanceMeta>) -> Vec<InstanceMeta> {
        let mut per_host: BTreeMap<String, InstanceMeta> = BTreeMap::new();
        for meta in instances.into_iter().filter(|m| self.owns(&m.ip)) {
            match per_host.get(&meta.ip) {
                Some(kept) if kept.port <= meta.port => {}
                _ => {
                    per_host.insert(meta.ip.clone(), meta);
                }
            }
        }
        per_host.into_values().collect()
    }
}
