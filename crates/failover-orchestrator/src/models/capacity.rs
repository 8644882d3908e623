//! Point-in-time capacity snapshots and status classification

use super::execution::AccountContext;
use crate::config::{CapacityThresholds, ServiceQuotas};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Capacity status, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CapacityStatus {
    Ok,
    Info,
    Warning,
    Critical,
}

impl CapacityStatus {
    /// Classify a utilisation percentage
    pub fn from_percent(percent: f64, thresholds: &CapacityThresholds) -> Self {
        if percent >= thresholds.critical_percent {
            Self::Critical
        } else if percent >= thresholds.warning_percent {
            Self::Warning
        } else if percent >= thresholds.info_percent {
            Self::Info
        } else {
            Self::Ok
        }
    }
}

/// Replication service usage for one account and region
///
/// Never cached: the replication service is the source of truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacitySnapshot {
    pub account: AccountContext,
    pub total_servers: usize,
    pub replicating_servers: usize,
    pub active_jobs: usize,
    pub servers_in_active_jobs: usize,
    pub captured_at: DateTime<Utc>,
}

impl CapacitySnapshot {
    /// Highest usage across the quota dimensions, in percent
    pub fn utilization_percent(&self, quotas: &ServiceQuotas) -> f64 {
        let ratios = [
            ratio(self.replicating_servers, quotas.max_replicating_servers),
            ratio(self.active_jobs, quotas.max_concurrent_jobs),
            ratio(self.servers_in_active_jobs, quotas.max_servers_in_all_jobs),
        ];
        ratios.into_iter().fold(0.0, f64::max) * 100.0
    }

    pub fn status(&self, quotas: &ServiceQuotas, thresholds: &CapacityThresholds) -> CapacityStatus {
        CapacityStatus::from_percent(self.utilization_percent(quotas), thresholds)
    }
}

fn ratio(used: usize, limit: usize) -> f64 {
    if limit == 0 {
        return 1.0;
    }
    used as f64 / limit as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(replicating: usize, jobs: usize, in_jobs: usize) -> CapacitySnapshot {
        CapacitySnapshot {
            account: AccountContext::new("111", "us-east-1"),
            total_servers: replicating,
            replicating_servers: replicating,
            active_jobs: jobs,
            servers_in_active_jobs: in_jobs,
            captured_at: Utc::now(),
        }
    }

    #[test]
    fn test_threshold_boundaries() {
        let t = CapacityThresholds::default();
        assert_eq!(CapacityStatus::from_percent(79.9, &t), CapacityStatus::Ok);
        assert_eq!(CapacityStatus::from_percent(80.0, &t), CapacityStatus::Info);
        assert_eq!(CapacityStatus::from_percent(90.0, &t), CapacityStatus::Warning);
        assert_eq!(CapacityStatus::from_percent(100.0, &t), CapacityStatus::Critical);
        assert_eq!(CapacityStatus::from_percent(140.0, &t), CapacityStatus::Critical);
    }

    #[test]
    fn test_utilization_uses_worst_dimension() {
        let quotas = ServiceQuotas::default();
        // 30/300 replicating, 18/20 jobs, 50/500 in jobs -> jobs dominate at 90%
        let snap = snapshot(30, 18, 50);
        assert!((snap.utilization_percent(&quotas) - 90.0).abs() < 1e-9);
        assert_eq!(
            snap.status(&quotas, &CapacityThresholds::default()),
            CapacityStatus::Warning
        );
    }

    #[test]
    fn test_status_ordering_is_worst_last() {
        let mut statuses = vec![
            CapacityStatus::Warning,
            CapacityStatus::Ok,
            CapacityStatus::Critical,
            CapacityStatus::Info,
        ];
        statuses.sort();
        assert_eq!(statuses.last(), Some(&CapacityStatus::Critical));
        assert_eq!(statuses.first(), Some(&CapacityStatus::Ok));
    }
}
