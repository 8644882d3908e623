//! Cross-account capacity aggregation
//!
//! One capacity query per account/region, run concurrently through a
//! bounded pool with a per-query timeout. A failed or slow region is
//! reported and excluded; it never fails the whole aggregation.

use crate::config::{AggregatorConfig, ServiceQuotas};
use crate::models::capacity::{CapacitySnapshot, CapacityStatus};
use crate::models::execution::AccountContext;
use crate::replication::ReplicationAdapter;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// One region's snapshot with its classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountCapacity {
    pub snapshot: CapacitySnapshot,
    pub utilization_percent: f64,
    pub status: CapacityStatus,
}

/// A region whose query failed or timed out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedQuery {
    pub account: AccountContext,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacityReport {
    /// Keyed by `account/region`
    pub per_account: BTreeMap<String, AccountCapacity>,
    pub failed: Vec<FailedQuery>,
    /// Worst status among regions that answered, `None` if none did
    pub overall: Option<CapacityStatus>,
    pub queried_at: DateTime<Utc>,
}

impl CapacityReport {
    pub fn failed_accounts(&self) -> Vec<&AccountContext> {
        self.failed.iter().map(|f| &f.account).collect()
    }
}

#[derive(Clone)]
pub struct CapacityAggregator {
    adapter: ReplicationAdapter,
    quotas: ServiceQuotas,
    config: AggregatorConfig,
}

impl CapacityAggregator {
    pub fn new(adapter: ReplicationAdapter, quotas: ServiceQuotas, config: AggregatorConfig) -> Self {
        Self {
            adapter,
            quotas,
            config,
        }
    }

    pub async fn aggregate(&self, accounts: &[AccountContext]) -> CapacityReport {
        let permits = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let timeout = self.config.query_timeout();

        let queries = accounts.iter().map(|account| {
            let permits = Arc::clone(&permits);
            async move {
                let _permit = match permits.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (account, Err("query pool closed".to_string())),
                };
                let result = match tokio::time::timeout(timeout, self.adapter.capacity_snapshot(account)).await {
                    Ok(Ok(snapshot)) => Ok(snapshot),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(_) => Err(format!("timed out after {}ms", timeout.as_millis())),
                };
                (account, result)
            }
        });

        let mut per_account = BTreeMap::new();
        let mut failed = Vec::new();
        for (account, result) in join_all(queries).await {
            match result {
                Ok(snapshot) => {
                    let utilization_percent = snapshot.utilization_percent(&self.quotas);
                    let status = CapacityStatus::from_percent(utilization_percent, &self.config.thresholds);
                    debug!(account = %account, utilization_percent, ?status, "capacity queried");
                    per_account.insert(
                        account.key(),
                        AccountCapacity {
                            snapshot,
                            utilization_percent,
                            status,
                        },
                    );
                }
                Err(reason) => {
                    warn!(account = %account, reason = %reason, "capacity query failed");
                    failed.push(FailedQuery {
                        account: account.clone(),
                        reason,
                    });
                }
            }
        }

        let overall = per_account.values().map(|c| c.status).max();
        CapacityReport {
            per_account,
            failed,
            overall,
            queried_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::replication::{RetryPolicy, SimulatedReplicationService};

    fn adapter(sim: Arc<SimulatedReplicationService>) -> ReplicationAdapter {
        ReplicationAdapter::new(
            sim,
            RetryPolicy::new(RetryConfig {
                max_attempts: 1,
                base_delay_ms: 1,
                max_delay_ms: 1,
                backoff_multiplier: 1.0,
                jitter_factor: 0.0,
            }),
        )
    }

    #[tokio::test]
    async fn test_empty_account_list() {
        let sim = Arc::new(SimulatedReplicationService::new());
        let aggregator = CapacityAggregator::new(adapter(sim), ServiceQuotas::default(), AggregatorConfig::default());
        let report = aggregator.aggregate(&[]).await;
        assert!(report.per_account.is_empty());
        assert!(report.failed.is_empty());
        assert_eq!(report.overall, None);
    }

    #[tokio::test]
    async fn test_unreachable_region_reported_with_reason() {
        let sim = Arc::new(SimulatedReplicationService::new());
        let good = AccountContext::new("111", "us-east-1");
        let bad = AccountContext::new("222", "us-west-2");
        sim.add_healthy_servers(&good, &["s-1"]);
        sim.set_unreachable(&bad, true);

        let aggregator = CapacityAggregator::new(adapter(sim), ServiceQuotas::default(), AggregatorConfig::default());
        let report = aggregator.aggregate(&[good.clone(), bad.clone()]).await;
        assert!(report.per_account.contains_key(&good.key()));
        assert_eq!(report.failed_accounts(), vec![&bad]);
        assert!(report.failed[0].reason.contains("Retries exhausted"));
        assert_eq!(report.overall, Some(CapacityStatus::Ok));
    }

    #[tokio::test]
    async fn test_concurrency_bound_of_one_still_answers_all() {
        let sim = Arc::new(SimulatedReplicationService::new());
        let accounts: Vec<_> = (0..5)
            .map(|i| AccountContext::new(format!("acct-{i}"), "eu-west-1"))
            .collect();
        for account in &accounts {
            sim.add_healthy_servers(account, &["s-1"]);
        }
        let config = AggregatorConfig {
            max_concurrency: 1,
            ..Default::default()
        };
        let aggregator = CapacityAggregator::new(adapter(sim), ServiceQuotas::default(), config);
        let report = aggregator.aggregate(&accounts).await;
        assert_eq!(report.per_account.len(), 5);
    }
}
