//! Recovery plans and protection groups
//!
//! Plans and groups are owned by an external definition service; the
//! orchestrator only reads them through [`PlanSource`].

use super::violation::Violation;
use crate::error::{FailoverError, FailoverResult};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

/// A set of replicated servers recovered together
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectionGroup {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub region: String,
    pub server_ids: BTreeSet<String>,
}

/// One wave of a recovery plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaveSpec {
    /// Unique, strictly increasing within a plan
    pub wave_number: u32,
    #[serde(default)]
    pub name: Option<String>,
    pub group_ids: Vec<String>,
    /// Prerequisite wave numbers
    #[serde(default)]
    pub depends_on: Vec<u32>,
    /// Halt for an operator before launching this wave
    #[serde(default)]
    pub pause_before: bool,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Ordered waves with prerequisites
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryPlan {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub waves: Vec<WaveSpec>,
}

/// A wave with its groups expanded to server ids
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedWave {
    pub spec: WaveSpec,
    /// Sorted, de-duplicated
    pub servers: Vec<String>,
}

/// A plan with every group reference expanded
#[derive(Debug, Clone)]
pub struct ResolvedPlan {
    pub plan: RecoveryPlan,
    pub waves: Vec<ResolvedWave>,
    /// Group lookup and region problems found while resolving
    pub issues: Vec<Violation>,
}

impl ResolvedPlan {
    pub fn wave(&self, wave_number: u32) -> Option<&ResolvedWave> {
        self.waves.iter().find(|w| w.spec.wave_number == wave_number)
    }

    pub fn all_servers(&self) -> BTreeSet<String> {
        self.waves
            .iter()
            .flat_map(|w| w.servers.iter().cloned())
            .collect()
    }
}

/// Read-only access to plan and group definitions
#[async_trait]
pub trait PlanSource: Send + Sync {
    async fn fetch_plan(&self, plan_id: &str) -> FailoverResult<RecoveryPlan>;
    async fn fetch_group(&self, group_id: &str) -> FailoverResult<ProtectionGroup>;
}

/// Expand every group of a plan, collecting unknown groups and region mismatches
pub async fn resolve_plan(
    source: &dyn PlanSource,
    plan_id: &str,
    target_region: &str,
) -> FailoverResult<ResolvedPlan> {
    let plan = source.fetch_plan(plan_id).await?;
    let mut waves = Vec::with_capacity(plan.waves.len());
    let mut issues = Vec::new();

    for spec in &plan.waves {
        let mut servers = BTreeSet::new();
        for group_id in &spec.group_ids {
            match source.fetch_group(group_id).await {
                Ok(group) => {
                    if group.region != target_region {
                        issues.push(Violation::RegionMismatch {
                            wave_number: spec.wave_number,
                            group_id: group_id.clone(),
                            group_region: group.region.clone(),
                            target_region: target_region.to_string(),
                        });
                    }
                    servers.extend(group.server_ids.iter().cloned());
                }
                Err(FailoverError::GroupNotFound(_)) => {
                    issues.push(Violation::UnknownGroup {
                        wave_number: spec.wave_number,
                        group_id: group_id.clone(),
                    });
                }
                Err(other) => return Err(other),
            }
        }
        waves.push(ResolvedWave {
            spec: spec.clone(),
            servers: servers.into_iter().collect(),
        });
    }

    Ok(ResolvedPlan {
        plan,
        waves,
        issues,
    })
}

/// In-memory plan source for drills, the CLI and tests
#[derive(Default)]
pub struct InMemoryPlanSource {
    plans: DashMap<String, RecoveryPlan>,
    groups: DashMap<String, ProtectionGroup>,
}

impl InMemoryPlanSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_plan(&self, plan: RecoveryPlan) {
        self.plans.insert(plan.id.clone(), plan);
    }

    pub fn insert_group(&self, group: ProtectionGroup) {
        self.groups.insert(group.id.clone(), group);
    }

    pub fn from_document(document: PlanDocument) -> Self {
        let source = Self::new();
        for group in document.groups {
            source.insert_group(group);
        }
        source.insert_plan(document.plan);
        source
    }
}

#[async_trait]
impl PlanSource for InMemoryPlanSource {
    async fn fetch_plan(&self, plan_id: &str) -> FailoverResult<RecoveryPlan> {
        self.plans
            .get(plan_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| FailoverError::PlanNotFound(plan_id.to_string()))
    }

    async fn fetch_group(&self, group_id: &str) -> FailoverResult<ProtectionGroup> {
        self.groups
            .get(group_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| FailoverError::GroupNotFound(group_id.to_string()))
    }
}

/// A plan together with the groups it references, as stored in a JSON file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanDocument {
    pub plan: RecoveryPlan,
    #[serde(default)]
    pub groups: Vec<ProtectionGroup>,
}

impl PlanDocument {
    pub fn load(path: impl AsRef<Path>) -> FailoverResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}
