//! Placement, §3.1.

use super::meta::Meta;
use super::policy::{ClusterAffinity, DeletePolicy, Policy, Toleration, TopologySpreadConstraint};
use super::policy::RolloutStrategy;
use super::selector::ResourceSelector;
use crate::condition::{ConditionSet, PlacementConditionType};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementSpec {
    pub resource_selectors: Vec<ResourceSelector>,
    pub policy: Option<Policy>,
    pub cluster_affinity: Option<ClusterAffinity>,
    pub topology_spread_constraints: Vec<TopologySpreadConstraint>,
    pub tolerations: Vec<Toleration>,
    pub strategy: RolloutStrategy,
    pub revision_history_limit: u32,
    pub delete_policy: DeletePolicy,
}

impl Default for PlacementSpec {
    fn default() -> Self {
        Self {
            resource_selectors: Vec::new(),
            policy: None,
            cluster_affinity: None,
            topology_spread_constraints: Vec::new(),
            tolerations: Vec::new(),
            strategy: RolloutStrategy::default(),
            revision_history_limit: 10,
            delete_policy: DeletePolicy::Delete,
        }
    }
}

impl PlacementSpec {
    /// The effective policy; an absent `policy` defaults to `PickAll`
    /// (§3.1 "`policy` (optional)").
    pub fn effective_policy(&self) -> Policy {
        self.policy.clone().unwrap_or(Policy::PickAll)
    }
}

/// One cluster's entry in `status.placementStatuses` (§3.1).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterPlacementStatus {
    pub cluster_name: String,
    pub conditions: ConditionSet<PlacementConditionType>,
    /// Set on "failed-to-schedule phantom entries" (§4.3.1) — the
    /// scheduler's per-cluster rejection reason for this decision, if it
    /// was considered and rejected rather than simply not yet evaluated.
    pub scheduler_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlacementStatus {
    pub conditions: ConditionSet<PlacementConditionType>,
    pub observed_resource_index: Option<String>,
    pub selected_resources: Vec<String>,
    pub placement_statuses: Vec<ClusterPlacementStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Placement {
    pub meta: Meta,
    pub spec: PlacementSpec,
    pub status: PlacementStatus,
}

impl Placement {
    pub fn key(&self) -> super::meta::PlacementKey {
        self.meta.key()
    }

    pub fn report_diff(&self) -> bool {
        self.spec
            .strategy
            .apply_strategy()
            .map(|s| s.is_report_diff())
            .unwrap_or(false)
    }
}
