//! Binding, §3.4.

use super::meta::Meta;
use crate::condition::{ConditionSet, PlacementConditionType};
use serde::{Deserialize, Serialize};

/// `Scheduled` = picked but not yet rolled out; `Bound` = rollout has
/// committed this resource snapshot; `Unscheduled` = no longer selected,
/// a candidate for deletion once the rollout controller clears it (§3.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BindingState {
    Scheduled,
    Bound,
    Unscheduled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindingSpec {
    pub target_cluster: String,
    pub scheduling_policy_snapshot_name: String,
    pub resource_snapshot_name: String,
    pub cluster_resource_override_snapshots: Vec<String>,
    pub resource_override_snapshots: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BindingStatus {
    pub conditions: ConditionSet<PlacementConditionType>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Binding {
    pub meta: Meta,
    pub spec: BindingSpec,
    pub state: BindingState,
    pub status: BindingStatus,
}

impl Binding {
    pub fn name_for(placement_name: &str, cluster_name: &str) -> String {
        format!("{placement_name}-{cluster_name}")
    }

    pub fn is_ready_since(
        &self,
        now: &k8s_openapi::apimachinery::pkg::apis::meta::v1::Time,
        unavailable_period_seconds: u32,
    ) -> bool {
        let Some(available) = self.status.conditions.get(PlacementConditionType::Available) else {
            return false;
        };
        if !available.status.is_true() {
            return false;
        }
        let Some(since) = &available.last_transition_time else {
            return false;
        };
        let elapsed = now.0.signed_duration_since(since.0);
        elapsed.num_seconds() >= i64::from(unavailable_period_seconds)
    }
}
