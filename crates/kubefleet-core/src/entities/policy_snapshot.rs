//! Policy snapshot, §3.2.

use super::meta::Meta;
use super::policy::{ClusterAffinity, Policy, Toleration, TopologySpreadConstraint};
use crate::condition::{ConditionSet, PolicySnapshotConditionType};
use serde::{Deserialize, Serialize};

/// The normalised scheduling policy captured at some placement
/// generation. `policy` still carries `PickN`'s `numberOfClusters`
/// in-struct for convenience, but §4.2 requires the *hash* to ignore that
/// field — see `kubefleet_controller::snapshot::policy_hash`, which is
/// the one place that distinction is enforced, so a `PickN` count bump
/// alone never creates a new snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySnapshotSpec {
    pub policy: Policy,
    pub cluster_affinity: Option<ClusterAffinity>,
    pub topology_spread_constraints: Vec<TopologySpreadConstraint>,
    pub tolerations: Vec<Toleration>,
}

/// One row of `status.clusterDecisions` (§3.2): the scheduler's verdict
/// for one cluster, in the stable order the framework produced it in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterDecision {
    pub cluster_name: String,
    pub selected: bool,
    pub score: Option<i64>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicySnapshotStatus {
    pub conditions: ConditionSet<PolicySnapshotConditionType>,
    pub cluster_decisions: Vec<ClusterDecision>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySnapshot {
    pub meta: Meta,
    /// Monotonically increasing per placement; at most one snapshot per
    /// placement carries `is_latest` (§3.2, §8 invariant 1).
    pub index: u64,
    pub is_latest: bool,
    /// Content hash of the normalised policy (§4.2); stored as a string
    /// so equality checks don't need to recompute it.
    pub policy_hash: String,
    pub observed_placement_generation: i64,
    /// `numberOfClusters` at snapshot-refresh time; an annotation rather
    /// than part of the hashed spec so that changing it alone reuses the
    /// existing snapshot (§4.2).
    pub number_of_clusters: Option<u32>,
    pub spec: PolicySnapshotSpec,
    pub status: PolicySnapshotStatus,
}

impl PolicySnapshot {
    pub fn name_for(placement_name: &str, index: u64) -> String {
        format!("{placement_name}-{index}")
    }
}
