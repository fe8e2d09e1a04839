//! Placement policy and strategy types, §3.1.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde::{Deserialize, Serialize};
use strum::Display;

/// Where the placement's selected resources should run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Policy {
    /// Every matching (eligible) cluster.
    PickAll,
    /// The best `number_of_clusters` clusters by score.
    PickN { number_of_clusters: u32 },
    /// Exactly these clusters.
    PickFixed { cluster_names: Vec<String> },
}

impl Policy {
    pub fn is_pick_all(&self) -> bool {
        matches!(self, Policy::PickAll)
    }

    pub fn is_pick_fixed(&self) -> bool {
        matches!(self, Policy::PickFixed { .. })
    }

    /// The desired cluster count used by rollout surge/unavailability
    /// arithmetic (§4.5 step 1) and by disruption-budget arithmetic
    /// (§4.7): `numberOfClusters` for `PickN`, the current eligible total
    /// for `PickAll`/`PickFixed` (passed in by the caller, who alone knows
    /// the current eligible set).
    pub fn desired(&self, eligible_count: usize) -> usize {
        match self {
            Policy::PickAll => eligible_count,
            Policy::PickN { number_of_clusters } => *number_of_clusters as usize,
            Policy::PickFixed { cluster_names } => cluster_names.len(),
        }
    }
}

/// Required/preferred cluster affinity terms. Left generic over a label
/// selector plus an optional weight for the preferred case, mirroring the
/// Kubernetes node-affinity shape that `stackable-operator`'s `commons`
/// module already generalises for pods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ClusterAffinity {
    pub required_during_scheduling: Vec<LabelSelector>,
    pub preferred_during_scheduling: Vec<PreferredClusterSelector>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferredClusterSelector {
    pub weight: i32,
    pub selector: LabelSelector,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologySpreadConstraint {
    pub topology_key: String,
    pub max_skew: u32,
    pub when_unsatisfiable: TopologySpreadWhenUnsatisfiable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TopologySpreadWhenUnsatisfiable {
    DoNotSchedule,
    ScheduleAnyway,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toleration {
    pub key: Option<String>,
    pub operator: TolerationOperator,
    pub value: Option<String>,
    pub effect: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TolerationOperator {
    Exists,
    Equal,
}

/// How a binding's resources get applied to the member cluster (§3.1,
/// §6). Carried as an annotation on the emitted work bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum ApplyStrategy {
    ClientSideApply,
    ServerSideApply,
    ReportDiff,
}

impl ApplyStrategy {
    pub fn is_report_diff(self) -> bool {
        matches!(self, ApplyStrategy::ReportDiff)
    }
}

/// Whether rollout is driven by the rolling-update algorithm of §4.5 or by
/// an out-of-band controller (§3.1 "External").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RolloutStrategy {
    RollingUpdate {
        max_unavailable: IntOrString,
        max_surge: IntOrString,
        unavailable_period_seconds: u32,
        apply_strategy: ApplyStrategy,
    },
    External,
}

impl RolloutStrategy {
    pub fn apply_strategy(&self) -> Option<ApplyStrategy> {
        match self {
            RolloutStrategy::RollingUpdate { apply_strategy, .. } => Some(*apply_strategy),
            RolloutStrategy::External => None,
        }
    }

    pub fn is_external(&self) -> bool {
        matches!(self, RolloutStrategy::External)
    }
}

impl Default for RolloutStrategy {
    fn default() -> Self {
        RolloutStrategy::RollingUpdate {
            max_unavailable: IntOrString::String("25%".to_string()),
            max_surge: IntOrString::String("25%".to_string()),
            unavailable_period_seconds: 60,
            apply_strategy: ApplyStrategy::ClientSideApply,
        }
    }
}

/// Governs whether bindings/snapshots/work survive placement deletion
/// (§3.1, §3 "Ownership and lifetimes").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DeletePolicy {
    #[default]
    Delete,
    Keep,
}

/// A placement's disruption budget (§3.6): exactly one of the two fields
/// is set. Percentages are illegal for `PickAll` (validated in
/// `kubefleet-controller::eviction`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DisruptionBudget {
    pub min_available: Option<IntOrString>,
    pub max_unavailable: Option<IntOrString>,
}

impl DisruptionBudget {
    pub fn is_percentage_based(&self) -> bool {
        matches!(self.min_available, Some(IntOrString::String(_)))
            || matches!(self.max_unavailable, Some(IntOrString::String(_)))
    }
}

/// Resolve an `IntOrString` against `total` the way `kube-scheduler`'s own
/// `intstr.GetScaledValueFromIntOrPercent` does: a literal int passes
/// through, a `"N%"` string is scaled by `total` and rounded (§4.5 step 2,
/// §4.7). Malformed percentage strings resolve to 0 rather than panicking —
/// validation of the string shape happens where the object is admitted, not
/// here.
pub fn resolve_int_or_string(value: &IntOrString, total: u32, round_up: bool) -> i64 {
    match value {
        IntOrString::Int(n) => i64::from(*n),
        IntOrString::String(s) => {
            let Some(digits) = s.strip_suffix('%') else {
                return 0;
            };
            let Ok(percent) = digits.parse::<i64>() else {
                return 0;
            };
            let scaled = percent * i64::from(total);
            if round_up {
                (scaled + 99) / 100
            } else {
                scaled / 100
            }
        }
    }
}
