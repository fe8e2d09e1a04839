//! The scheduler, §4.4: a pluggable filter/score/select framework run
//! against the fleet's member clusters, plus the diff-against-bindings
//! step and placement-deletion binding cleanup.
//!
//! Plugins are trait objects registered once per process, mirroring
//! Kubernetes' own `kube-scheduler` framework shape (PreFilter/Filter/
//! PreScore/Score/Select extension points) rather than a fixed pipeline —
//! this is the "scheduler plugin registry" design note of §9.

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement, Time};
use kubefleet_core::condition::{Condition, ConditionStatus, PolicySnapshotConditionType};
use kubefleet_core::entities::{
    Binding, BindingSpec, BindingState, BindingStatus, ClusterDecision, Meta, MemberCluster, Placement,
    Policy, PolicySnapshot, SCHEDULER_BINDING_CLEANUP_FINALIZER,
};
use kubefleet_core::labels::{OWNER_PLACEMENT_LABEL, TARGET_CLUSTER_LABEL};
use kubefleet_core::store::{ListOptions, ObjectKey, ObjectStore, StoreError};
use kubefleet_core::Error;
use std::collections::HashMap;
use tracing::{info, warn};

/// Shared scratch space a `PreFilter` plugin may populate for `Filter`/
/// `Score` plugins to read back, keyed by plugin name so unrelated
/// plugins cannot collide.
#[derive(Debug, Default)]
pub struct CycleState {
    values: HashMap<String, String>,
}

impl CycleState {
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

/// Either the cluster is eligible, or it is rejected with a reason shown
/// verbatim in per-cluster status (§4.4 "a rejection carries a reason
/// string shown in per-cluster status").
pub type FilterResult = Result<(), String>;

pub trait PreFilterPlugin: Send + Sync {
    fn name(&self) -> &'static str;
    fn pre_filter(&self, placement: &Placement, state: &mut CycleState);
}

pub trait FilterPlugin: Send + Sync {
    fn name(&self) -> &'static str;
    fn filter(&self, placement: &Placement, cluster: &MemberCluster, state: &CycleState) -> FilterResult;
}

pub trait PreScorePlugin: Send + Sync {
    fn name(&self) -> &'static str;
    fn pre_score(&self, placement: &Placement, eligible: &[&MemberCluster], state: &mut CycleState);
}

/// A plugin's raw score for one cluster, combined with its weight by the
/// framework (§4.4 "the framework combines scores with per-plugin
/// weights").
pub trait ScorePlugin: Send + Sync {
    fn name(&self) -> &'static str;
    fn weight(&self) -> i64 {
        1
    }
    fn score(&self, placement: &Placement, cluster: &MemberCluster, state: &CycleState) -> i64;
}

#[derive(Default)]
pub struct SchedulingFramework {
    pre_filter: Vec<Box<dyn PreFilterPlugin>>,
    filter: Vec<Box<dyn FilterPlugin>>,
    pre_score: Vec<Box<dyn PreScorePlugin>>,
    score: Vec<Box<dyn ScorePlugin>>,
}

impl SchedulingFramework {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pre_filter(mut self, plugin: Box<dyn PreFilterPlugin>) -> Self {
        self.pre_filter.push(plugin);
        self
    }

    pub fn with_filter(mut self, plugin: Box<dyn FilterPlugin>) -> Self {
        self.filter.push(plugin);
        self
    }

    pub fn with_pre_score(mut self, plugin: Box<dyn PreScorePlugin>) -> Self {
        self.pre_score.push(plugin);
        self
    }

    pub fn with_score(mut self, plugin: Box<dyn ScorePlugin>) -> Self {
        self.score.push(plugin);
        self
    }

    /// Run PreFilter → Filter → PreScore → Score over `clusters`, returning
    /// every cluster paired with either its combined score or its
    /// rejection reason (the first filter to reject wins).
    fn run(&self, placement: &Placement, clusters: &[MemberCluster]) -> Vec<(String, Result<i64, String>)> {
        let mut state = CycleState::default();
        for plugin in &self.pre_filter {
            plugin.pre_filter(placement, &mut state);
        }

        let mut survivors = Vec::new();
        let mut results = Vec::new();
        for cluster in clusters {
            let mut rejection = None;
            for plugin in &self.filter {
                if let Err(reason) = plugin.filter(placement, cluster, &state) {
                    rejection = Some(format!("{}: {reason}", plugin.name()));
                    break;
                }
            }
            match rejection {
                Some(reason) => results.push((cluster.name.clone(), Err(reason))),
                None => survivors.push(cluster),
            }
        }

        for plugin in &self.pre_score {
            plugin.pre_score(placement, &survivors, &mut state);
        }

        for cluster in survivors {
            let total: i64 = self
                .score
                .iter()
                .map(|plugin| plugin.score(placement, cluster, &state) * plugin.weight())
                .sum();
            results.push((cluster.name.clone(), Ok(total)));
        }

        results
    }
}

/// Collapse scored/rejected clusters into a decision list of the policy's
/// requested type/size (§4.4 step "Select").
fn select(policy: &Policy, mut results: Vec<(String, Result<i64, String>)>) -> Vec<ClusterDecision> {
    match policy {
        Policy::PickAll => {
            results.sort_by(|a, b| a.0.cmp(&b.0));
            results
                .into_iter()
                .map(|(name, outcome)| match outcome {
                    Ok(score) => ClusterDecision {
                        cluster_name: name,
                        selected: true,
                        score: Some(score),
                        reason: "Eligible".to_string(),
                    },
                    Err(reason) => ClusterDecision {
                        cluster_name: name,
                        selected: false,
                        score: None,
                        reason,
                    },
                })
                .collect()
        }
        Policy::PickN { number_of_clusters } => {
            // Deterministic tie-break by name, highest score first.
            results.sort_by(|a, b| {
                let score_a = a.1.as_ref().ok().copied().unwrap_or(i64::MIN);
                let score_b = b.1.as_ref().ok().copied().unwrap_or(i64::MIN);
                score_b.cmp(&score_a).then_with(|| a.0.cmp(&b.0))
            });
            let mut decisions = Vec::with_capacity(results.len());
            let mut selected_count = 0u32;
            for (name, outcome) in results {
                match outcome {
                    Ok(score) if selected_count < *number_of_clusters => {
                        selected_count += 1;
                        decisions.push(ClusterDecision {
                            cluster_name: name,
                            selected: true,
                            score: Some(score),
                            reason: "Picked".to_string(),
                        });
                    }
                    Ok(score) => decisions.push(ClusterDecision {
                        cluster_name: name,
                        selected: false,
                        score: Some(score),
                        reason: "NotAmongTopScoring".to_string(),
                    }),
                    Err(reason) => decisions.push(ClusterDecision {
                        cluster_name: name,
                        selected: false,
                        score: None,
                        reason,
                    }),
                }
            }
            decisions
        }
        Policy::PickFixed { cluster_names } => {
            let by_name: HashMap<&str, Result<i64, String>> =
                results.iter().map(|(n, r)| (n.as_str(), r.clone())).collect();
            let mut decisions: Vec<ClusterDecision> = cluster_names
                .iter()
                .map(|name| match by_name.get(name.as_str()) {
                    Some(Ok(score)) => ClusterDecision {
                        cluster_name: name.clone(),
                        selected: true,
                        score: Some(*score),
                        reason: "Fixed".to_string(),
                    },
                    Some(Err(reason)) => ClusterDecision {
                        cluster_name: name.clone(),
                        selected: false,
                        score: None,
                        reason: reason.clone(),
                    },
                    None => ClusterDecision {
                        cluster_name: name.clone(),
                        selected: false,
                        score: None,
                        reason: "not eligible".to_string(),
                    },
                })
                .collect();
            decisions.sort_by(|a, b| a.cluster_name.cmp(&b.cluster_name));
            decisions
        }
    }
}

pub struct Scheduler<'a> {
    framework: &'a SchedulingFramework,
    policy_snapshots: &'a dyn ObjectStore<PolicySnapshot>,
    bindings: &'a dyn ObjectStore<Binding>,
}

impl<'a> Scheduler<'a> {
    pub fn new(
        framework: &'a SchedulingFramework,
        policy_snapshots: &'a dyn ObjectStore<PolicySnapshot>,
        bindings: &'a dyn ObjectStore<Binding>,
    ) -> Self {
        Self {
            framework,
            policy_snapshots,
            bindings,
        }
    }

    fn selector_for_owner(placement_name: &str) -> LabelSelector {
        LabelSelector {
            match_labels: None,
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: OWNER_PLACEMENT_LABEL.to_string(),
                operator: "In".to_string(),
                values: Some(vec![placement_name.to_string()]),
            }]),
        }
    }

    async fn list_owned_bindings(&self, placement: &Placement) -> Result<Vec<Binding>, Error> {
        let mut options =
            ListOptions::default().with_label_selector(Self::selector_for_owner(&placement.meta.name));
        options.namespace = placement.meta.namespace.clone();
        Ok(self.bindings.list(&options).await?)
    }

    /// One scheduling pass, §4.4 steps 1-5. `latest_resource_snapshot_name`
    /// is whatever the snapshot manager most recently produced; freshly
    /// created bindings point at it.
    pub async fn schedule(
        &self,
        placement: &Placement,
        mut policy_snapshot: PolicySnapshot,
        clusters: &[MemberCluster],
        latest_resource_snapshot_name: &str,
        now: Time,
    ) -> Result<PolicySnapshot, Error> {
        // Step 2: skip if already scheduled for this generation.
        let already_scheduled = policy_snapshot.observed_placement_generation >= placement.meta.generation
            && policy_snapshot
                .status
                .conditions
                .get(PolicySnapshotConditionType::Scheduled)
                .is_some_and(|c| c.status.is_true());
        if already_scheduled {
            return Ok(policy_snapshot);
        }

        let eligible: Vec<MemberCluster> = clusters.iter().filter(|c| c.is_eligible()).cloned().collect();
        let results = self.framework.run(placement, &eligible);
        let decisions = select(&placement.spec.effective_policy(), results);

        let existing = self.list_owned_bindings(placement).await?;
        let selected_names: std::collections::HashSet<&str> = decisions
            .iter()
            .filter(|d| d.selected)
            .map(|d| d.cluster_name.as_str())
            .collect();

        // Step 4: diff against existing bindings.
        for decision in decisions.iter().filter(|d| d.selected) {
            let already_bound = existing
                .iter()
                .any(|b| b.spec.target_cluster == decision.cluster_name && b.state != BindingState::Unscheduled);
            if already_bound {
                continue;
            }
            let name = Binding::name_for(&placement.meta.name, &decision.cluster_name);
            let mut labels = std::collections::BTreeMap::new();
            labels.insert(OWNER_PLACEMENT_LABEL.to_string(), placement.meta.name.clone());
            labels.insert(TARGET_CLUSTER_LABEL.to_string(), decision.cluster_name.clone());
            let binding = Binding {
                meta: Meta {
                    name,
                    namespace: placement.meta.namespace.clone(),
                    labels,
                    finalizers: vec![SCHEDULER_BINDING_CLEANUP_FINALIZER.to_string()],
                    ..Default::default()
                },
                spec: BindingSpec {
                    target_cluster: decision.cluster_name.clone(),
                    scheduling_policy_snapshot_name: policy_snapshot.meta.name.clone(),
                    resource_snapshot_name: latest_resource_snapshot_name.to_string(),
                    cluster_resource_override_snapshots: Vec::new(),
                    resource_override_snapshots: Vec::new(),
                },
                state: BindingState::Scheduled,
                status: BindingStatus::default(),
            };
            match self.bindings.create(binding).await {
                Ok(_) => info!(cluster = %decision.cluster_name, "created binding"),
                Err(StoreError::Rejected { .. }) => {}
                Err(other) => return Err(other.into()),
            }
        }

        for binding in existing
            .into_iter()
            .filter(|b| !selected_names.contains(b.spec.target_cluster.as_str()) && b.state != BindingState::Unscheduled)
        {
            let mut updated = binding;
            updated.state = BindingState::Unscheduled;
            if let Err(err) = self.bindings.update(updated).await {
                warn!(error = %err, "failed to mark binding unscheduled");
            }
        }

        // Step 5: write decisions back onto the snapshot.
        policy_snapshot.status.cluster_decisions = decisions;
        policy_snapshot.observed_placement_generation = placement.meta.generation;
        policy_snapshot.status.conditions.set(
            Condition::new(PolicySnapshotConditionType::Scheduled, ConditionStatus::True, "Scheduled")
                .with_observed_generation(placement.meta.generation),
            now,
        );
        Ok(self.policy_snapshots.update(policy_snapshot).await?)
    }

    /// Placement deletion cleanup, §4.4 "Placement deletion": drop the
    /// scheduler's own finalizer from every owned binding so the store can
    /// garbage-collect them, unless `deletePolicy=Keep`, in which case the
    /// binding objects themselves are preserved (finalizer still removed).
    pub async fn cleanup_bindings_for_deleted_placement(&self, placement: &Placement) -> Result<(), Error> {
        for binding in self.list_owned_bindings(placement).await? {
            let mut updated = binding;
            updated.meta.remove_finalizer(SCHEDULER_BINDING_CLEANUP_FINALIZER);
            self.bindings.update(updated).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubefleet_core::entities::{ClusterHealth, ClusterTaint, PlacementSpec, PlacementStatus};
    use kubefleet_core::store::memory::MemoryStore;

    struct AlwaysEligible;
    impl FilterPlugin for AlwaysEligible {
        fn name(&self) -> &'static str {
            "AlwaysEligible"
        }
        fn filter(&self, _placement: &Placement, _cluster: &MemberCluster, _state: &CycleState) -> FilterResult {
            Ok(())
        }
    }

    struct RejectTainted;
    impl FilterPlugin for RejectTainted {
        fn name(&self) -> &'static str {
            "RejectTainted"
        }
        fn filter(&self, _placement: &Placement, cluster: &MemberCluster, _state: &CycleState) -> FilterResult {
            if cluster.taints.iter().any(|t| t.effect == "NoSchedule") {
                Err("tainted".to_string())
            } else {
                Ok(())
            }
        }
    }

    struct ConstantScore;
    impl ScorePlugin for ConstantScore {
        fn name(&self) -> &'static str {
            "Constant"
        }
        fn score(&self, _placement: &Placement, cluster: &MemberCluster, _state: &CycleState) -> i64 {
            cluster.name.len() as i64
        }
    }

    fn cluster(name: &str, healthy: bool, tainted: bool) -> MemberCluster {
        MemberCluster {
            name: name.to_string(),
            labels: Default::default(),
            taints: if tainted {
                vec![ClusterTaint {
                    key: "dedicated".into(),
                    value: None,
                    effect: "NoSchedule".into(),
                }]
            } else {
                Vec::new()
            },
            health: if healthy { ClusterHealth::Healthy } else { ClusterHealth::Unhealthy },
        }
    }

    fn placement(name: &str, policy: Policy) -> Placement {
        Placement {
            meta: Meta {
                name: name.to_string(),
                generation: 1,
                ..Default::default()
            },
            spec: PlacementSpec {
                policy: Some(policy),
                ..Default::default()
            },
            status: PlacementStatus::default(),
        }
    }

    fn snapshot_for(placement: &Placement) -> PolicySnapshot {
        PolicySnapshot {
            meta: Meta {
                name: format!("{}-1", placement.meta.name),
                ..Default::default()
            },
            index: 1,
            is_latest: true,
            policy_hash: "irrelevant".to_string(),
            observed_placement_generation: 0,
            number_of_clusters: None,
            spec: kubefleet_core::entities::PolicySnapshotSpec {
                policy: placement.spec.effective_policy(),
                cluster_affinity: None,
                topology_spread_constraints: Vec::new(),
                tolerations: Vec::new(),
            },
            status: Default::default(),
        }
    }

    #[tokio::test]
    async fn pick_all_selects_every_eligible_cluster_and_creates_bindings() {
        let p = placement("web", Policy::PickAll);
        let policy_snapshots = MemoryStore::<PolicySnapshot>::new();
        let bindings = MemoryStore::<Binding>::new();
        let snapshot = policy_snapshots.create(snapshot_for(&p)).await.unwrap();

        let framework = SchedulingFramework::new()
            .with_filter(Box::new(AlwaysEligible))
            .with_score(Box::new(ConstantScore));
        let scheduler = Scheduler::new(&framework, &policy_snapshots, &bindings);

        let clusters = vec![cluster("a", true, false), cluster("b", true, false), cluster("c", false, false)];
        let updated = scheduler
            .schedule(&p, snapshot, &clusters, "web-1", Time(chrono::DateTime::from_timestamp(0, 0).unwrap()))
            .await
            .unwrap();

        assert_eq!(updated.status.cluster_decisions.len(), 2);
        assert!(updated.status.cluster_decisions.iter().all(|d| d.selected));
        let all = bindings.list(&ListOptions::default()).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn pick_n_selects_highest_scoring_and_marks_the_rest_shortfall() {
        let p = placement("web", Policy::PickN { number_of_clusters: 1 });
        let policy_snapshots = MemoryStore::<PolicySnapshot>::new();
        let bindings = MemoryStore::<Binding>::new();
        let snapshot = policy_snapshots.create(snapshot_for(&p)).await.unwrap();

        let framework = SchedulingFramework::new()
            .with_filter(Box::new(AlwaysEligible))
            .with_score(Box::new(ConstantScore));
        let scheduler = Scheduler::new(&framework, &policy_snapshots, &bindings);

        let clusters = vec![cluster("short", true, false), cluster("longername", true, false)];
        let updated = scheduler
            .schedule(&p, snapshot, &clusters, "web-1", Time(chrono::DateTime::from_timestamp(0, 0).unwrap()))
            .await
            .unwrap();

        let selected: Vec<&ClusterDecision> = updated.status.cluster_decisions.iter().filter(|d| d.selected).collect();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].cluster_name, "longername");
    }

    #[tokio::test]
    async fn filter_rejection_surfaces_a_reason_and_excludes_the_cluster() {
        let p = placement("web", Policy::PickAll);
        let policy_snapshots = MemoryStore::<PolicySnapshot>::new();
        let bindings = MemoryStore::<Binding>::new();
        let snapshot = policy_snapshots.create(snapshot_for(&p)).await.unwrap();

        let framework = SchedulingFramework::new()
            .with_filter(Box::new(RejectTainted))
            .with_score(Box::new(ConstantScore));
        let scheduler = Scheduler::new(&framework, &policy_snapshots, &bindings);

        let clusters = vec![cluster("ok", true, false), cluster("tainted", true, true)];
        let updated = scheduler
            .schedule(&p, snapshot, &clusters, "web-1", Time(chrono::DateTime::from_timestamp(0, 0).unwrap()))
            .await
            .unwrap();

        let rejected = updated
            .status
            .cluster_decisions
            .iter()
            .find(|d| d.cluster_name == "tainted")
            .unwrap();
        assert!(!rejected.selected);
        assert!(rejected.reason.contains("tainted"));
    }
}
