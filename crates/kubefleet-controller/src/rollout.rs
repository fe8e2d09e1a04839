//! The rollout controller, §4.5: moves bindings onto the latest resource
//! snapshot a few at a time, respecting `maxSurge`/`maxUnavailable`, and
//! clears bindings the scheduler has already marked `Unscheduled`.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kubefleet_core::condition::{Condition, ConditionStatus, PlacementConditionType};
use kubefleet_core::entities::{
    resolve_int_or_string, Binding, BindingState, MemberCluster, Placement, RolloutStrategy,
};
use kubefleet_core::store::{ObjectKey, ObjectStore};
use kubefleet_core::Error;
use tracing::info;

enum Bucket {
    Ready,
    Pending,
    Unavailable,
    Departing,
}

fn bucket(binding: &Binding, latest_resource_snapshot_name: &str, unavailable_period_seconds: u32, now: &Time) -> Bucket {
    if binding.state == BindingState::Unscheduled {
        return Bucket::Departing;
    }
    if binding.spec.resource_snapshot_name != latest_resource_snapshot_name {
        return Bucket::Pending;
    }
    if binding.is_ready_since(now, unavailable_period_seconds) {
        Bucket::Ready
    } else {
        Bucket::Unavailable
    }
}

/// One rollout reconcile, §4.5. `eligible_count` is how many clusters are
/// currently eligible, used to resolve `PickAll`'s desired count exactly
/// the way the scheduler does. `clusters` is the current fleet inventory,
/// needed to tell a departing binding whose cluster has simply left the
/// fleet from one still present but not yet reporting `Applied=True`.
pub async fn reconcile(
    placement: &Placement,
    bindings: &dyn ObjectStore<Binding>,
    latest_resource_snapshot_name: &str,
    eligible_count: usize,
    clusters: &[MemberCluster],
    now: Time,
) -> Result<(), Error> {
    let RolloutStrategy::RollingUpdate {
        max_unavailable,
        max_surge,
        unavailable_period_seconds,
        ..
    } = &placement.spec.strategy
    else {
        // External: the owning controller drives `resourceSnapshotName`.
        return Ok(());
    };

    let owned = list_owned(placement, bindings).await?;
    let desired = placement.spec.effective_policy().desired(eligible_count) as u32;

    let mut ready = 0usize;
    let mut pending: Vec<Binding> = Vec::new();
    let mut unavailable = 0usize;
    let mut departing: Vec<Binding> = Vec::new();

    for binding in owned {
        match bucket(&binding, latest_resource_snapshot_name, *unavailable_period_seconds, &now) {
            Bucket::Ready => ready += 1,
            Bucket::Pending => pending.push(binding),
            Bucket::Unavailable => unavailable += 1,
            Bucket::Departing => departing.push(binding),
        }
    }

    let total = ready + pending.len() + unavailable;
    let surge = total.saturating_sub(desired as usize);
    let max_surge = resolve_int_or_string(max_surge, desired, true).max(0) as usize;
    let max_unavailable = resolve_int_or_string(max_unavailable, desired, false).max(0) as usize;

    let budget = (max_unavailable + max_surge).saturating_sub(unavailable + surge);
    let promotable = pending.len().min(budget);

    pending.sort_by(|a, b| a.spec.target_cluster.cmp(&b.spec.target_cluster));
    for binding in pending.into_iter().take(promotable) {
        let mut updated = binding;
        updated.spec.resource_snapshot_name = latest_resource_snapshot_name.to_string();
        updated.status.conditions.set(
            Condition::new(PlacementConditionType::RolloutStarted, ConditionStatus::True, "RolloutStarted"),
            now.clone(),
        );
        info!(cluster = %updated.spec.target_cluster, "promoted binding to latest resource snapshot");
        bindings.update(updated).await?;
    }

    // §4.5 step 5: a departing binding may be deleted only if doing so
    // would not push `unavailable` past `maxUnavailable` — a departing
    // binding whose workload is still applied counts as "available
    // capacity" until it's actually gone. It's removable once it is
    // fully applied, *or* once its target cluster has left the fleet
    // outright (it will never report `Applied=True` again).
    let mut removable_budget = max_unavailable.saturating_sub(unavailable);
    departing.sort_by(|a, b| a.spec.target_cluster.cmp(&b.spec.target_cluster));
    for binding in departing {
        if removable_budget == 0 {
            break;
        }
        let applied = binding
            .status
            .conditions
            .get(PlacementConditionType::Applied)
            .is_some_and(|c| c.status.is_true());
        let cluster_left = !clusters.iter().any(|c| c.name == binding.spec.target_cluster);
        if !applied && !cluster_left {
            continue;
        }
        let key = ObjectKey {
            namespace: binding.meta.namespace.clone(),
            name: binding.meta.name.clone(),
        };
        bindings.delete(&key, Some(&binding.meta.resource_version)).await?;
        info!(cluster = %binding.spec.target_cluster, "deleted departed binding");
        removable_budget -= 1;
    }

    Ok(())
}

async fn list_owned(placement: &Placement, bindings: &dyn ObjectStore<Binding>) -> Result<Vec<Binding>, Error> {
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
    use kubefleet_core::labels::OWNER_PLACEMENT_LABEL;
    use kubefleet_core::store::ListOptions;

    let selector = LabelSelector {
        match_labels: None,
        match_expressions: Some(vec![LabelSelectorRequirement {
            key: OWNER_PLACEMENT_LABEL.to_string(),
            operator: "In".to_string(),
            values: Some(vec![placement.meta.name.clone()]),
        }]),
    };
    let mut options = ListOptions::default().with_label_selector(selector);
    options.namespace = placement.meta.namespace.clone();
    Ok(bindings.list(&options).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubefleet_core::entities::{BindingSpec, BindingStatus, Meta, Placement, PlacementSpec, PlacementStatus, Policy};
    use kubefleet_core::store::memory::MemoryStore;

    fn epoch() -> Time {
        Time(chrono::DateTime::from_timestamp(0, 0).unwrap())
    }

    fn placement_with(strategy: RolloutStrategy, policy: Policy) -> Placement {
        Placement {
            meta: Meta {
                name: "web".to_string(),
                generation: 1,
                ..Default::default()
            },
            spec: PlacementSpec {
                policy: Some(policy),
                strategy,
                ..Default::default()
            },
            status: PlacementStatus::default(),
        }
    }

    fn pending_binding(cluster: &str) -> Binding {
        Binding {
            meta: Meta {
                name: format!("web-{cluster}"),
                labels: [(kubefleet_core::labels::OWNER_PLACEMENT_LABEL.to_string(), "web".to_string())]
                    .into_iter()
                    .collect(),
                ..Default::default()
            },
            spec: BindingSpec {
                target_cluster: cluster.to_string(),
                scheduling_policy_snapshot_name: "web-1".to_string(),
                resource_snapshot_name: "web-0".to_string(),
                cluster_resource_override_snapshots: Vec::new(),
                resource_override_snapshots: Vec::new(),
            },
            state: BindingState::Scheduled,
            status: BindingStatus::default(),
        }
    }

    #[tokio::test]
    async fn promotes_up_to_the_surge_and_unavailable_budget() {
        let strategy = RolloutStrategy::RollingUpdate {
            max_unavailable: k8s_openapi::apimachinery::pkg::util::intstr::IntOrString::Int(0),
            max_surge: k8s_openapi::apimachinery::pkg::util::intstr::IntOrString::Int(1),
            unavailable_period_seconds: 30,
            apply_strategy: kubefleet_core::entities::ApplyStrategy::ClientSideApply,
        };
        let placement = placement_with(strategy, Policy::PickN { number_of_clusters: 3 });
        let store = MemoryStore::<Binding>::new();
        for name in ["a", "b", "c"] {
            store.create(pending_binding(name)).await.unwrap();
        }

        let clusters = [cluster("a"), cluster("b"), cluster("c")];
        reconcile(&placement, &store, "web-1", 3, &clusters, epoch()).await.unwrap();

        let all = store.list(&Default::default()).await.unwrap();
        let promoted = all.iter().filter(|b| b.spec.resource_snapshot_name == "web-1").count();
        assert_eq!(promoted, 1);
    }

    #[tokio::test]
    async fn external_strategy_is_a_no_op() {
        let placement = placement_with(RolloutStrategy::External, Policy::PickAll);
        let store = MemoryStore::<Binding>::new();
        store.create(pending_binding("a")).await.unwrap();

        let clusters = [cluster("a")];
        reconcile(&placement, &store, "web-1", 1, &clusters, epoch()).await.unwrap();

        let all = store.list(&Default::default()).await.unwrap();
        assert_eq!(all[0].spec.resource_snapshot_name, "web-0");
    }

    fn cluster(name: &str) -> MemberCluster {
        MemberCluster {
            name: name.to_string(),
            labels: Default::default(),
            taints: Vec::new(),
            health: kubefleet_core::entities::ClusterHealth::Healthy,
        }
    }

    #[tokio::test]
    async fn departing_binding_whose_cluster_left_is_deleted_even_if_never_applied() {
        let strategy = RolloutStrategy::RollingUpdate {
            max_unavailable: k8s_openapi::apimachinery::pkg::util::intstr::IntOrString::Int(1),
            max_surge: k8s_openapi::apimachinery::pkg::util::intstr::IntOrString::Int(0),
            unavailable_period_seconds: 30,
            apply_strategy: kubefleet_core::entities::ApplyStrategy::ClientSideApply,
        };
        let placement = placement_with(strategy, Policy::PickAll);
        let store = MemoryStore::<Binding>::new();
        let mut departed = pending_binding("gone");
        departed.state = BindingState::Unscheduled;
        departed.spec.resource_snapshot_name = "web-1".to_string();
        store.create(departed).await.unwrap();

        // "gone" is no longer in the fleet inventory at all, and never
        // reported `Applied=True`.
        let clusters: [MemberCluster; 0] = [];
        reconcile(&placement, &store, "web-1", 0, &clusters, epoch()).await.unwrap();

        let all = store.list(&Default::default()).await.unwrap();
        assert!(all.is_empty());
    }
}
