//! The placement reconciler, §4.3: select → snapshot → schedule → rollout
//! → status, driven by a single key dequeue from the placement work
//! queue.

pub mod status;

use crate::action::Action;
use crate::snapshot::{PolicySnapshotManager, ResourceSelection, ResourceSnapshotManager, ResourceSnapshotOutcome};
use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement, Time};
use kubefleet_core::condition::{Condition, ConditionStatus, PlacementConditionType};
use kubefleet_core::config::ProcessConfig;
use kubefleet_core::entities::{
    Binding, Placement, PlacementKey, PolicySnapshot, ResourceSelector, ResourceSnapshot,
    ResourceSnapshotGroup, PLACEMENT_CLEANUP_FINALIZER,
};
use kubefleet_core::labels::OWNER_PLACEMENT_LABEL;
use kubefleet_core::store::{ListOptions, ObjectKey, ObjectStore, StoreError};
use kubefleet_core::Error;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Resolves a placement's `resourceSelectors` against the hub (§4.2
/// "Resource selection runs the selectors against the hub"). Generic
/// resource listing by GVK belongs to the hub API server, an external
/// collaborator (§1); this trait is the interface the reconciler needs
/// from it, the same way [`kubefleet_core::store::ObjectStore`] is the
/// interface it needs for the typed entities.
#[async_trait]
pub trait ResourceSelectionSource: Send + Sync {
    async fn select(&self, selectors: &[ResourceSelector]) -> Result<ResourceSelection, Error>;
}

pub struct PlacementReconciler<'a> {
    placements: &'a dyn ObjectStore<Placement>,
    policy_snapshots: &'a dyn ObjectStore<PolicySnapshot>,
    resource_snapshots: &'a dyn ObjectStore<ResourceSnapshot>,
    bindings: &'a dyn ObjectStore<Binding>,
    resources: &'a dyn ResourceSelectionSource,
    config: &'a ProcessConfig,
}

impl<'a> PlacementReconciler<'a> {
    pub fn new(
        placements: &'a dyn ObjectStore<Placement>,
        policy_snapshots: &'a dyn ObjectStore<PolicySnapshot>,
        resource_snapshots: &'a dyn ObjectStore<ResourceSnapshot>,
        bindings: &'a dyn ObjectStore<Binding>,
        resources: &'a dyn ResourceSelectionSource,
        config: &'a ProcessConfig,
    ) -> Self {
        Self {
            placements,
            policy_snapshots,
            resource_snapshots,
            bindings,
            resources,
            config,
        }
    }

    fn placement_object_key(key: &PlacementKey) -> ObjectKey {
        match key.namespace() {
            Some(ns) => ObjectKey::namespaced(ns.to_string(), key.name().to_string()),
            None => ObjectKey::cluster_scoped(key.name().to_string()),
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
        let mut options = ListOptions::default()
            .with_label_selector(Self::selector_for_owner(&placement.meta.name));
        options.namespace = placement.meta.namespace.clone();
        Ok(self.bindings.list(&options).await?)
    }

    /// One full reconcile of `key`, §4.3 steps 1-7.
    #[instrument(skip(self), fields(placement = %key))]
    pub async fn reconcile(&self, key: &PlacementKey, now: Time) -> Result<Action, Error> {
        let object_key = Self::placement_object_key(key);
        let Some(mut placement) = self.placements.get(&object_key).await? else {
            return Ok(Action::await_change());
        };

        // Step 1: finalizer handling.
        if placement.meta.is_deleting() {
            return self.finalize_deletion(placement).await;
        }
        if !placement.meta.has_finalizer(PLACEMENT_CLEANUP_FINALIZER) {
            placement.meta.add_finalizer(PLACEMENT_CLEANUP_FINALIZER);
            placement = self.placements.update(placement).await?;
        }

        // Step 2: select resources.
        let selection = match self.resources.select(&placement.spec.resource_selectors).await {
            Ok(selection) => selection,
            Err(err) if err.is_user_error() => {
                warn!(error = %err, "invalid resource selectors");
                placement.status.conditions.set(
                    Condition::new(
                        PlacementConditionType::Scheduled,
                        ConditionStatus::False,
                        "InvalidResourceSelectors",
                    )
                    .with_message(err.to_string()),
                    now.clone(),
                );
                self.placements.update(placement).await?;
                return Ok(Action::requeue(self.config.safety_resync_period));
            }
            Err(err) => return Err(err),
        };

        // Step 3: policy snapshot.
        let policy_snapshot = PolicySnapshotManager::new(self.policy_snapshots)
            .get_or_create(&placement, now.clone())
            .await?;

        // Step 4: resource snapshot group.
        let (resource_group, rate_gated_retry): (Option<ResourceSnapshotGroup>, Option<Duration>) =
            match ResourceSnapshotManager::new(self.resource_snapshots)
                .get_or_create(&placement, &selection, self.config, now.clone())
                .await?
            {
                ResourceSnapshotOutcome::Created(group) | ResourceSnapshotOutcome::Unchanged(group) => {
                    (Some(group), None)
                }
                ResourceSnapshotOutcome::RateGated { current, retry_after } => {
                    (Some(current), Some(retry_after))
                }
            };

        // Step 5: compute and persist status.
        let bindings = self.list_owned_bindings(&placement).await?;
        let new_status = status::synthesize(
            &placement,
            Some(&policy_snapshot),
            resource_group.as_ref(),
            &bindings,
            &now,
        );

        // Step 6: emit events for condition edges going True.
        for condition_type in PlacementConditionType::ladder_for(placement.report_diff()) {
            let was_true = placement
                .status
                .conditions
                .get(*condition_type)
                .is_some_and(|c| c.status.is_true());
            let now_true = new_status
                .conditions
                .get(*condition_type)
                .is_some_and(|c| c.status.is_true());
            if now_true && !was_true {
                info!(condition = %condition_type, "condition became True");
            }
        }
        let rollout_completed = PlacementConditionType::ladder_for(placement.report_diff())
            .iter()
            .all(|t| new_status.conditions.get(*t).is_some_and(|c| c.status.is_true()));
        if rollout_completed {
            info!("RolloutCompleted");
        }

        placement.status = new_status;
        self.placements.update(placement).await?;

        // Step 7: schedule the next tick.
        if let Some(retry_after) = rate_gated_retry {
            return Ok(Action::requeue(retry_after));
        }
        if rollout_completed {
            return Ok(Action::await_change());
        }
        Ok(Action::requeue(self.config.resync_period))
    }

    async fn finalize_deletion(&self, mut placement: Placement) -> Result<Action, Error> {
        if !placement.meta.has_finalizer(PLACEMENT_CLEANUP_FINALIZER) {
            return Ok(Action::await_change());
        }

        if !matches!(placement.spec.delete_policy, kubefleet_core::entities::DeletePolicy::Keep) {
            self.delete_owned_policy_snapshots(&placement).await?;
            self.delete_owned_resource_snapshots(&placement).await?;
        }

        placement.meta.remove_finalizer(PLACEMENT_CLEANUP_FINALIZER);
        self.placements.update(placement).await?;
        Ok(Action::await_change())
    }

    async fn delete_owned_policy_snapshots(&self, placement: &Placement) -> Result<(), Error> {
        let mut options = ListOptions::default()
            .with_label_selector(Self::selector_for_owner(&placement.meta.name));
        options.namespace = placement.meta.namespace.clone();
        for snapshot in self.policy_snapshots.list(&options).await? {
            let key = ObjectKey {
                namespace: snapshot.meta.namespace.clone(),
                name: snapshot.meta.name.clone(),
            };
            match self
                .policy_snapshots
                .delete(&key, Some(&snapshot.meta.resource_version))
                .await
            {
                Ok(()) | Err(StoreError::NotFound { .. }) => {}
                Err(other) => return Err(other.into()),
            }
        }
        Ok(())
    }

    async fn delete_owned_resource_snapshots(&self, placement: &Placement) -> Result<(), Error> {
        let mut options = ListOptions::default()
            .with_label_selector(Self::selector_for_owner(&placement.meta.name));
        options.namespace = placement.meta.namespace.clone();
        for snapshot in self.resource_snapshots.list(&options).await? {
            let key = ObjectKey {
                namespace: snapshot.meta.namespace.clone(),
                name: snapshot.meta.name.clone(),
            };
            match self
                .resource_snapshots
                .delete(&key, Some(&snapshot.meta.resource_version))
                .await
            {
                Ok(()) | Err(StoreError::NotFound { .. }) => {}
                Err(other) => return Err(other.into()),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubefleet_core::entities::{Meta, PlacementSpec, PlacementStatus, SelectedResource};
    use kubefleet_core::store::memory::MemoryStore;

    struct NoResources;

    #[async_trait]
    impl ResourceSelectionSource for NoResources {
        async fn select(&self, _selectors: &[ResourceSelector]) -> Result<ResourceSelection, Error> {
            Ok(ResourceSelection::new(Vec::<SelectedResource>::new()))
        }
    }

    struct AlwaysInvalid;

    #[async_trait]
    impl ResourceSelectionSource for AlwaysInvalid {
        async fn select(&self, _selectors: &[ResourceSelector]) -> Result<ResourceSelection, Error> {
            Err(Error::UserError {
                message: "bad selector".to_string(),
            })
        }
    }

    fn now() -> Time {
        Time(chrono::DateTime::from_timestamp(1_000, 0).unwrap())
    }

    fn placement(name: &str) -> Placement {
        Placement {
            meta: Meta {
                name: name.to_string(),
                generation: 1,
                ..Default::default()
            },
            spec: PlacementSpec::default(),
            status: PlacementStatus::default(),
        }
    }

    #[tokio::test]
    async fn first_reconcile_adds_finalizer_and_creates_a_policy_snapshot() {
        let placements = MemoryStore::<Placement>::new();
        let policy_snapshots = MemoryStore::<PolicySnapshot>::new();
        let resource_snapshots = MemoryStore::<ResourceSnapshot>::new();
        let bindings = MemoryStore::<Binding>::new();
        let resources = NoResources;
        let config = ProcessConfig::default();

        placements.create(placement("web")).await.unwrap();

        let reconciler = PlacementReconciler::new(
            &placements,
            &policy_snapshots,
            &resource_snapshots,
            &bindings,
            &resources,
            &config,
        );

        let action = reconciler
            .reconcile(&PlacementKey::cluster_scoped("web"), now())
            .await
            .unwrap();
        assert!(matches!(action, Action::Requeue(_)));

        let stored = placements
            .get(&ObjectKey::cluster_scoped("web"))
            .await
            .unwrap()
            .unwrap();
        assert!(stored.meta.has_finalizer(PLACEMENT_CLEANUP_FINALIZER));
        assert!(stored.status.conditions.get(PlacementConditionType::Scheduled).is_some());
    }

    #[tokio::test]
    async fn invalid_selectors_set_scheduled_false_and_requeue_at_safety_period() {
        let placements = MemoryStore::<Placement>::new();
        let policy_snapshots = MemoryStore::<PolicySnapshot>::new();
        let resource_snapshots = MemoryStore::<ResourceSnapshot>::new();
        let bindings = MemoryStore::<Binding>::new();
        let resources = AlwaysInvalid;
        let config = ProcessConfig::default();

        placements.create(placement("web")).await.unwrap();

        let reconciler = PlacementReconciler::new(
            &placements,
            &policy_snapshots,
            &resource_snapshots,
            &bindings,
            &resources,
            &config,
        );

        let action = reconciler
            .reconcile(&PlacementKey::cluster_scoped("web"), now())
            .await
            .unwrap();
        assert_eq!(action, Action::requeue(config.safety_resync_period));

        let stored = placements
            .get(&ObjectKey::cluster_scoped("web"))
            .await
            .unwrap()
            .unwrap();
        let scheduled = stored.status.conditions.get(PlacementConditionType::Scheduled).unwrap();
        assert_eq!(scheduled.status, ConditionStatus::False);
        assert_eq!(scheduled.reason.as_deref(), Some("InvalidResourceSelectors"));
    }

    #[tokio::test]
    async fn deletion_removes_finalizer_and_owned_snapshots() {
        let placements = MemoryStore::<Placement>::new();
        let policy_snapshots = MemoryStore::<PolicySnapshot>::new();
        let resource_snapshots = MemoryStore::<ResourceSnapshot>::new();
        let bindings = MemoryStore::<Binding>::new();
        let resources = NoResources;
        let config = ProcessConfig::default();

        let mut deleting = placement("web");
        deleting.meta.add_finalizer(PLACEMENT_CLEANUP_FINALIZER);
        deleting.meta.deletion_timestamp = Some(now());
        placements.create(deleting).await.unwrap();

        let reconciler = PlacementReconciler::new(
            &placements,
            &policy_snapshots,
            &resource_snapshots,
            &bindings,
            &resources,
            &config,
        );

        let action = reconciler
            .reconcile(&PlacementKey::cluster_scoped("web"), now())
            .await
            .unwrap();
        assert_eq!(action, Action::await_change());

        let stored = placements
            .get(&ObjectKey::cluster_scoped("web"))
            .await
            .unwrap()
            .unwrap();
        assert!(!stored.meta.has_finalizer(PLACEMENT_CLEANUP_FINALIZER));
    }
}
