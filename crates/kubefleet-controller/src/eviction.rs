//! The eviction and disruption-budget engine, §4.7. One reconcile per
//! eviction object; the caller is responsible for capping concurrency at
//! 1 so two evictions never race the same budget check.

use async_trait::async_trait;
use kubefleet_core::condition::{Condition, ConditionStatus, EvictionConditionType};
use kubefleet_core::entities::{resolve_int_or_string, Binding, DisruptionBudget, Eviction, Placement};
use kubefleet_core::store::{ListOptions, ObjectKey, ObjectStore};
use kubefleet_core::Error;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

/// A fresh, uncached read of a placement's disruption budget. Modelled as
/// a seam rather than an [`ObjectStore`] lookup because §4.7 requires
/// this read to bypass any cache the placement/binding stores might keep,
/// the same "external collaborator" shape as
/// [`crate::reconciler::ResourceSelectionSource`].
#[async_trait]
pub trait DisruptionBudgetSource: Send + Sync {
    async fn fetch(&self, placement_name: &str) -> Result<Option<DisruptionBudget>, Error>;
}

pub struct Engine<'a> {
    placements: &'a dyn ObjectStore<Placement>,
    bindings: &'a dyn ObjectStore<Binding>,
    evictions: &'a dyn ObjectStore<Eviction>,
    budgets: &'a dyn DisruptionBudgetSource,
}

impl<'a> Engine<'a> {
    pub fn new(
        placements: &'a dyn ObjectStore<Placement>,
        bindings: &'a dyn ObjectStore<Binding>,
        evictions: &'a dyn ObjectStore<Eviction>,
        budgets: &'a dyn DisruptionBudgetSource,
    ) -> Self {
        Self {
            placements,
            bindings,
            evictions,
            budgets,
        }
    }

    async fn owned_bindings(&self, placement: &Placement) -> Result<Vec<Binding>, Error> {
        use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
        use kubefleet_core::labels::OWNER_PLACEMENT_LABEL;

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
        Ok(self.bindings.list(&options).await?)
    }

    pub async fn reconcile(&self, mut eviction: Eviction, now: Time) -> Result<(), Error> {
        if eviction.is_terminal() {
            return Ok(());
        }

        let placement = self
            .placements
            .get(&ObjectKey::cluster_scoped(eviction.spec.placement_name.clone()))
            .await?;

        let Some(placement) = placement else {
            eviction.status.conditions.set(
                Condition::new(EvictionConditionType::Valid, ConditionStatus::False, "PlacementNotFound"),
                now,
            );
            self.evictions.update(eviction).await?;
            return Ok(());
        };

        if placement.meta.is_deleting() {
            eviction.status.conditions.set(
                Condition::new(EvictionConditionType::Valid, ConditionStatus::False, "PlacementDeleting"),
                now,
            );
            self.evictions.update(eviction).await?;
            return Ok(());
        }

        let policy = placement.spec.effective_policy();
        if policy.is_pick_fixed() {
            eviction.status.conditions.set(
                Condition::new(EvictionConditionType::Valid, ConditionStatus::False, "PickFixedNotEvictable"),
                now,
            );
            self.evictions.update(eviction).await?;
            return Ok(());
        }

        let owned = self.owned_bindings(&placement).await?;
        let targeting: Vec<&Binding> = owned
            .iter()
            .filter(|b| b.spec.target_cluster == eviction.spec.cluster_name)
            .collect();
        if targeting.len() != 1 {
            eviction.status.conditions.set(
                Condition::new(EvictionConditionType::Valid, ConditionStatus::False, "AmbiguousBinding")
                    .with_message(format!("{} bindings target this cluster", targeting.len())),
                now,
            );
            self.evictions.update(eviction).await?;
            return Ok(());
        }

        eviction.status.conditions.set(
            Condition::new(EvictionConditionType::Valid, ConditionStatus::True, "Valid"),
            now.clone(),
        );

        let binding = targeting[0].clone();
        self.execute(&mut eviction, &placement, &owned, binding, now.clone()).await?;
        self.evictions.update(eviction).await?;
        Ok(())
    }

    async fn execute(
        &self,
        eviction: &mut Eviction,
        placement: &Placement,
        owned: &[Binding],
        binding: Binding,
        now: Time,
    ) -> Result<(), Error> {
        use kubefleet_core::condition::PlacementConditionType;

        if binding.meta.is_deleting() {
            eviction.status.conditions.set(
                Condition::new(EvictionConditionType::Executed, ConditionStatus::True, "PlacementRemoved"),
                now,
            );
            return Ok(());
        }

        let applied = binding.status.conditions.get(PlacementConditionType::Applied);
        let Some(applied) = applied else {
            eviction.status.conditions.set(
                Condition::new(EvictionConditionType::Executed, ConditionStatus::False, "MissingPlacement"),
                now,
            );
            return Ok(());
        };

        let diff_only = placement.spec.strategy.apply_strategy().is_some_and(|s| s.is_report_diff());
        if applied.status == ConditionStatus::False || diff_only {
            self.delete_binding(&binding).await?;
            eviction.status.conditions.set(
                Condition::new(EvictionConditionType::Executed, ConditionStatus::True, "PlacementFailed"),
                now,
            );
            return Ok(());
        }

        let budget = self.budgets.fetch(&placement.meta.name).await?;
        let Some(budget) = budget else {
            self.delete_binding(&binding).await?;
            eviction.status.conditions.set(
                Condition::new(EvictionConditionType::Executed, ConditionStatus::True, "NoPDB"),
                now,
            );
            return Ok(());
        };

        if policy_is_pick_all(placement) && (budget.is_percentage_based() || budget.max_unavailable.is_some()) {
            eviction.status.conditions.set(
                Condition::new(EvictionConditionType::Executed, ConditionStatus::False, "MisconfiguredPDB"),
                now,
            );
            return Ok(());
        }

        let policy = placement.spec.effective_policy();
        let total = owned.iter().filter(|b| !matches!(b.state, kubefleet_core::entities::BindingState::Unscheduled)).count();
        let available = owned
            .iter()
            .filter(|b| {
                b.status
                    .conditions
                    .get(PlacementConditionType::Available)
                    .is_some_and(|c| c.status.is_true())
            })
            .count();
        let desired = policy.desired(total) as u32;

        // §9 open question (c): a percentage-based budget against a
        // `desired` of 0 is treated as the strictest interpretation,
        // `disruptionsAllowed = 0`, rather than letting percent-of-zero
        // arithmetic decide.
        let disruptions_allowed = if budget.is_percentage_based() && desired == 0 {
            0
        } else if let Some(max_unavailable) = &budget.max_unavailable {
            let max_unavailable = resolve_int_or_string(max_unavailable, desired, false);
            (max_unavailable - (total as i64 - available as i64)).max(0)
        } else if let Some(min_available) = &budget.min_available {
            let min_available = resolve_int_or_string(min_available, desired, true);
            (available as i64 - min_available).max(0)
        } else {
            0
        };

        if disruptions_allowed > 0 {
            self.delete_binding(&binding).await?;
            eviction.status.conditions.set(
                Condition::new(EvictionConditionType::Executed, ConditionStatus::True, "PDBAllowed"),
                now,
            );
        } else {
            eviction.status.conditions.set(
                Condition::new(EvictionConditionType::Executed, ConditionStatus::False, "PDBBlocked"),
                now,
            );
        }
        Ok(())
    }

    async fn delete_binding(&self, binding: &Binding) -> Result<(), Error> {
        let key = ObjectKey {
            namespace: binding.meta.namespace.clone(),
            name: binding.meta.name.clone(),
        };
        self.bindings.delete(&key, Some(&binding.meta.resource_version)).await?;
        Ok(())
    }
}

fn policy_is_pick_all(placement: &Placement) -> bool {
    placement.spec.effective_policy().is_pick_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubefleet_core::entities::{
        BindingSpec, BindingState, BindingStatus, EvictionSpec, EvictionStatus, Meta, Placement, PlacementSpec,
        PlacementStatus, Policy,
    };
    use kubefleet_core::store::memory::MemoryStore;

    fn epoch() -> Time {
        Time(chrono::DateTime::from_timestamp(0, 0).unwrap())
    }

    struct NoBudget;
    #[async_trait]
    impl DisruptionBudgetSource for NoBudget {
        async fn fetch(&self, _placement_name: &str) -> Result<Option<DisruptionBudget>, Error> {
            Ok(None)
        }
    }

    fn placement(policy: Policy) -> Placement {
        Placement {
            meta: Meta {
                name: "web".to_string(),
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

    fn ready_binding(cluster: &str) -> Binding {
        let mut status = BindingStatus::default();
        status.conditions.set(
            Condition::new(kubefleet_core::condition::PlacementConditionType::Applied, ConditionStatus::True, "Applied"),
            epoch(),
        );
        Binding {
            meta: Meta {
                name: format!("web-{cluster}"),
                labels: [(kubefleet_core::labels::OWNER_PLACEMENT_LABEL.to_string(), "web".to_string())]
                    .into_iter()
                    .collect(),
                resource_version: "1".to_string(),
                ..Default::default()
            },
            spec: BindingSpec {
                target_cluster: cluster.to_string(),
                scheduling_policy_snapshot_name: "web-1".to_string(),
                resource_snapshot_name: "web-1".to_string(),
                cluster_resource_override_snapshots: Vec::new(),
                resource_override_snapshots: Vec::new(),
            },
            state: BindingState::Bound,
            status,
        }
    }

    fn eviction() -> Eviction {
        Eviction {
            meta: Meta {
                name: "evict-a".to_string(),
                ..Default::default()
            },
            spec: EvictionSpec {
                placement_name: "web".to_string(),
                cluster_name: "a".to_string(),
            },
            status: EvictionStatus::default(),
        }
    }

    #[tokio::test]
    async fn no_budget_deletes_immediately() {
        let placements = MemoryStore::<Placement>::new();
        let bindings = MemoryStore::<Binding>::new();
        let evictions = MemoryStore::<Eviction>::new();
        placements.create(placement(Policy::PickN { number_of_clusters: 1 })).await.unwrap();
        bindings.create(ready_binding("a")).await.unwrap();
        let ev = evictions.create(eviction()).await.unwrap();

        let engine = Engine::new(&placements, &bindings, &evictions, &NoBudget);
        engine.reconcile(ev, epoch()).await.unwrap();

        let remaining = bindings.list(&Default::default()).await.unwrap();
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn pick_fixed_is_never_valid() {
        let placements = MemoryStore::<Placement>::new();
        let bindings = MemoryStore::<Binding>::new();
        let evictions = MemoryStore::<Eviction>::new();
        placements
            .create(placement(Policy::PickFixed { cluster_names: vec!["a".to_string()] }))
            .await
            .unwrap();
        bindings.create(ready_binding("a")).await.unwrap();
        let ev = evictions.create(eviction()).await.unwrap();

        let engine = Engine::new(&placements, &bindings, &evictions, &NoBudget);
        engine.reconcile(ev.clone(), epoch()).await.unwrap();

        let stored = evictions.get(&ObjectKey::cluster_scoped("evict-a")).await.unwrap().unwrap();
        let valid = stored.status.conditions.get(EvictionConditionType::Valid).unwrap();
        assert_eq!(valid.status, ConditionStatus::False);
        let remaining = bindings.list(&Default::default()).await.unwrap();
        assert_eq!(remaining.len(), 1);
    }
}
