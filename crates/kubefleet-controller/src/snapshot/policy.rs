//! Policy snapshot get-or-create, §4.2 "Policy snapshot".

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement, Time};
use kubefleet_core::condition::{Condition, ConditionStatus, PolicySnapshotConditionType};
use kubefleet_core::entities::{
    Meta, Placement, PolicySnapshot, PolicySnapshotSpec, PolicySnapshotStatus,
};
use kubefleet_core::hash::ContentHash;
use kubefleet_core::labels::{
    NUMBER_OF_CLUSTERS_ANNOTATION, OBSERVED_PLACEMENT_GENERATION_ANNOTATION, OWNER_PLACEMENT_LABEL,
    POLICY_HASH_ANNOTATION,
};
use kubefleet_core::store::{ListOptions, ObjectKey, ObjectStore, StoreError};
use kubefleet_core::Error;
use serde::Serialize;
use tracing::{info, warn};

pub struct PolicySnapshotManager<'a> {
    store: &'a dyn ObjectStore<PolicySnapshot>,
}

/// The fields §4.2 says the hash must cover: everything in the policy
/// snapshot spec *except* `PickN`'s `numberOfClusters`, which is tracked
/// as an annotation instead so that bumping it alone reuses the existing
/// snapshot.
#[derive(Serialize)]
struct HashablePolicy<'a> {
    policy_kind: &'static str,
    cluster_affinity: &'a Option<kubefleet_core::entities::ClusterAffinity>,
    topology_spread_constraints: &'a [kubefleet_core::entities::TopologySpreadConstraint],
    tolerations: &'a [kubefleet_core::entities::Toleration],
    pick_fixed_cluster_names: Option<&'a [String]>,
}

pub fn policy_hash(spec: &PolicySnapshotSpec) -> ContentHash {
    use kubefleet_core::entities::Policy;
    let (policy_kind, pick_fixed_cluster_names) = match &spec.policy {
        Policy::PickAll => ("PickAll", None),
        Policy::PickN { .. } => ("PickN", None),
        Policy::PickFixed { cluster_names } => ("PickFixed", Some(cluster_names.as_slice())),
    };
    ContentHash::of_json(&HashablePolicy {
        policy_kind,
        cluster_affinity: &spec.cluster_affinity,
        topology_spread_constraints: &spec.topology_spread_constraints,
        tolerations: &spec.tolerations,
        pick_fixed_cluster_names,
    })
}

/// Mirror the snapshot's structured fields into annotations, matching the
/// wire format of the stored object.
fn annotate(snapshot: &mut PolicySnapshot, number_of_clusters: Option<u32>) {
    snapshot
        .meta
        .annotations
        .insert(POLICY_HASH_ANNOTATION.to_string(), snapshot.policy_hash.clone());
    snapshot.meta.annotations.insert(
        OBSERVED_PLACEMENT_GENERATION_ANNOTATION.to_string(),
        snapshot.observed_placement_generation.to_string(),
    );
    match number_of_clusters {
        Some(n) => {
            snapshot
                .meta
                .annotations
                .insert(NUMBER_OF_CLUSTERS_ANNOTATION.to_string(), n.to_string());
        }
        None => {
            snapshot.meta.annotations.remove(NUMBER_OF_CLUSTERS_ANNOTATION);
        }
    }
}

impl<'a> PolicySnapshotManager<'a> {
    pub fn new(store: &'a dyn ObjectStore<PolicySnapshot>) -> Self {
        Self { store }
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

    async fn list_owned(&self, placement: &Placement) -> Result<Vec<PolicySnapshot>, Error> {
        let mut options = ListOptions::default().with_label_selector(Self::selector_for_owner(
            &placement.meta.name,
        ));
        options.namespace = placement.meta.namespace.clone();
        Ok(self.store.list(&options).await.map_err(Error::from)?)
    }

    /// Get-or-create the latest policy snapshot for `placement`, §4.2.
    ///
    /// Returns [`Error::UnexpectedBehaviorError`] (without attempting a
    /// fix beyond demoting the offenders) when more than one snapshot
    /// carries `is_latest` — §8 invariant 1 / scenario 6 "Invariant
    /// recovery": this call performs the self-heal (demote all but the
    /// highest-`index` latest), persists it, then still reports the
    /// violation so the *caller*, this tick, declines to schedule; the
    /// next reconcile observes a clean single-latest state.
    pub async fn get_or_create(
        &self,
        placement: &Placement,
        now: Time,
    ) -> Result<PolicySnapshot, Error> {
        let spec = PolicySnapshotSpec {
            policy: placement.spec.effective_policy(),
            cluster_affinity: placement.spec.cluster_affinity.clone(),
            topology_spread_constraints: placement.spec.topology_spread_constraints.clone(),
            tolerations: placement.spec.tolerations.clone(),
        };
        let hash = policy_hash(&spec).to_string();

        let existing = self.list_owned(placement).await?;
        let mut latest: Vec<&PolicySnapshot> = existing.iter().filter(|s| s.is_latest).collect();
        latest.sort_by_key(|s| s.index);

        if latest.len() > 1 {
            warn!(
                placement = %placement.key(),
                count = latest.len(),
                "more than one policy snapshot carries the latest marker; demoting all but the highest index"
            );
            let keep = latest.last().map(|s| s.index);
            for stale in latest.iter().take(latest.len() - 1) {
                self.demote(stale).await?;
            }
            return Err(Error::UnexpectedBehaviorError {
                key: placement.key().to_string(),
                message: format!(
                    "multiple latest policy snapshots observed; kept index {keep:?}, demoted the rest"
                ),
            });
        }

        let number_of_clusters = match &spec.policy {
            kubefleet_core::entities::Policy::PickN { number_of_clusters } => {
                Some(*number_of_clusters)
            }
            _ => None,
        };

        if let Some(current) = latest.first() {
            if current.policy_hash == hash {
                if current.observed_placement_generation == placement.meta.generation
                    && current.number_of_clusters == number_of_clusters
                {
                    return Ok((*current).clone());
                }
                let mut refreshed = (*current).clone();
                refreshed.observed_placement_generation = placement.meta.generation;
                refreshed.number_of_clusters = number_of_clusters;
                annotate(&mut refreshed, number_of_clusters);
                let updated = self
                    .store
                    .update(refreshed)
                    .await
                    .map_err(Error::from)?;
                return Ok(updated);
            }
        }

        // Hash changed (or there is no snapshot yet): create a new one.
        if let Some(current) = latest.first() {
            self.demote(current).await?;
        }

        self.trim_history(placement, &existing).await?;

        let next_index = existing.iter().map(|s| s.index).max().map_or(0, |m| m + 1);
        let name = PolicySnapshot::name_for(&placement.meta.name, next_index);

        let mut meta = Meta {
            name: name.clone(),
            namespace: placement.meta.namespace.clone(),
            ..Default::default()
        };
        meta.labels
            .insert(OWNER_PLACEMENT_LABEL.to_string(), placement.meta.name.clone());

        let mut snapshot = PolicySnapshot {
            meta,
            index: next_index,
            is_latest: true,
            policy_hash: hash,
            observed_placement_generation: placement.meta.generation,
            number_of_clusters,
            spec,
            status: PolicySnapshotStatus::default(),
        };
        snapshot.status.conditions.set(
            Condition::new(
                PolicySnapshotConditionType::Scheduled,
                ConditionStatus::Unknown,
                "SchedulingNotStarted",
            ),
            now,
        );
        annotate(&mut snapshot, number_of_clusters);

        let created = self.store.create(snapshot).await.map_err(Error::from)?;
        info!(placement = %placement.key(), index = next_index, "created new policy snapshot");
        Ok(created)
    }

    async fn demote(&self, snapshot: &PolicySnapshot) -> Result<(), Error> {
        let mut demoted = snapshot.clone();
        demoted.is_latest = false;
        self.store.update(demoted).await.map_err(Error::from)?;
        Ok(())
    }

    /// Trim historical (non-latest) snapshots down to
    /// `revisionHistoryLimit - 1` before a new one is created, oldest
    /// index first (§4.2, §8 invariant 2).
    async fn trim_history(
        &self,
        placement: &Placement,
        existing: &[PolicySnapshot],
    ) -> Result<(), Error> {
        let limit = placement.spec.revision_history_limit.saturating_sub(1) as usize;
        let mut historical: Vec<&PolicySnapshot> =
            existing.iter().filter(|s| !s.is_latest).collect();
        historical.sort_by_key(|s| s.index);
        while historical.len() > limit {
            let oldest = historical.remove(0);
            let key = ObjectKey::from_placement_key(&placement.key(), oldest.meta.name.clone());
            match self
                .store
                .delete(&key, Some(&oldest.meta.resource_version))
                .await
            {
                Ok(()) | Err(StoreError::NotFound { .. }) => {}
                Err(other) => return Err(Error::from(other)),
            }
        }
        Ok(())
    }
}
