//! Resource snapshot group get-or-create, §4.2 "Resource snapshot group".
//!
//! Resource *selection* itself — running `resourceSelectors` against
//! whatever the hub currently holds and expanding enveloped wrapper objects
//! into their contained manifests — happens against the hub API server,
//! an external collaborator (§1). [`ResourceSelection`] is this module's
//! boundary: callers hand in the already-selected, already-expanded set of
//! resources for one placement at one point in time, and this module turns
//! that into a stored, possibly-split [`ResourceSnapshotGroup`].

use kubefleet_core::config::ProcessConfig;
use kubefleet_core::entities::{Meta, Placement, ResourceSnapshot, ResourceSnapshotGroup, SelectedResource};
use kubefleet_core::hash::{hash_resource_set, ResourceIdentifier};
use kubefleet_core::labels::{
    NEXT_RESOURCE_SNAPSHOT_CANDIDATE_DETECTION_TIME_ANNOTATION, NUMBER_OF_ENVELOPED_OBJECTS_ANNOTATION,
    NUMBER_OF_RESOURCE_SNAPSHOTS_ANNOTATION, OWNER_PLACEMENT_LABEL, RESOURCE_GROUP_HASH_ANNOTATION,
    SUBINDEX_OF_RESOURCE_SNAPSHOT_ANNOTATION,
};
use kubefleet_core::store::{ListOptions, ObjectKey, ObjectStore, StoreError};
use kubefleet_core::Error;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement, Time};
use std::time::Duration;
use tracing::{info, warn};

/// The already-selected, already-expanded candidate set for one placement
/// at one point in time. Order is irrelevant — [`ResourceSnapshotManager`]
/// sorts by [`ResourceIdentifier`] before splitting, so the same logical
/// set always produces the same split regardless of how the caller
/// enumerated it.
#[derive(Debug, Clone, Default)]
pub struct ResourceSelection {
    pub resources: Vec<SelectedResource>,
}

impl ResourceSelection {
    pub fn new(resources: Vec<SelectedResource>) -> Self {
        Self { resources }
    }
}

/// What [`ResourceSnapshotManager::get_or_create`] decided to do.
#[derive(Debug, Clone)]
pub enum ResourceSnapshotOutcome {
    /// The selection's content hash matches the current latest group;
    /// nothing was written.
    Unchanged(ResourceSnapshotGroup),
    /// A new latest group was created.
    Created(ResourceSnapshotGroup),
    /// The selection's content changed, but the rate gate (§4.2) has not
    /// yet cleared; `current` is still the latest group to use in the
    /// meantime, and `retry_after` is how long to wait before trying again.
    RateGated {
        current: ResourceSnapshotGroup,
        retry_after: Duration,
    },
}

pub struct ResourceSnapshotManager<'a> {
    store: &'a dyn ObjectStore<ResourceSnapshot>,
}

impl<'a> ResourceSnapshotManager<'a> {
    pub fn new(store: &'a dyn ObjectStore<ResourceSnapshot>) -> Self {
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

    async fn list_owned(&self, placement: &Placement) -> Result<Vec<ResourceSnapshot>, Error> {
        let mut options = ListOptions::default().with_label_selector(Self::selector_for_owner(
            &placement.meta.name,
        ));
        options.namespace = placement.meta.namespace.clone();
        Ok(self.store.list(&options).await.map_err(Error::from)?)
    }

    fn assemble_group(index: u64, members: Vec<ResourceSnapshot>) -> Option<ResourceSnapshotGroup> {
        let mut members = members;
        let master_pos = members.iter().position(|s| s.is_master())?;
        let master = members.swap_remove(master_pos);
        Some(ResourceSnapshotGroup {
            index,
            master,
            siblings: members,
        })
    }

    /// Get-or-create the latest resource snapshot group for `placement`,
    /// applying the rate gate and the §8 invariant-recovery rule that a
    /// duplicate latest marker is corrected immediately but still reported
    /// (mirrors [`super::policy::PolicySnapshotManager::get_or_create`]).
    pub async fn get_or_create(
        &self,
        placement: &Placement,
        selection: &ResourceSelection,
        config: &ProcessConfig,
        now: Time,
    ) -> Result<ResourceSnapshotOutcome, Error> {
        let existing = self.list_owned(placement).await?;

        let mut by_index: std::collections::BTreeMap<u64, Vec<ResourceSnapshot>> =
            std::collections::BTreeMap::new();
        for snapshot in existing {
            by_index.entry(snapshot.index).or_default().push(snapshot);
        }

        let mut latest_groups: Vec<ResourceSnapshotGroup> = by_index
            .iter()
            .filter_map(|(index, members)| {
                if members.iter().any(|m| m.is_master() && m.is_latest) {
                    Self::assemble_group(*index, members.clone())
                } else {
                    None
                }
            })
            .collect();
        latest_groups.sort_by_key(|g| g.index);

        if latest_groups.len() > 1 {
            warn!(
                placement = %placement.key(),
                count = latest_groups.len(),
                "more than one resource snapshot group carries the latest marker; demoting all but the highest index"
            );
            let keep = latest_groups.last().map(|g| g.index);
            for stale in latest_groups.iter().take(latest_groups.len() - 1) {
                self.demote(&stale.master).await?;
            }
            return Err(Error::UnexpectedBehaviorError {
                key: placement.key().to_string(),
                message: format!(
                    "multiple latest resource snapshot groups observed; kept index {keep:?}, demoted the rest"
                ),
            });
        }

        let pairs: Vec<(ResourceIdentifier, Vec<u8>)> = selection
            .resources
            .iter()
            .map(|r| (r.identifier.clone(), r.raw.clone()))
            .collect();
        let hash = hash_resource_set(&pairs).to_string();

        let Some(current) = latest_groups.into_iter().next() else {
            let group = self.create_group(placement, selection, &hash, by_index_max(&by_index), now).await?;
            return Ok(ResourceSnapshotOutcome::Created(group));
        };

        if current.master.resource_group_hash.as_deref() == Some(hash.as_str()) {
            if current.master.next_resource_snapshot_candidate_detection_time.is_some() {
                let mut cleared = current.master.clone();
                cleared.next_resource_snapshot_candidate_detection_time = None;
                cleared.meta.annotations.remove(NEXT_RESOURCE_SNAPSHOT_CANDIDATE_DETECTION_TIME_ANNOTATION);
                self.store.update(cleared).await.map_err(Error::from)?;
            }
            return Ok(ResourceSnapshotOutcome::Unchanged(current));
        }

        // Content changed. The quiet period collects further changes
        // before we actually snapshot (§4.2 rate gate, part 1).
        match &current.master.next_resource_snapshot_candidate_detection_time {
            None => {
                let candidate_time = add_duration(&now, config.resource_changes_collection_duration);
                let mut marked = current.master.clone();
                marked.next_resource_snapshot_candidate_detection_time = Some(candidate_time.clone());
                marked.meta.annotations.insert(
                    NEXT_RESOURCE_SNAPSHOT_CANDIDATE_DETECTION_TIME_ANNOTATION.to_string(),
                    candidate_time.0.to_string(),
                );
                self.store.update(marked).await.map_err(Error::from)?;
                return Ok(ResourceSnapshotOutcome::RateGated {
                    current,
                    retry_after: config.resource_changes_collection_duration,
                });
            }
            Some(candidate_time) => {
                if now.0 < candidate_time.0 {
                    let retry_after = (candidate_time.0 - now.0)
                        .to_std()
                        .unwrap_or(Duration::ZERO);
                    return Ok(ResourceSnapshotOutcome::RateGated { current, retry_after });
                }
            }
        }

        // Quiet period elapsed; still enforce the minimum interval since
        // the current latest group was created (§4.2 rate gate, part 2).
        if let Some(created_at) = &current.master.meta.creation_timestamp {
            let elapsed = (now.0 - created_at.0).to_std().unwrap_or(Duration::ZERO);
            if elapsed < config.resource_snapshot_creation_minimum_interval {
                let retry_after = config.resource_snapshot_creation_minimum_interval - elapsed;
                return Ok(ResourceSnapshotOutcome::RateGated { current, retry_after });
            }
        }

        self.demote(&current.master).await?;
        self.trim_history(placement, &by_index).await?;

        let group = self
            .create_group(placement, selection, &hash, Some(current.index), now)
            .await?;
        Ok(ResourceSnapshotOutcome::Created(group))
    }

    async fn demote(&self, master: &ResourceSnapshot) -> Result<(), Error> {
        let mut demoted = master.clone();
        demoted.is_latest = false;
        self.store.update(demoted).await.map_err(Error::from)?;
        Ok(())
    }

    /// Split `selection` into a master plus sub-indexed siblings under the
    /// per-object size budget, then create (or, on crash-recovery retry,
    /// reuse) each chunk, §4.2 / §8 "splitting then concatenating is the
    /// identity".
    async fn create_group(
        &self,
        placement: &Placement,
        selection: &ResourceSelection,
        hash: &str,
        previous_index: Option<u64>,
        now: Time,
    ) -> Result<ResourceSnapshotGroup, Error> {
        let next_index = previous_index.map_or(0, |i| i + 1);
        let chunks = split_into_chunks(
            selection.resources.clone(),
            kubefleet_core::entities::RESOURCE_SNAPSHOT_SIZE_BUDGET_BYTES,
        );
        let number_of_resource_snapshots = chunks.len() as u32;
        let number_of_enveloped_objects = selection.resources.len() as u32;

        let mut master: Option<ResourceSnapshot> = None;
        let mut siblings = Vec::with_capacity(chunks.len().saturating_sub(1));

        for (position, resources) in chunks.into_iter().enumerate() {
            let sub_index = if position == 0 { None } else { Some(position as u32 - 1) };
            let name = ResourceSnapshot::name_for(&placement.meta.name, next_index, sub_index);

            let mut meta = Meta {
                name: name.clone(),
                namespace: placement.meta.namespace.clone(),
                creation_timestamp: Some(now.clone()),
                ..Default::default()
            };
            meta.labels
                .insert(OWNER_PLACEMENT_LABEL.to_string(), placement.meta.name.clone());
            if let Some(s) = sub_index {
                meta.annotations
                    .insert(SUBINDEX_OF_RESOURCE_SNAPSHOT_ANNOTATION.to_string(), s.to_string());
            }

            let mut snapshot = ResourceSnapshot {
                meta,
                index: next_index,
                sub_index,
                is_latest: sub_index.is_none(),
                resource_group_hash: sub_index.is_none().then(|| hash.to_string()),
                number_of_resource_snapshots: sub_index.is_none().then_some(number_of_resource_snapshots),
                number_of_enveloped_objects: sub_index.is_none().then_some(number_of_enveloped_objects),
                next_resource_snapshot_candidate_detection_time: None,
                resources,
            };
            if sub_index.is_none() {
                snapshot.meta.annotations.insert(
                    RESOURCE_GROUP_HASH_ANNOTATION.to_string(),
                    hash.to_string(),
                );
                snapshot.meta.annotations.insert(
                    NUMBER_OF_RESOURCE_SNAPSHOTS_ANNOTATION.to_string(),
                    number_of_resource_snapshots.to_string(),
                );
                snapshot.meta.annotations.insert(
                    NUMBER_OF_ENVELOPED_OBJECTS_ANNOTATION.to_string(),
                    number_of_enveloped_objects.to_string(),
                );
            }

            let key = ObjectKey::from_placement_key(&placement.key(), name);
            let created = self.get_or_create_chunk(key, snapshot).await?;
            if sub_index.is_none() {
                master = Some(created);
            } else {
                siblings.push(created);
            }
        }

        let master = master.expect("split_into_chunks always yields at least one chunk");
        info!(
            placement = %placement.key(),
            index = next_index,
            snapshots = number_of_resource_snapshots,
            "created new resource snapshot group"
        );
        Ok(ResourceSnapshotGroup {
            index: next_index,
            master,
            siblings,
        })
    }

    /// Crash-recovery: a prior attempt at this same index may have already
    /// created this exact chunk before the process died. Reuse it rather
    /// than failing on "already exists" (§7 "retries are always safe to
    /// repeat since names are deterministic").
    async fn get_or_create_chunk(
        &self,
        key: ObjectKey,
        built: ResourceSnapshot,
    ) -> Result<ResourceSnapshot, Error> {
        if let Some(existing) = self.store.get(&key).await.map_err(Error::from)? {
            return Ok(existing);
        }
        match self.store.create(built).await {
            Ok(created) => Ok(created),
            Err(StoreError::Rejected { .. }) => {
                // Lost the create race against a concurrent retry; the
                // object now exists, so fetch what's there.
                self.store
                    .get(&key)
                    .await
                    .map_err(Error::from)?
                    .ok_or_else(|| Error::UnexpectedBehaviorError {
                        key: key.name.clone(),
                        message: "resource snapshot vanished immediately after a rejected create".to_string(),
                    })
            }
            Err(other) => Err(Error::from(other)),
        }
    }

    /// Delete historical (non-latest) groups down to
    /// `revisionHistoryLimit - 1`, oldest index first, including every
    /// sibling of a trimmed group (§4.2, §8 invariant 2).
    async fn trim_history(
        &self,
        placement: &Placement,
        by_index: &std::collections::BTreeMap<u64, Vec<ResourceSnapshot>>,
    ) -> Result<(), Error> {
        // Every group in `by_index` is historical at this point: the
        // previous latest was already demoted in-place above, and the
        // next (new) index has not been created yet.
        let limit = placement.spec.revision_history_limit.saturating_sub(1) as usize;
        let mut historical: Vec<u64> = by_index.keys().copied().collect();
        historical.sort_unstable();

        while historical.len() > limit {
            let index = historical.remove(0);
            for member in &by_index[&index] {
                let key = ObjectKey::from_placement_key(&placement.key(), member.meta.name.clone());
                match self
                    .store
                    .delete(&key, Some(&member.meta.resource_version))
                    .await
                {
                    Ok(()) | Err(StoreError::NotFound { .. }) => {}
                    Err(other) => return Err(Error::from(other)),
                }
            }
        }
        Ok(())
    }
}

fn by_index_max(by_index: &std::collections::BTreeMap<u64, Vec<ResourceSnapshot>>) -> Option<u64> {
    by_index.keys().next_back().copied()
}

fn add_duration(time: &Time, duration: Duration) -> Time {
    Time(time.0 + chrono::TimeDelta::from_std(duration).unwrap_or(chrono::TimeDelta::zero()))
}

/// Greedily pack `resources` (sorted into canonical order first, so the
/// same logical set always splits the same way) into chunks no larger than
/// `budget` bytes. A single resource that alone exceeds `budget` still
/// gets its own chunk rather than being rejected — §3.3 edge case "a
/// single resource larger than the budget is never split further".
fn split_into_chunks(
    mut resources: Vec<SelectedResource>,
    budget: usize,
) -> Vec<Vec<SelectedResource>> {
    resources.sort_by(|a, b| a.identifier.cmp(&b.identifier));

    let mut chunks = Vec::new();
    let mut current = Vec::new();
    let mut current_size = 0usize;

    for resource in resources {
        let size = resource.raw.len();
        if !current.is_empty() && current_size + size > budget {
            chunks.push(std::mem::take(&mut current));
            current_size = 0;
        }
        current_size += size;
        current.push(resource);
    }
    if !current.is_empty() || chunks.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubefleet_core::entities::{Placement, PlacementSpec, PlacementStatus};
    use kubefleet_core::store::memory::MemoryStore;

    fn placement(name: &str) -> Placement {
        Placement {
            meta: Meta {
                name: name.to_string(),
                ..Default::default()
            },
            spec: PlacementSpec::default(),
            status: PlacementStatus::default(),
        }
    }

    fn now() -> Time {
        Time(chrono::DateTime::from_timestamp(0, 0).unwrap())
    }

    fn resource(name: &str, bytes: usize) -> SelectedResource {
        SelectedResource {
            identifier: ResourceIdentifier {
                group: "".into(),
                version: "v1".into(),
                kind: "ConfigMap".into(),
                namespace: Some("default".into()),
                name: name.into(),
            },
            raw: vec![0u8; bytes],
        }
    }

    #[test]
    fn split_respects_budget_and_keeps_oversized_items_alone() {
        let resources = vec![resource("a", 10), resource("b", 10), resource("c", 25)];
        let chunks = split_into_chunks(resources, 15);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 1);
        assert_eq!(chunks[1].len(), 1);
        assert_eq!(chunks[2].len(), 1);
    }

    #[test]
    fn split_packs_small_items_together() {
        let resources = vec![resource("a", 10), resource("b", 10)];
        let chunks = split_into_chunks(resources, 30);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), 2);
    }

    #[tokio::test]
    async fn first_selection_creates_a_group_immediately() {
        let store = MemoryStore::<ResourceSnapshot>::new();
        let manager = ResourceSnapshotManager::new(&store);
        let p = placement("fleet-a");
        let config = ProcessConfig::default();
        let selection = ResourceSelection::new(vec![resource("a", 10)]);

        let outcome = manager.get_or_create(&p, &selection, &config, now()).await.unwrap();
        match outcome {
            ResourceSnapshotOutcome::Created(group) => {
                assert_eq!(group.index, 0);
                assert!(group.is_latest());
                assert_eq!(group.all_resources().len(), 1);
            }
            other => panic!("expected Created, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unchanged_selection_is_reused() {
        let store = MemoryStore::<ResourceSnapshot>::new();
        let manager = ResourceSnapshotManager::new(&store);
        let p = placement("fleet-a");
        let config = ProcessConfig::default();
        let selection = ResourceSelection::new(vec![resource("a", 10)]);

        manager.get_or_create(&p, &selection, &config, now()).await.unwrap();
        let outcome = manager.get_or_create(&p, &selection, &config, now()).await.unwrap();
        assert!(matches!(outcome, ResourceSnapshotOutcome::Unchanged(_)));
    }

    #[tokio::test]
    async fn changed_selection_is_rate_gated_before_quiet_period_elapses() {
        let store = MemoryStore::<ResourceSnapshot>::new();
        let manager = ResourceSnapshotManager::new(&store);
        let p = placement("fleet-a");
        let config = ProcessConfig::default();
        let first = ResourceSelection::new(vec![resource("a", 10)]);
        let second = ResourceSelection::new(vec![resource("a", 10), resource("b", 10)]);

        manager.get_or_create(&p, &first, &config, now()).await.unwrap();
        let outcome = manager.get_or_create(&p, &second, &config, now()).await.unwrap();
        match outcome {
            ResourceSnapshotOutcome::RateGated { retry_after, .. } => {
                assert_eq!(retry_after, config.resource_changes_collection_duration);
            }
            other => panic!("expected RateGated, got {other:?}"),
        }

        // Still inside the quiet window: gated again.
        let outcome = manager.get_or_create(&p, &second, &config, now()).await.unwrap();
        assert!(matches!(outcome, ResourceSnapshotOutcome::RateGated { .. }));
    }

    #[tokio::test]
    async fn changed_selection_creates_once_both_gates_clear() {
        let store = MemoryStore::<ResourceSnapshot>::new();
        let manager = ResourceSnapshotManager::new(&store);
        let p = placement("fleet-a");
        let mut config = ProcessConfig::default();
        config.resource_changes_collection_duration = Duration::from_secs(0);
        config.resource_snapshot_creation_minimum_interval = Duration::from_secs(0);
        let first = ResourceSelection::new(vec![resource("a", 10)]);
        let second = ResourceSelection::new(vec![resource("a", 10), resource("b", 10)]);

        manager.get_or_create(&p, &first, &config, now()).await.unwrap();
        // First observation of the change still marks the quiet-period
        // start and reports RateGated, even with a zero-length window.
        let gated = manager.get_or_create(&p, &second, &config, now()).await.unwrap();
        assert!(matches!(gated, ResourceSnapshotOutcome::RateGated { .. }));

        let outcome = manager.get_or_create(&p, &second, &config, now()).await.unwrap();
        match outcome {
            ResourceSnapshotOutcome::Created(group) => {
                assert_eq!(group.index, 1);
                assert_eq!(group.all_resources().len(), 2);
            }
            other => panic!("expected Created, got {other:?}"),
        }
    }
}
