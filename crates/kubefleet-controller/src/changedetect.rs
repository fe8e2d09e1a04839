//! The change detector, §4.8: watches every resource kind the fleet
//! config allows, filters by GVK and namespace, and enqueues the
//! placements whose selectors match the changed object.

use async_trait::async_trait;
use kubefleet_core::config::{Gvk, ProcessConfig};
use kubefleet_core::entities::{ObjectRef, Placement, PlacementKey};
use kubefleet_core::queue::WorkQueue;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// A resource observed by the dynamic informer manager (an external
/// collaborator, §1 — discovery and informer wiring are out of scope).
/// Owned rather than borrowed, since it crosses the informer's event
/// channel.
#[derive(Debug, Clone)]
pub struct ChangedObject {
    pub gvk: Gvk,
    pub namespace: Option<String>,
    pub name: String,
    pub labels: BTreeMap<String, String>,
}

impl ChangedObject {
    fn as_object_ref(&self) -> ObjectRef<'_> {
        ObjectRef {
            group: &self.gvk.group,
            version: &self.gvk.version,
            kind: &self.gvk.kind,
            namespace: self.namespace.as_deref(),
            name: &self.name,
            labels: &self.labels,
        }
    }
}

/// The discovery-driven dynamic informer stream (§4.8 preamble). Modelled
/// as a pull interface so the detector loop can be driven by a real
/// `kube::runtime` watcher or, in tests, a fixed sequence of events.
#[async_trait]
pub trait ResourceWatch: Send + Sync {
    async fn next_change(&mut self) -> Option<ChangedObject>;
}

/// Step 1 of §4.8: GVK allow/skip-list plus the namespace skip-list
/// (`default` is always skipped regardless of configuration).
fn is_watched(config: &ProcessConfig, object: &ChangedObject) -> bool {
    if !config.api_filter.allows(&object.gvk) {
        return false;
    }
    let namespace = object.namespace.as_deref().unwrap_or("");
    !config.namespace_is_skipped(namespace)
}

/// Step 2 of §4.8: every known placement whose selectors match the
/// object.
pub fn matching_placements<'a>(object: &ChangedObject, placements: &'a [Placement]) -> Vec<&'a Placement> {
    let object_ref = object.as_object_ref();
    placements
        .iter()
        .filter(|p| p.spec.resource_selectors.iter().any(|s| s.matches(&object_ref)))
        .collect()
}

/// Handle one observed change: filter, then enqueue every placement it
/// affects.
pub async fn dispatch(
    config: &ProcessConfig,
    object: &ChangedObject,
    placements: &[Placement],
    queue: &WorkQueue<PlacementKey>,
) {
    if !is_watched(config, object) {
        return;
    }
    for placement in matching_placements(object, placements) {
        debug!(placement = %placement.meta.key(), kind = %object.gvk.kind, "change detected, enqueuing placement");
        queue.add(placement.meta.key()).await;
    }
}

/// Drive a [`ResourceWatch`] until it's exhausted or the queue is shut
/// down, dispatching each change against a snapshot of known placements.
/// `placements` is re-read by the caller between restarts (the detector
/// holds no cache of its own — the hub's own informer cache, via `kube`,
/// already serves that role; duplicating it here would just be a second
/// place to go stale).
pub async fn run(
    config: &ProcessConfig,
    mut watch: impl ResourceWatch,
    placements_snapshot: impl Fn() -> Vec<Placement> + Send + Sync,
    queue: Arc<WorkQueue<PlacementKey>>,
) {
    while let Some(object) = watch.next_change().await {
        let placements = placements_snapshot();
        dispatch(config, &object, &placements, &queue).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubefleet_core::entities::{Meta, PlacementSpec, PlacementStatus, ResourceSelector, SelectorKind};
    use std::collections::BTreeSet;

    fn gvk(kind: &str) -> Gvk {
        Gvk {
            group: "apps".to_string(),
            version: "v1".to_string(),
            kind: kind.to_string(),
        }
    }

    fn placement_selecting(name: &str) -> Placement {
        Placement {
            meta: Meta {
                name: "web".to_string(),
                ..Default::default()
            },
            spec: PlacementSpec {
                resource_selectors: vec![ResourceSelector {
                    group: "apps".to_string(),
                    version: "v1".to_string(),
                    kind: "Deployment".to_string(),
                    selector_kind: SelectorKind::Name(name.to_string()),
                }],
                ..Default::default()
            },
            status: PlacementStatus::default(),
        }
    }

    #[tokio::test]
    async fn default_namespace_is_always_skipped() {
        let config = ProcessConfig::default();
        let object = ChangedObject {
            gvk: gvk("Deployment"),
            namespace: Some("default".to_string()),
            name: "web".to_string(),
            labels: BTreeMap::new(),
        };
        let placements = vec![placement_selecting("web")];
        let queue = WorkQueue::<PlacementKey>::new();
        dispatch(&config, &object, &placements, &queue).await;
        assert_eq!(queue.len().await, 0);
    }

    #[tokio::test]
    async fn matching_object_enqueues_its_placement() {
        let config = ProcessConfig::default();
        let object = ChangedObject {
            gvk: gvk("Deployment"),
            namespace: Some("prod".to_string()),
            name: "web".to_string(),
            labels: BTreeMap::new(),
        };
        let placements = vec![placement_selecting("web"), placement_selecting("other")];
        let queue = WorkQueue::<PlacementKey>::new();
        dispatch(&config, &object, &placements, &queue).await;
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn skip_listed_gvk_is_ignored() {
        let mut skipped = BTreeSet::new();
        skipped.insert(gvk("Deployment"));
        let config = ProcessConfig {
            api_filter: kubefleet_core::config::ApiFilter::Skipped(skipped),
            ..ProcessConfig::default()
        };
        let object = ChangedObject {
            gvk: gvk("Deployment"),
            namespace: Some("prod".to_string()),
            name: "web".to_string(),
            labels: BTreeMap::new(),
        };
        let placements = vec![placement_selecting("web")];
        let queue = WorkQueue::<PlacementKey>::new();
        dispatch(&config, &object, &placements, &queue).await;
        assert_eq!(queue.len().await, 0);
    }
}
