//! An in-memory [`ObjectStore`] implementation.
//!
//! This is both the reference implementation the rest of the workspace is
//! tested against and the store a production binary could swap in during
//! local development, the way `stackable-operator`'s test modules keep a
//! fake client handy instead of requiring a live API server for every
//! unit test.

use super::{
    ConflictSnafu as Conflict, ListOptions, NotFoundSnafu as NotFound, ObjectKey, ObjectStore,
    Patch, RejectedSnafu as Rejected, StoreError, StoredObject,
};
use crate::entities::selector::label_selector_matches;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

pub struct MemoryStore<T: StoredObject> {
    objects: RwLock<HashMap<ObjectKey, T>>,
    next_resource_version: AtomicU64,
}

impl<T: StoredObject> Default for MemoryStore<T> {
    fn default() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            next_resource_version: AtomicU64::new(1),
        }
    }
}

impl<T: StoredObject> MemoryStore<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_resource_version(&self) -> String {
        self.next_resource_version
            .fetch_add(1, Ordering::SeqCst)
            .to_string()
    }

    fn key_of(object: &T) -> ObjectKey {
        ObjectKey {
            namespace: object.meta().namespace.clone(),
            name: object.meta().name.clone(),
        }
    }
}

#[async_trait]
impl<T: StoredObject> ObjectStore<T> for MemoryStore<T> {
    async fn get(&self, key: &ObjectKey) -> Result<Option<T>, StoreError> {
        Ok(self.objects.read().await.get(key).cloned())
    }

    async fn list(&self, options: &ListOptions) -> Result<Vec<T>, StoreError> {
        let objects = self.objects.read().await;
        Ok(objects
            .values()
            .filter(|o| {
                options
                    .namespace
                    .as_ref()
                    .is_none_or(|ns| o.meta().namespace.as_deref() == Some(ns.as_str()))
            })
            .filter(|o| match &options.label_selector {
                Some(selector) => label_selector_matches(selector, &o.meta().labels),
                None => true,
            })
            .cloned()
            .collect())
    }

    async fn create(&self, mut object: T) -> Result<T, StoreError> {
        let key = Self::key_of(&object);
        let mut objects = self.objects.write().await;
        if objects.contains_key(&key) {
            return Rejected {
                key: key.name.clone(),
                message: "object already exists".to_string(),
            }
            .fail();
        }
        object.meta_mut().resource_version = self.allocate_resource_version();
        objects.insert(key, object.clone());
        Ok(object)
    }

    async fn update(&self, mut object: T) -> Result<T, StoreError> {
        let key = Self::key_of(&object);
        let mut objects = self.objects.write().await;
        let Some(existing) = objects.get(&key) else {
            return NotFound { key: key.name.clone() }.fail();
        };
        if existing.meta().resource_version != object.meta().resource_version {
            return Conflict {
                key: key.name.clone(),
                observed: object.meta().resource_version.clone(),
            }
            .fail();
        }
        object.meta_mut().resource_version = self.allocate_resource_version();
        objects.insert(key, object.clone());
        Ok(object)
    }

    async fn patch(
        &self,
        key: &ObjectKey,
        resource_version: &str,
        patch: Patch,
    ) -> Result<T, StoreError> {
        let mut objects = self.objects.write().await;
        let Some(existing) = objects.get_mut(key) else {
            return NotFound { key: key.name.clone() }.fail();
        };
        if existing.meta().resource_version != resource_version {
            return Conflict {
                key: key.name.clone(),
                observed: resource_version.to_string(),
            }
            .fail();
        }

        // The in-memory store only needs to move the resourceVersion
        // forward; applying the patch content itself is the caller's
        // responsibility (they hand us the already-patched object via a
        // merge patch of the whole document, as `update` would).
        match patch {
            Patch::Merge(value) => {
                let mut as_json = serde_json::to_value(&*existing)
                    .map_err(|e| StoreError::Transient { message: e.to_string() })?;
                json_patch::merge(&mut as_json, &value);
                let mut patched: T = serde_json::from_value(as_json)
                    .map_err(|e| StoreError::Transient { message: e.to_string() })?;
                patched.meta_mut().resource_version = self.allocate_resource_version();
                *existing = patched.clone();
                Ok(patched)
            }
            Patch::Json(ops) => {
                let mut as_json = serde_json::to_value(&*existing)
                    .map_err(|e| StoreError::Transient { message: e.to_string() })?;
                json_patch::patch(&mut as_json, &ops)
                    .map_err(|e| StoreError::Rejected {
                        key: key.name.clone(),
                        message: e.to_string(),
                    })?;
                let mut patched: T = serde_json::from_value(as_json)
                    .map_err(|e| StoreError::Transient { message: e.to_string() })?;
                patched.meta_mut().resource_version = self.allocate_resource_version();
                *existing = patched.clone();
                Ok(patched)
            }
        }
    }

    async fn delete(
        &self,
        key: &ObjectKey,
        resource_version: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut objects = self.objects.write().await;
        let Some(existing) = objects.get(key) else {
            return NotFound { key: key.name.clone() }.fail();
        };
        if let Some(expected) = resource_version {
            if existing.meta().resource_version != expected {
                return Conflict {
                    key: key.name.clone(),
                    observed: expected.to_string(),
                }
                .fail();
            }
        }
        objects.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Eviction, EvictionSpec, EvictionStatus, Meta};

    fn eviction(name: &str) -> Eviction {
        Eviction {
            meta: Meta {
                name: name.to_string(),
                ..Default::default()
            },
            spec: EvictionSpec {
                placement_name: "p".into(),
                cluster_name: "c".into(),
            },
            status: EvictionStatus::default(),
        }
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = MemoryStore::<Eviction>::new();
        let created = store.create(eviction("e1")).await.unwrap();
        assert!(!created.meta.resource_version.is_empty());

        let fetched = store.get(&ObjectKey::cluster_scoped("e1")).await.unwrap().unwrap();
        assert_eq!(fetched.meta.resource_version, created.meta.resource_version);
    }

    #[tokio::test]
    async fn update_with_stale_resource_version_conflicts() {
        let store = MemoryStore::<Eviction>::new();
        let created = store.create(eviction("e1")).await.unwrap();

        let mut stale = created.clone();
        stale.meta.resource_version = "stale".to_string();
        let result = store.update(stale).await;
        assert!(matches!(result, Err(StoreError::Conflict { .. })));
    }

    #[tokio::test]
    async fn delete_with_matching_resource_version_succeeds() {
        let store = MemoryStore::<Eviction>::new();
        let created = store.create(eviction("e1")).await.unwrap();
        store
            .delete(&ObjectKey::cluster_scoped("e1"), Some(&created.meta.resource_version))
            .await
            .unwrap();
        assert!(store.get(&ObjectKey::cluster_scoped("e1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_with_stale_resource_version_conflicts() {
        let store = MemoryStore::<Eviction>::new();
        store.create(eviction("e1")).await.unwrap();
        let result = store.delete(&ObjectKey::cluster_scoped("e1"), Some("bogus")).await;
        assert!(matches!(result, Err(StoreError::Conflict { .. })));
    }
}
