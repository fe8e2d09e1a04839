//! The object store adapter, §4.1 / §6.
//!
//! The hub API server is an external collaborator (§1): the core only
//! needs a typed CRUD + list interface with optimistic concurrency. This
//! module defines that interface as the [`ObjectStore`] trait, so
//! controllers can be written and tested against [`memory::MemoryStore`]
//! without ever depending on a live `kube::Client`/API server. A
//! production binary plugs in an adapter over `kube::Api<K>` — out of
//! scope here (§1), but the shape is exactly this trait.

pub mod memory;

use crate::entities::{Meta, PlacementKey};
use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use snafu::Snafu;

/// Any entity the store can hold must expose its [`Meta`], so the store
/// can read/write `resourceVersion`, generation, and finalizers uniformly.
pub trait StoredObject: Clone + Send + Sync + 'static {
    fn meta(&self) -> &Meta;
    fn meta_mut(&mut self) -> &mut Meta;
}

/// Identifies one object within a single type's namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn cluster_scoped(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    pub fn from_placement_key(key: &PlacementKey, name: impl Into<String>) -> Self {
        match key.namespace() {
            Some(ns) => Self::namespaced(ns.to_owned(), name),
            None => Self::cluster_scoped(name),
        }
    }
}

/// List scoping: an optional namespace restriction plus an optional label
/// selector (§4.1 "List operations support label selectors and namespace
/// scoping").
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub namespace: Option<String>,
    pub label_selector: Option<LabelSelector>,
}

impl ListOptions {
    pub fn in_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            label_selector: None,
        }
    }

    pub fn with_label_selector(mut self, selector: LabelSelector) -> Self {
        self.label_selector = Some(selector);
        self
    }
}

/// A patch to apply server-side. JSON Merge Patch covers status/annotation
/// updates; `JsonPatch` covers the ordered operations the work generator
/// applies from override snapshots (§4.6 step 2).
#[derive(Debug, Clone)]
pub enum Patch {
    Merge(serde_json::Value),
    Json(json_patch::Patch),
}

#[derive(Debug, Snafu)]
pub enum StoreError {
    #[snafu(display("object {key} not found"))]
    NotFound { key: String },

    /// The optimistic-concurrency mismatch referred to throughout §4/§7;
    /// [`crate::Error`] maps this straight into `Error::ConflictError`.
    #[snafu(display("conflicting update to {key}: observed resourceVersion {observed}"))]
    Conflict { key: String, observed: String },

    #[snafu(display("rejected write to {key}: {message}"))]
    Rejected { key: String, message: String },

    #[snafu(display("object store request failed: {message}"))]
    Transient { message: String },
}

/// Typed CRUD against the hub, with optimistic concurrency on every
/// mutation (§4.1).
#[async_trait]
pub trait ObjectStore<T: StoredObject>: Send + Sync {
    async fn get(&self, key: &ObjectKey) -> Result<Option<T>, StoreError>;

    async fn list(&self, options: &ListOptions) -> Result<Vec<T>, StoreError>;

    /// Create a new object. The caller must not set `resource_version`;
    /// the store assigns one.
    async fn create(&self, object: T) -> Result<T, StoreError>;

    /// Replace an object, keyed by the `resource_version` already present
    /// on `object.meta()`. Returns `StoreError::Conflict` if stale.
    async fn update(&self, object: T) -> Result<T, StoreError>;

    /// Apply a patch keyed by an observed `resource_version`.
    async fn patch(
        &self,
        key: &ObjectKey,
        resource_version: &str,
        patch: Patch,
    ) -> Result<T, StoreError>;

    /// Delete an object. `resource_version`, when given, must match or the
    /// call fails with `StoreError::Conflict` — this is how the eviction
    /// engine (§4.7) ensures two concurrent evictions cannot both consume
    /// the last unit of disruption budget.
    async fn delete(
        &self,
        key: &ObjectKey,
        resource_version: Option<&str>,
    ) -> Result<(), StoreError>;
}

macro_rules! impl_stored_object {
    ($($ty:ty),* $(,)?) => {
        $(
            impl StoredObject for $ty {
                fn meta(&self) -> &Meta {
                    &self.meta
                }

                fn meta_mut(&mut self) -> &mut Meta {
                    &mut self.meta
                }
            }
        )*
    };
}

impl_stored_object!(
    crate::entities::Placement,
    crate::entities::PolicySnapshot,
    crate::entities::ResourceSnapshot,
    crate::entities::Binding,
    crate::entities::WorkBundle,
    crate::entities::Eviction,
);
