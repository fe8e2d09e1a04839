//! The data model, `spec.md` §3.
//!
//! Entities are plain structs; they do not know how to talk to the object
//! store (that is [`crate::store::ObjectStore`]'s job), and they expose no
//! pointers to each other — per the §9 design note "cyclic ownership
//! avoided", cross-entity references are always name strings
//! (`scheduling_policy_snapshot_name`, `resource_snapshot_name`, ...)
//! resolved through a name-keyed cache at the call site.
//!
//! Cluster-scoped and namespaced variants of placement/binding/snapshot
//! share one struct each; scope is carried as `Option<String>` on the
//! namespace field, per the §9 "polymorphism over scope" design note. The
//! [`PlacementKey`]/capability accessors are what let the rest of the
//! codebase stay scope-agnostic.

pub mod binding;
pub mod cluster;
pub mod eviction;
pub mod meta;
pub mod placement;
pub mod policy;
pub mod policy_snapshot;
pub mod resource_snapshot;
pub mod selector;
pub mod work;

pub use binding::{Binding, BindingSpec, BindingState, BindingStatus};
pub use cluster::{ClusterHealth, ClusterTaint, MemberCluster};
pub use eviction::{Eviction, EvictionSpec, EvictionStatus};
pub use meta::{Meta, PlacementKey};
pub use placement::{ClusterPlacementStatus, Placement, PlacementSpec, PlacementStatus};
pub use policy::{
    resolve_int_or_string, ApplyStrategy, ClusterAffinity, DeletePolicy, DisruptionBudget, Policy,
    RolloutStrategy, Toleration, TopologySpreadConstraint,
};
pub use policy_snapshot::{ClusterDecision, PolicySnapshot, PolicySnapshotSpec, PolicySnapshotStatus};
pub use resource_snapshot::{
    ResourceSnapshot, ResourceSnapshotGroup, SelectedResource, RESOURCE_SNAPSHOT_SIZE_BUDGET_BYTES,
};
pub use selector::{ObjectRef, ResourceSelector, SelectorKind};
pub use work::{WorkBundle, WorkBundleStatus};

/// Finalizer placed on a placement so the reconciler observes deletion
/// before the store garbage-collects it (§4.3 step 1).
pub const PLACEMENT_CLEANUP_FINALIZER: &str = "kubefleet.io/placement-cleanup";

/// Finalizer placed on a binding; removed by the scheduler during
/// placement deletion unless `deletePolicy=Keep` (§4.4 "Placement
/// deletion").
pub const SCHEDULER_BINDING_CLEANUP_FINALIZER: &str = "kubefleet.io/scheduler-binding-cleanup";
