//! Snapshot manager, §4.2. Contracts the placement reconciler calls into
//! to get-or-create the latest policy snapshot and the latest resource
//! snapshot group.

pub mod policy;
pub mod resource;

pub use policy::PolicySnapshotManager;
pub use resource::{ResourceSelection, ResourceSnapshotManager, ResourceSnapshotOutcome};
