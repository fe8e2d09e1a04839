//! The KubeFleet control-plane pipeline.
//!
//! Five controllers share the entities and object-store adapter defined
//! in `kubefleet-core`:
//!
//! - [`reconciler`] — the placement reconciler (§4.3): select → snapshot →
//!   schedule → rollout → status.
//! - [`scheduler`] — the pluggable filter/score/select framework (§4.4).
//! - [`snapshot`] — the policy- and resource-snapshot managers (§4.2) the
//!   reconciler calls into.
//! - [`rollout`] — promotes bindings from the previous to the current
//!   resource snapshot under the rolling-update strategy (§4.5).
//! - [`workgen`] — materialises bindings into per-cluster work bundles
//!   (§4.6).
//! - [`eviction`] — validates and executes eviction requests under a
//!   disruption budget (§4.7).
//! - [`changedetect`] — watches arbitrary resources and enqueues affected
//!   placements (§4.8).
//!
//! Every reconcile is a short `async fn(...) -> Result<Action>`, the
//! "coroutine-style control flow" design note of §9: no hidden suspension,
//! blocking only at [`kubefleet_core::store::ObjectStore`] calls, which a
//! test can swap for [`kubefleet_core::store::memory::MemoryStore`].

pub mod action;
pub mod changedetect;
pub mod eviction;
pub mod reconciler;
pub mod rollout;
pub mod scheduler;
pub mod snapshot;
pub mod workgen;

pub use action::Action;
pub use kubefleet_core::error::{Error, Result};
