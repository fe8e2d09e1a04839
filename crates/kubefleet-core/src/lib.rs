//! Entities, object-store adapter and queueing primitives shared by every
//! KubeFleet controller.
//!
//! This crate deliberately knows nothing about *how* a placement gets
//! scheduled, rolled out or evicted — that lives in `kubefleet-controller`.
//! What it owns is the vocabulary those controllers share: the typed
//! entities of the data model, the [`store::ObjectStore`] trait the hub is
//! observed through, the de-duplicating work queue, the condition ladder,
//! content hashing, and process-wide configuration.

pub mod condition;
pub mod config;
pub mod entities;
pub mod error;
pub mod hash;
pub mod labels;
pub mod queue;
pub mod store;

pub use error::{Error, Result};

// Re-export the Kubernetes primitives our entities are built on, the way
// `stackable-operator` re-exports `k8s_openapi`/`kube` for downstream crates.
pub use k8s_openapi;
pub use kube;
