//! Error taxonomy, §7 of the design.
//!
//! Four kinds of failure can reach a controller: a malformed or
//! semantically invalid input (`UserError`), a transient store failure
//! (`ApiServerError`), an optimistic-concurrency mismatch (`ConflictError`),
//! and a violated invariant (`UnexpectedBehaviorError`). Keeping them as
//! distinct variants lets callers decide retry policy without string
//! matching, mirroring how `stackable-operator`'s `status::rollout` module
//! separates "not yet observed" from "has outdated replicas".

use snafu::Snafu;

/// Result alias used throughout the KubeFleet crates.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// Malformed or semantically invalid input: a bad resource selector, an
    /// illegal disruption budget for the placement's policy type, and so
    /// on. Surfaced as a `False` condition on the owning entity; the
    /// reconciler re-queues only at the long resync interval, never with
    /// backoff, since retrying sooner cannot fix user input.
    #[snafu(display("invalid input: {message}"))]
    UserError { message: String },

    /// A transient failure talking to the object store (the hub). Retried
    /// with rate-limited backoff.
    #[snafu(display("object store request failed: {source}"))]
    ApiServerError { source: crate::store::StoreError },

    /// An optimistic-concurrency mismatch: the caller's observed
    /// `resourceVersion` no longer matches the stored one. Retried
    /// immediately once, then with normal backoff.
    #[snafu(display(
        "conflicting update to {key}: observed resourceVersion {observed:?} is stale"
    ))]
    ConflictError { key: String, observed: String },

    /// An invariant from §3/§8 was violated (e.g. two snapshots both
    /// carrying the latest marker). Logged loudly; the offending key is
    /// dropped and re-queued after a long backoff. The system recovers by
    /// re-establishing the invariant on the next reconcile rather than
    /// patching it in place.
    #[snafu(display("invariant violated for {key}: {message}"))]
    UnexpectedBehaviorError { key: String, message: String },
}

impl Error {
    /// User errors never propagate above the reconciler that produced
    /// them (§7 "Propagation"); this is how a reconciler distinguishes
    /// "write a False condition and move on" from "retry".
    pub fn is_user_error(&self) -> bool {
        matches!(self, Error::UserError { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::ConflictError { .. })
    }

    pub fn is_unexpected_behavior(&self) -> bool {
        matches!(self, Error::UnexpectedBehaviorError { .. })
    }
}

impl From<crate::store::StoreError> for Error {
    fn from(source: crate::store::StoreError) -> Self {
        match source {
            crate::store::StoreError::Conflict { key, observed } => {
                Error::ConflictError { key, observed }
            }
            other => Error::ApiServerError { source: other },
        }
    }
}
