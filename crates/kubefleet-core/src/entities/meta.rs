//! Shared object metadata and the placement key, §3 and §9.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{OwnerReference, Time};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The canonical identity of a placement (and, by extension, of every
/// entity keyed off it): `"name"` for cluster-scoped placements,
/// `"namespace/name"` for namespaced ones (§3.1).
///
/// This is the key the work queue de-duplicates on (§4.1) and the key
/// every `UnexpectedBehaviorError`/`ConflictError` is reported against.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PlacementKey {
    namespace: Option<String>,
    name: String,
}

impl PlacementKey {
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

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn is_namespaced(&self) -> bool {
        self.namespace.is_some()
    }
}

impl fmt::Display for PlacementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}/{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

impl std::str::FromStr for PlacementKey {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.split_once('/') {
            Some((ns, name)) => PlacementKey::namespaced(ns, name),
            None => PlacementKey::cluster_scoped(s),
        })
    }
}

/// Metadata common to every entity in the data model: the optimistic
/// concurrency token, the generation counter, ownership, and finalizers
/// (§3 preamble, §9 "cyclic ownership avoided": owner references point by
/// name, never by pointer).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Meta {
    pub name: String,
    pub namespace: Option<String>,
    /// Optimistic-concurrency token; every `Update`/`Patch`/`Delete` call
    /// through [`crate::store::ObjectStore`] must carry the value last
    /// observed here (§4.1).
    pub resource_version: String,
    /// Monotonic counter bumped by the store on spec change (§3.1).
    pub generation: i64,
    pub owner_references: Vec<OwnerReference>,
    pub finalizers: Vec<String>,
    pub annotations: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub creation_timestamp: Option<Time>,
    pub deletion_timestamp: Option<Time>,
}

impl Meta {
    pub fn key(&self) -> PlacementKey {
        match &self.namespace {
            Some(ns) => PlacementKey::namespaced(ns.clone(), self.name.clone()),
            None => PlacementKey::cluster_scoped(self.name.clone()),
        }
    }

    pub fn is_deleting(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers.iter().any(|f| f == finalizer)
    }

    pub fn add_finalizer(&mut self, finalizer: &str) {
        if !self.has_finalizer(finalizer) {
            self.finalizers.push(finalizer.to_owned());
        }
    }

    pub fn remove_finalizer(&mut self, finalizer: &str) {
        self.finalizers.retain(|f| f != finalizer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_round_trips_through_from_str() {
        let cluster_scoped = PlacementKey::cluster_scoped("fleet-a");
        assert_eq!(cluster_scoped.to_string(), "fleet-a");
        assert_eq!(cluster_scoped.to_string().parse::<PlacementKey>().unwrap(), cluster_scoped);

        let namespaced = PlacementKey::namespaced("team-a", "fleet-a");
        assert_eq!(namespaced.to_string(), "team-a/fleet-a");
        assert_eq!(namespaced.to_string().parse::<PlacementKey>().unwrap(), namespaced);
    }
}
