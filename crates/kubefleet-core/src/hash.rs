//! Content hashing, §4.2 and §8 "Hashing a policy or resource set is
//! stable under insertion order that preserves the canonical ordering".
//!
//! We hash the canonical JSON serialisation of already-sorted data rather
//! than raw bytes handed to us in arbitrary order, so that two callers who
//! observe the same logical set in different enumeration orders (e.g. two
//! list calls against the hub racing a concurrent write) produce the same
//! hash.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// A content hash, hex-encoded. Equality is what matters; the `Display`
/// impl is purely for embedding the value into annotations (`policyHash`,
/// `resourceGroupHash`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hasher.finalize().into())
    }

    /// Hash a value via its canonical (stable field order, via `serde_json`
    /// map sorting being opt-in) JSON encoding. Callers are responsible for
    /// sorting any collections embedded in `value` themselves — see
    /// [`canonical_cluster_order`] / [`canonical_resource_order`].
    pub fn of_json<T: Serialize>(value: &T) -> Self {
        // serde_json::to_vec does not sort map keys by default; the
        // structs we hash here are tuples/vecs/structs with a fixed field
        // order, so this is already canonical for our use.
        let bytes = serde_json::to_vec(value).expect("hashable policy/resource value");
        Self::of(&bytes)
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Concatenate raw resource bytes in the canonical
/// `(group, version, kind, namespace, name)` ascending order required by
/// §8, then hash the result. `identifier` is `(group, version, kind,
/// namespace, name)`; `raw` is the resource's serialised bytes.
pub fn hash_resource_set<'a>(
    resources: impl IntoIterator<Item = &'a (ResourceIdentifier, Vec<u8>)>,
) -> ContentHash {
    let mut sorted: Vec<&(ResourceIdentifier, Vec<u8>)> = resources.into_iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = Sha256::new();
    for (id, bytes) in sorted {
        hasher.update(id.group.as_bytes());
        hasher.update([0]);
        hasher.update(id.version.as_bytes());
        hasher.update([0]);
        hasher.update(id.kind.as_bytes());
        hasher.update([0]);
        hasher.update(id.namespace.as_deref().unwrap_or("").as_bytes());
        hasher.update([0]);
        hasher.update(id.name.as_bytes());
        hasher.update([0]);
        hasher.update(bytes);
        hasher.update([0xff]);
    }
    ContentHash(hasher.finalize().into())
}

/// Identifies one selected resource for hashing/splitting purposes.
/// Deliberately duplicated (rather than re-exported) from
/// `entities::resource_snapshot` to keep this module free of entity
/// dependencies; `entities` re-exports this type as the canonical one.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceIdentifier {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}
