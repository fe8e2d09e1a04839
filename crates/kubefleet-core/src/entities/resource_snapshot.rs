//! Resource snapshot group, §3.3.
//!
//! A *group* is the logical unit ("all resources selected by one
//! placement at one point in time"); it is made up of one *master* object
//! plus zero or more *sub-indexed* sibling objects, split only when the
//! master would otherwise exceed the per-object size budget (§4.2).
//! [`ResourceSnapshot`] is the physical, stored object; [`ResourceSnapshotGroup`]
//! is the in-memory assembled view callers actually want.

use super::meta::Meta;
use crate::hash::ResourceIdentifier;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use serde::{Deserialize, Serialize};

/// A single selected resource's identity and raw bytes, as produced by
/// resource selection (§4.2) and consumed by the work generator (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectedResource {
    pub identifier: ResourceIdentifier,
    pub raw: Vec<u8>,
}

/// The per-object byte budget that triggers a split (§3.3: "~800 KiB").
pub const RESOURCE_SNAPSHOT_SIZE_BUDGET_BYTES: usize = 800 * 1024;

/// One physical resource-snapshot object: either the master (`sub_index
/// == None`) or a sub-indexed sibling. Only the master carries
/// `is_latest`, `resource_group_hash`, `number_of_resource_snapshots`,
/// `number_of_enveloped_objects` and the rate-gate detection time — §3.3,
/// §8 invariant 1/3 ("a sub-indexed resource snapshot cannot be latest").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub meta: Meta,
    pub index: u64,
    pub sub_index: Option<u32>,
    pub is_latest: bool,
    pub resource_group_hash: Option<String>,
    pub number_of_resource_snapshots: Option<u32>,
    pub number_of_enveloped_objects: Option<u32>,
    pub next_resource_snapshot_candidate_detection_time: Option<Time>,
    pub resources: Vec<SelectedResource>,
}

impl ResourceSnapshot {
    pub fn is_master(&self) -> bool {
        self.sub_index.is_none()
    }

    pub fn name_for(placement_name: &str, index: u64, sub_index: Option<u32>) -> String {
        match sub_index {
            None => format!("{placement_name}-{index}"),
            Some(s) => format!("{placement_name}-{index}-{s}"),
        }
    }
}

/// The assembled logical group: a master plus its siblings, ordered by
/// sub-index ascending, exactly as the work generator needs to
/// concatenate them (§4.6 step 1).
#[derive(Debug, Clone)]
pub struct ResourceSnapshotGroup {
    pub index: u64,
    pub master: ResourceSnapshot,
    pub siblings: Vec<ResourceSnapshot>,
}

impl ResourceSnapshotGroup {
    pub fn is_latest(&self) -> bool {
        self.master.is_latest
    }

    /// All selected resources across master + siblings, in the order the
    /// splitter originally assembled them — §8 "Splitting then
    /// concatenating resources is the identity."
    pub fn all_resources(&self) -> Vec<&SelectedResource> {
        let mut out: Vec<&SelectedResource> = self.master.resources.iter().collect();
        let mut ordered_siblings = self.siblings.iter().collect::<Vec<_>>();
        ordered_siblings.sort_by_key(|s| s.sub_index.unwrap_or(u32::MAX));
        for sibling in ordered_siblings {
            out.extend(sibling.resources.iter());
        }
        out
    }

    pub fn number_of_resource_snapshots(&self) -> u32 {
        self.master.number_of_resource_snapshots.unwrap_or(1)
    }
}
