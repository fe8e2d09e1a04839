//! Work bundle, §3.5 and §4.6.

use super::meta::Meta;
use super::policy::ApplyStrategy;
use serde::{Deserialize, Serialize};

/// One (binding, sub-index) delivery object placed in a per-member
/// namespace. The core only produces these; it never interprets the
/// applier's results beyond the availability/diff conditions it reads
/// back onto the binding (§3.5 "The core treats it as an output").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkBundle {
    pub meta: Meta,
    pub binding_name: String,
    pub placement_name: String,
    pub resource_snapshot_name: String,
    pub resource_index: u64,
    pub sub_index: Option<u32>,
    pub apply_strategy: ApplyStrategy,
    /// Concatenated raw manifest bytes for this bundle's slice of the
    /// resource snapshot (§6 "Wire format of work output").
    pub manifests: Vec<u8>,
    pub status: WorkBundleStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkBundleStatus {
    pub applied: Option<bool>,
    pub available: Option<bool>,
    pub diff_reported: Option<bool>,
}

impl WorkBundle {
    pub fn name_for(binding_name: &str, sub_index: Option<u32>) -> String {
        match sub_index {
            None => format!("{binding_name}-master"),
            Some(s) => format!("{binding_name}-{s}"),
        }
    }
}
