//! Eviction, §3.6.

use super::meta::Meta;
use crate::condition::{ConditionSet, ConditionStatus, EvictionConditionType};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvictionSpec {
    pub placement_name: String,
    pub cluster_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvictionStatus {
    pub conditions: ConditionSet<EvictionConditionType>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Eviction {
    pub meta: Meta,
    pub spec: EvictionSpec,
    pub status: EvictionStatus,
}

impl Eviction {
    /// Terminal once `Executed` is set True, or `Valid` is set False
    /// (§3.6).
    pub fn is_terminal(&self) -> bool {
        let executed_true = self
            .status
            .conditions
            .get(EvictionConditionType::Executed)
            .is_some_and(|c| c.status.is_true());
        let valid_false = self
            .status
            .conditions
            .get(EvictionConditionType::Valid)
            .is_some_and(|c| c.status == ConditionStatus::False);
        executed_true || valid_false
    }
}
