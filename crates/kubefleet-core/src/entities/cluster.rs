//! Member cluster inventory record consumed by the scheduler framework,
//! §4.4. This is the only view the scheduler has of a member cluster; the
//! property providers that actually populate resource usage / geography
//! are out of scope (§1).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterHealth {
    Healthy,
    Unhealthy,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberCluster {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub taints: Vec<ClusterTaint>,
    pub health: ClusterHealth,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterTaint {
    pub key: String,
    pub value: Option<String>,
    pub effect: String,
}

impl MemberCluster {
    pub fn is_eligible(&self) -> bool {
        matches!(self.health, ClusterHealth::Healthy)
    }
}
