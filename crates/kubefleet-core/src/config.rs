//! Per-process configuration, §6.
//!
//! CLI/flag parsing is out of scope (§1) — some binary hands a filled-in
//! [`ProcessConfig`] to the controllers. The shape here mirrors
//! `stackable-operator::config::fragment`'s philosophy of a plain struct
//! with a sensible [`Default`] and a `validate` pass, minus the
//! fragment-merge machinery that exists there to support product-config
//! overlays, which KubeFleet has no equivalent of.

use std::collections::BTreeSet;
use std::time::Duration;

/// GVK allow/skip-list is mutually exclusive (§6); this type enforces
/// that at the type level rather than leaving both `Vec`s settable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiFilter {
    Allowed(BTreeSet<Gvk>),
    Skipped(BTreeSet<Gvk>),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Gvk {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl ApiFilter {
    pub fn allows(&self, gvk: &Gvk) -> bool {
        match self {
            ApiFilter::Allowed(set) => set.contains(gvk),
            ApiFilter::Skipped(set) => !set.contains(gvk),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessConfig {
    /// Dynamic informer resync interval (default 10 min).
    pub resync_period: Duration,
    /// The rate gate of §4.2: minimum interval since the existing group's
    /// creation before a new one may be created.
    pub resource_snapshot_creation_minimum_interval: Duration,
    /// The rate gate of §4.2: minimum quiet period since the
    /// candidate-detection annotation was written.
    pub resource_changes_collection_duration: Duration,
    /// Scheduler worker pool size.
    pub max_concurrent_cluster_placement: usize,
    /// Upper bound influencing pool sizing.
    pub max_fleet_size_supported: usize,
    /// When a cluster is considered unavailable for scheduling purposes.
    pub cluster_unhealthy_threshold: Duration,
    /// GVK filter for the change detector (§4.8); `skippedPropagatingNamespaces`
    /// always includes `default` regardless of what is configured here.
    pub api_filter: ApiFilter,
    pub skipped_propagating_namespaces: BTreeSet<String>,
    /// Safety-net resync period for the placement reconciler (§4.3 step 7,
    /// "a long resync as a safety net"; §4.3 step 2, "re-queue after the
    /// safety resync period (~15-30 min)").
    pub safety_resync_period: Duration,
    /// Outer reconcile deadline, §5 "Cancellation & timeouts".
    pub reconcile_deadline: Duration,
}

/// Namespace always excluded from propagation regardless of configuration
/// (§6 "`skippedPropagatingNamespaces` — always includes `default`").
pub const ALWAYS_SKIPPED_NAMESPACE: &str = "default";

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            resync_period: Duration::from_secs(10 * 60),
            resource_snapshot_creation_minimum_interval: Duration::from_secs(30),
            resource_changes_collection_duration: Duration::from_secs(15),
            max_concurrent_cluster_placement: 10,
            max_fleet_size_supported: 100,
            cluster_unhealthy_threshold: Duration::from_secs(60),
            api_filter: ApiFilter::Skipped(BTreeSet::new()),
            skipped_propagating_namespaces: BTreeSet::new(),
            safety_resync_period: Duration::from_secs(15 * 60),
            reconcile_deadline: Duration::from_secs(30),
        }
    }
}

impl ProcessConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrent_cluster_placement == 0 {
            return Err("maxConcurrentClusterPlacement must be at least 1".to_string());
        }
        if self.max_fleet_size_supported == 0 {
            return Err("maxFleetSizeSupported must be at least 1".to_string());
        }
        Ok(())
    }

    pub fn namespace_is_skipped(&self, namespace: &str) -> bool {
        namespace == ALWAYS_SKIPPED_NAMESPACE
            || self.skipped_propagating_namespaces.contains(namespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_always_skips_the_default_namespace() {
        let config = ProcessConfig::default();
        assert!(config.namespace_is_skipped("default"));
        assert!(!config.namespace_is_skipped("team-a"));
    }

    #[test]
    fn allowed_filter_only_allows_listed_gvks() {
        let gvk = Gvk {
            group: "apps".into(),
            version: "v1".into(),
            kind: "Deployment".into(),
        };
        let filter = ApiFilter::Allowed([gvk.clone()].into_iter().collect());
        assert!(filter.allows(&gvk));
        assert!(!filter.allows(&Gvk {
            kind: "StatefulSet".into(),
            ..gvk
        }));
    }
}
