//! Well-known label and annotation keys, grounded on
//! `stackable-operator::kvp::consts`'s key-naming convention (a flat list
//! of `pub const` strings rather than a builder).

/// Placed on every snapshot/binding/work object so it can be listed by
/// owning placement without depending on owner-reference traversal.
pub const OWNER_PLACEMENT_LABEL: &str = "kubefleet.io/placement-name";

/// Placed on a binding so work objects and the eviction engine can list by
/// target cluster.
pub const TARGET_CLUSTER_LABEL: &str = "kubefleet.io/target-cluster";

/// Placed on work objects so the member-side applier (out of scope, §1)
/// can report results back against the right binding/resource-index/
/// sub-index (§6 "Wire format of work output").
pub const BINDING_NAME_LABEL: &str = "kubefleet.io/binding-name";
pub const RESOURCE_INDEX_LABEL: &str = "kubefleet.io/resource-index";
pub const SUB_INDEX_LABEL: &str = "kubefleet.io/sub-index";

/// Annotation carrying the normalised-policy hash (§3.2/§4.2).
pub const POLICY_HASH_ANNOTATION: &str = "kubefleet.io/policy-hash";
/// Annotation carrying `observedPlacementGeneration` (§3.2).
pub const OBSERVED_PLACEMENT_GENERATION_ANNOTATION: &str =
    "kubefleet.io/observed-placement-generation";
/// Annotation carrying `numberOfClusters` for `PickN` (§3.2).
pub const NUMBER_OF_CLUSTERS_ANNOTATION: &str = "kubefleet.io/number-of-clusters";

/// Annotations on the master resource snapshot (§3.3).
pub const RESOURCE_GROUP_HASH_ANNOTATION: &str = "kubefleet.io/resource-group-hash";
pub const NUMBER_OF_RESOURCE_SNAPSHOTS_ANNOTATION: &str =
    "kubefleet.io/number-of-resource-snapshots";
pub const NUMBER_OF_ENVELOPED_OBJECTS_ANNOTATION: &str = "kubefleet.io/number-of-enveloped-objects";
pub const NEXT_RESOURCE_SNAPSHOT_CANDIDATE_DETECTION_TIME_ANNOTATION: &str =
    "kubefleet.io/next-resource-snapshot-candidate-detection-time";
/// Annotation on a sub-indexed sibling (§3.3).
pub const SUBINDEX_OF_RESOURCE_SNAPSHOT_ANNOTATION: &str =
    "kubefleet.io/subindex-of-resource-snapshot";

/// Annotation carrying the apply strategy on an emitted work bundle (§6).
pub const APPLY_STRATEGY_ANNOTATION: &str = "kubefleet.io/apply-strategy";
