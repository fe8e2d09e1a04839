//! The work generator, §4.6: turns a binding's resource snapshot group
//! into the per-cluster [`WorkBundle`] objects the member-side applier
//! consumes, applying any attached overrides along the way.

use async_trait::async_trait;
use kubefleet_core::entities::{
    ApplyStrategy, Binding, Meta, ResourceSnapshotGroup, SelectedResource, WorkBundle, WorkBundleStatus,
};
use kubefleet_core::labels::{
    APPLY_STRATEGY_ANNOTATION, BINDING_NAME_LABEL, OWNER_PLACEMENT_LABEL, RESOURCE_INDEX_LABEL, SUB_INDEX_LABEL,
    TARGET_CLUSTER_LABEL,
};
use kubefleet_core::store::{ListOptions, ObjectKey, ObjectStore};
use kubefleet_core::Error;
use tracing::warn;

/// Fetches the ordered JSON-patch document an override snapshot (named on
/// a binding) carries. The override CRDs themselves live outside this
/// crate's scope (§1); this trait is the seam, the same shape as
/// [`crate::reconciler::ResourceSelectionSource`].
#[async_trait]
pub trait OverrideSource: Send + Sync {
    async fn fetch(&self, name: &str) -> Result<Vec<serde_json::Value>, Error>;
}

/// An override source with nothing registered; every name resolves to no
/// patch operations. Useful for tests and for placements with no
/// overrides configured.
pub struct NoOverrides;

#[async_trait]
impl OverrideSource for NoOverrides {
    async fn fetch(&self, _name: &str) -> Result<Vec<serde_json::Value>, Error> {
        Ok(Vec::new())
    }
}

/// Reject patch operations that touch type-meta, `/status`, or anywhere
/// under `/metadata` other than annotations/labels (§4.6 step 2).
fn validate_patch_path(path: &str) -> Result<(), Error> {
    let forbidden = path == "/apiVersion"
        || path == "/kind"
        || path == "/status"
        || path.starts_with("/status/")
        || (path.starts_with("/metadata/")
            && !path.starts_with("/metadata/annotations")
            && !path.starts_with("/metadata/labels"));
    if forbidden {
        return Err(Error::UserError {
            message: format!("override patch targets a disallowed path: {path}"),
        });
    }
    Ok(())
}

fn apply_overrides(raw: &[u8], ops: &[serde_json::Value]) -> Result<Vec<u8>, Error> {
    if ops.is_empty() {
        return Ok(raw.to_vec());
    }
    for op in ops {
        if let Some(path) = op.get("path").and_then(serde_json::Value::as_str) {
            validate_patch_path(path)?;
        }
    }
    let mut document: serde_json::Value =
        serde_json::from_slice(raw).map_err(|e| Error::UserError {
            message: format!("resource manifest is not valid JSON: {e}"),
        })?;
    let patch: json_patch::Patch =
        serde_json::from_value(serde_json::Value::Array(ops.to_vec())).map_err(|e| Error::UserError {
            message: format!("override is not a well-formed JSON patch: {e}"),
        })?;
    json_patch::patch(&mut document, &patch).map_err(|e| Error::UserError {
        message: format!("override patch failed to apply: {e}"),
    })?;
    serde_json::to_vec(&document).map_err(|e| Error::UnexpectedBehaviorError {
        key: String::new(),
        message: format!("failed to re-serialize patched resource: {e}"),
    })
}

async fn resolve_ops(
    overrides: &dyn OverrideSource,
    names: &[String],
) -> Result<Vec<serde_json::Value>, Error> {
    let mut ops = Vec::new();
    for name in names {
        ops.extend(overrides.fetch(name).await?);
    }
    Ok(ops)
}

fn apply_all(resources: &[SelectedResource], ops: &[serde_json::Value]) -> Result<Vec<u8>, Error> {
    let mut manifests = Vec::new();
    for resource in resources {
        let patched = apply_overrides(&resource.raw, ops)?;
        manifests.extend(patched);
        manifests.push(b'\n');
    }
    Ok(manifests)
}

pub struct WorkGenerator<'a> {
    overrides: &'a dyn OverrideSource,
    work: &'a dyn ObjectStore<WorkBundle>,
}

impl<'a> WorkGenerator<'a> {
    pub fn new(overrides: &'a dyn OverrideSource, work: &'a dyn ObjectStore<WorkBundle>) -> Self {
        Self { overrides, work }
    }

    /// One binding's worth of work, §4.6 steps 1-3. `namespace` is the
    /// per-member namespace work objects for this cluster are placed in;
    /// `apply_strategy` is the placement's configured strategy, carried
    /// onto every emitted bundle (§6).
    pub async fn generate(
        &self,
        binding: &Binding,
        placement_name: &str,
        group: &ResourceSnapshotGroup,
        namespace: &str,
        apply_strategy: ApplyStrategy,
    ) -> Result<Vec<WorkBundle>, Error> {
        let mut ops = resolve_ops(self.overrides, &binding.spec.cluster_resource_override_snapshots).await?;
        ops.extend(resolve_ops(self.overrides, &binding.spec.resource_override_snapshots).await?);

        let mut bundles = Vec::with_capacity(1 + group.siblings.len());
        bundles.push(self.build_bundle(
            binding,
            placement_name,
            group.index,
            None,
            &group.master.resources,
            &ops,
            namespace,
            apply_strategy,
        )?);
        let mut siblings = group.siblings.iter().collect::<Vec<_>>();
        siblings.sort_by_key(|s| s.sub_index.unwrap_or(u32::MAX));
        for sibling in siblings {
            bundles.push(self.build_bundle(
                binding,
                placement_name,
                group.index,
                sibling.sub_index,
                &sibling.resources,
                &ops,
                namespace,
                apply_strategy,
            )?);
        }

        for bundle in &bundles {
            let key = ObjectKey::namespaced(namespace.to_string(), bundle.meta.name.clone());
            match self.work.get(&key).await? {
                Some(_) => {
                    self.work.update(bundle.clone()).await?;
                }
                None => {
                    self.work.create(bundle.clone()).await?;
                }
            }
        }

        self.collect_superseded(binding, namespace, group.index).await?;
        Ok(bundles)
    }

    #[allow(clippy::too_many_arguments)]
    fn build_bundle(
        &self,
        binding: &Binding,
        placement_name: &str,
        resource_index: u64,
        sub_index: Option<u32>,
        resources: &[SelectedResource],
        ops: &[serde_json::Value],
        namespace: &str,
        apply_strategy: ApplyStrategy,
    ) -> Result<WorkBundle, Error> {
        let manifests = apply_all(resources, ops)?;
        let name = WorkBundle::name_for(&binding.meta.name, sub_index);
        let mut labels = std::collections::BTreeMap::new();
        labels.insert(OWNER_PLACEMENT_LABEL.to_string(), placement_name.to_string());
        labels.insert(BINDING_NAME_LABEL.to_string(), binding.meta.name.clone());
        labels.insert(TARGET_CLUSTER_LABEL.to_string(), binding.spec.target_cluster.clone());
        labels.insert(RESOURCE_INDEX_LABEL.to_string(), resource_index.to_string());
        if let Some(s) = sub_index {
            labels.insert(SUB_INDEX_LABEL.to_string(), s.to_string());
        }
        let mut annotations = std::collections::BTreeMap::new();
        annotations.insert(APPLY_STRATEGY_ANNOTATION.to_string(), apply_strategy.to_string());
        Ok(WorkBundle {
            meta: Meta {
                name,
                namespace: Some(namespace.to_string()),
                labels,
                annotations,
                ..Default::default()
            },
            binding_name: binding.meta.name.clone(),
            placement_name: placement_name.to_string(),
            resource_snapshot_name: binding.spec.resource_snapshot_name.clone(),
            resource_index,
            sub_index,
            apply_strategy,
            manifests,
            status: WorkBundleStatus::default(),
        })
    }

    /// §4.6 step 4: once the member applier has confirmed availability of
    /// a bundle, earlier resource-index generations belonging to the same
    /// binding are no longer needed.
    async fn collect_superseded(&self, binding: &Binding, namespace: &str, current_index: u64) -> Result<(), Error> {
        let mut options = ListOptions::default().with_label_selector(
            k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector {
                match_labels: None,
                match_expressions: Some(vec![
                    k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelectorRequirement {
                        key: BINDING_NAME_LABEL.to_string(),
                        operator: "In".to_string(),
                        values: Some(vec![binding.meta.name.clone()]),
                    },
                ]),
            },
        );
        options.namespace = Some(namespace.to_string());
        for existing in self.work.list(&options).await? {
            if existing.resource_index == current_index {
                continue;
            }
            let available = existing.status.available.unwrap_or(false);
            if !available {
                continue;
            }
            let key = ObjectKey::namespaced(namespace.to_string(), existing.meta.name.clone());
            if let Err(err) = self.work.delete(&key, Some(&existing.meta.resource_version)).await {
                warn!(error = %err, bundle = %existing.meta.name, "failed to garbage-collect superseded work bundle");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubefleet_core::entities::{BindingSpec, BindingState, BindingStatus, ResourceSnapshot};
    use kubefleet_core::hash::ResourceIdentifier;
    use kubefleet_core::store::memory::MemoryStore;

    fn resource(name: &str, body: serde_json::Value) -> SelectedResource {
        SelectedResource {
            identifier: ResourceIdentifier {
                group: String::new(),
                version: "v1".to_string(),
                kind: "ConfigMap".to_string(),
                namespace: Some("default".to_string()),
                name: name.to_string(),
            },
            raw: serde_json::to_vec(&body).unwrap(),
        }
    }

    fn binding() -> Binding {
        Binding {
            meta: Meta {
                name: "web-cluster-a".to_string(),
                ..Default::default()
            },
            spec: BindingSpec {
                target_cluster: "cluster-a".to_string(),
                scheduling_policy_snapshot_name: "web-1".to_string(),
                resource_snapshot_name: "web-1".to_string(),
                cluster_resource_override_snapshots: Vec::new(),
                resource_override_snapshots: Vec::new(),
            },
            state: BindingState::Bound,
            status: BindingStatus::default(),
        }
    }

    fn group() -> ResourceSnapshotGroup {
        let body = serde_json::json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "cfg"}, "data": {"k": "v"}});
        ResourceSnapshotGroup {
            index: 1,
            master: ResourceSnapshot {
                meta: Meta {
                    name: "web-1".to_string(),
                    ..Default::default()
                },
                index: 1,
                sub_index: None,
                is_latest: true,
                resource_group_hash: Some("abc".to_string()),
                number_of_resource_snapshots: Some(1),
                number_of_enveloped_objects: Some(1),
                next_resource_snapshot_candidate_detection_time: None,
                resources: vec![resource("cfg", body)],
            },
            siblings: Vec::new(),
        }
    }

    #[tokio::test]
    async fn generates_one_bundle_for_an_unsplit_group() {
        let work = MemoryStore::<WorkBundle>::new();
        let generator = WorkGenerator::new(&NoOverrides, &work);
        let bundles = generator
            .generate(&binding(), "web", &group(), "member-cluster-a", ApplyStrategy::ServerSideApply)
            .await
            .unwrap();
        assert_eq!(bundles.len(), 1);
        assert_eq!(bundles[0].meta.name, "web-cluster-a-master");
        assert!(String::from_utf8_lossy(&bundles[0].manifests).contains("cfg"));
        assert_eq!(bundles[0].apply_strategy, ApplyStrategy::ServerSideApply);
        assert_eq!(
            bundles[0].meta.annotations.get(APPLY_STRATEGY_ANNOTATION).map(String::as_str),
            Some("ServerSideApply")
        );
    }

    struct RenameOverride;
    #[async_trait]
    impl OverrideSource for RenameOverride {
        async fn fetch(&self, _name: &str) -> Result<Vec<serde_json::Value>, Error> {
            Ok(vec![serde_json::json!({
                "op": "add", "path": "/metadata/labels/region", "value": "eu"
            })])
        }
    }

    #[tokio::test]
    async fn applies_label_overrides() {
        let work = MemoryStore::<WorkBundle>::new();
        let mut b = binding();
        b.spec.resource_override_snapshots.push("override-1".to_string());
        let generator = WorkGenerator::new(&RenameOverride, &work);
        let bundles = generator
            .generate(&b, "web", &group(), "member-cluster-a", ApplyStrategy::ClientSideApply)
            .await
            .unwrap();
        assert!(String::from_utf8_lossy(&bundles[0].manifests).contains("\"region\":\"eu\""));
    }

    struct ForbiddenOverride;
    #[async_trait]
    impl OverrideSource for ForbiddenOverride {
        async fn fetch(&self, _name: &str) -> Result<Vec<serde_json::Value>, Error> {
            Ok(vec![serde_json::json!({"op": "replace", "path": "/status/ready", "value": true})])
        }
    }

    #[tokio::test]
    async fn rejects_a_status_patch() {
        let work = MemoryStore::<WorkBundle>::new();
        let mut b = binding();
        b.spec.resource_override_snapshots.push("override-1".to_string());
        let generator = WorkGenerator::new(&ForbiddenOverride, &work);
        let result = generator
            .generate(&b, "web", &group(), "member-cluster-a", ApplyStrategy::ClientSideApply)
            .await;
        assert!(result.is_err());
    }
}
