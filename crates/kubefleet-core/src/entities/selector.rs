//! Resource selectors, §3.1 and §4.8.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use serde::{Deserialize, Serialize};

/// One entry of a placement's `resourceSelectors` list: a GVK plus either
/// an exact name or a label selector. Selection runs these in order
/// (§4.2 "Resource selection runs the selectors against the hub");
/// matching against a changed object (§4.8) uses the same semantics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSelector {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub selector_kind: SelectorKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectorKind {
    Name(String),
    LabelSelector(LabelSelector),
}

/// A minimal view of an object for selector matching — just enough to
/// decide whether a [`ResourceSelector`] applies, without requiring the
/// full typed resource. The change detector (§4.8) builds this from
/// whatever dynamic object it observed; the snapshot manager (§4.2) builds
/// it while listing candidates from the hub.
#[derive(Debug, Clone)]
pub struct ObjectRef<'a> {
    pub group: &'a str,
    pub version: &'a str,
    pub kind: &'a str,
    pub namespace: Option<&'a str>,
    pub name: &'a str,
    pub labels: &'a std::collections::BTreeMap<String, String>,
}

impl ResourceSelector {
    /// Whether this selector matches the given object. GVK must match
    /// exactly; the name/label-selector branch then applies.
    pub fn matches(&self, object: &ObjectRef<'_>) -> bool {
        if self.group != object.group || self.version != object.version || self.kind != object.kind
        {
            return false;
        }
        match &self.selector_kind {
            SelectorKind::Name(name) => name == object.name,
            SelectorKind::LabelSelector(selector) => label_selector_matches(selector, object.labels),
        }
    }
}

/// Evaluate a Kubernetes `LabelSelector` (`matchLabels` + `matchExpressions`)
/// against a label map. This reimplements the small subset of
/// `k8s_openapi`'s selector semantics we need, since the full evaluator
/// lives in `kube`'s runtime feature and operates on live API objects
/// rather than the bare label maps the change detector and resource
/// selection work with.
pub fn label_selector_matches(
    selector: &LabelSelector,
    labels: &std::collections::BTreeMap<String, String>,
) -> bool {
    if let Some(match_labels) = &selector.match_labels {
        for (k, v) in match_labels {
            if labels.get(k) != Some(v) {
                return false;
            }
        }
    }
    if let Some(expressions) = &selector.match_expressions {
        for expr in expressions {
            let values = expr.values.clone().unwrap_or_default();
            let matches = match expr.operator.as_str() {
                "In" => labels.get(&expr.key).map(|v| values.contains(v)).unwrap_or(false),
                "NotIn" => !labels.get(&expr.key).map(|v| values.contains(v)).unwrap_or(false),
                "Exists" => labels.contains_key(&expr.key),
                "DoesNotExist" => !labels.contains_key(&expr.key),
                _ => false,
            };
            if !matches {
                return false;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn name_selector_matches_exact_name_only() {
        let selector = ResourceSelector {
            group: "apps".into(),
            version: "v1".into(),
            kind: "Deployment".into(),
            selector_kind: SelectorKind::Name("web".into()),
        };
        let matching = ObjectRef {
            group: "apps",
            version: "v1",
            kind: "Deployment",
            namespace: Some("default"),
            name: "web",
            labels: &BTreeMap::new(),
        };
        let mismatching = ObjectRef { name: "other", ..matching.clone() };
        assert!(selector.matches(&matching));
        assert!(!selector.matches(&mismatching));
    }

    impl<'a> Clone for ObjectRef<'a> {
        fn clone(&self) -> Self {
            ObjectRef {
                group: self.group,
                version: self.version,
                kind: self.kind,
                namespace: self.namespace,
                name: self.name,
                labels: self.labels,
            }
        }
    }

    #[test]
    fn label_selector_requires_all_match_labels() {
        let selector = LabelSelector {
            match_labels: Some(
                [("app".to_string(), "web".to_string())].into_iter().collect(),
            ),
            match_expressions: None,
        };
        assert!(label_selector_matches(&selector, &labels(&[("app", "web"), ("tier", "fe")])));
        assert!(!label_selector_matches(&selector, &labels(&[("tier", "fe")])));
    }

    #[test]
    fn match_expressions_in_and_exists() {
        use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelectorRequirement;
        let selector = LabelSelector {
            match_labels: None,
            match_expressions: Some(vec![
                LabelSelectorRequirement {
                    key: "env".into(),
                    operator: "In".into(),
                    values: Some(vec!["prod".into(), "staging".into()]),
                },
                LabelSelectorRequirement {
                    key: "team".into(),
                    operator: "Exists".into(),
                    values: None,
                },
            ]),
        };
        assert!(label_selector_matches(&selector, &labels(&[("env", "prod"), ("team", "a")])));
        assert!(!label_selector_matches(&selector, &labels(&[("env", "dev"), ("team", "a")])));
        assert!(!label_selector_matches(&selector, &labels(&[("env", "prod")])));
    }
}
