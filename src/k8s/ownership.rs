//! The Ownership Filter (§4.3): decides whether an Ingress is ours.

use k8s_openapi::api::networking::v1::{Ingress, IngressClass};
use kube::ResourceExt;

use super::object::NamespacedName;

/// Ingresses carrying this label always belong to us — they route ACME
/// HTTP-01 challenge traffic and must be exposed before any TLS material
/// exists (§4.3 special case).
pub const HTTP01_SOLVER_LABEL: &str = "acme.cert-manager.io/http01-solver";

/// Legacy, pre-`IngressClass` annotation. Present ⇒ it wins over
/// `spec.ingressClassName` (§4.3.3).
pub const LEGACY_CLASS_ANNOTATION: &str = "kubernetes.io/ingress.class";

/// Marks an `IngressClass` as the cluster default (§3, §4.3.2).
pub const DEFAULT_CLASS_ANNOTATION: &str = "ingressclass.kubernetes.io/is-default-class";

pub fn is_http01_solver(ingress: &Ingress) -> bool {
    ingress
        .labels()
        .get(HTTP01_SOLVER_LABEL)
        .map(|v| v == "true")
        .unwrap_or(false)
}

fn legacy_class_name(ingress: &Ingress) -> Option<&str> {
    ingress
        .annotations()
        .get(LEGACY_CLASS_ANNOTATION)
        .map(String::as_str)
}

/// The class name this Ingress effectively asks for: the legacy annotation
/// if present, else `spec.ingressClassName`.
pub fn effective_class_name(ingress: &Ingress) -> Option<&str> {
    legacy_class_name(ingress).or_else(|| {
        ingress
            .spec
            .as_ref()
            .and_then(|s| s.ingress_class_name.as_deref())
    })
}

pub fn is_default_class(class: &IngressClass) -> bool {
    class
        .annotations()
        .get(DEFAULT_CLASS_ANNOTATION)
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

pub fn controller_name_of(class: &IngressClass) -> Option<&str> {
    class
        .spec
        .as_ref()
        .and_then(|s| s.controller.as_deref())
}

/// Is `class` implemented by us?
pub fn class_is_ours(class: &IngressClass, our_controller_name: &str) -> bool {
    controller_name_of(class) == Some(our_controller_name)
}

/// §4.3: is this Ingress ours?
pub fn is_owned(ingress: &Ingress, classes: &[IngressClass], our_controller_name: &str) -> bool {
    is_http01_solver(ingress) || resolve_class(ingress, classes, our_controller_name).is_some()
}

/// The `IngressClass` that makes `ingress` ours, if any — by explicit name
/// match, or as the cluster default when the Ingress names none. Returns
/// `None` for an Ingress owned only via the HTTP-01 solver label, since
/// that ownership path carries no class.
pub fn resolve_class<'a>(
    ingress: &Ingress,
    classes: &'a [IngressClass],
    our_controller_name: &str,
) -> Option<&'a IngressClass> {
    match effective_class_name(ingress) {
        Some(name) => classes
            .iter()
            .find(|c| c.name_any() == name && class_is_ours(c, our_controller_name)),
        None => classes
            .iter()
            .find(|c| class_is_ours(c, our_controller_name) && is_default_class(c)),
    }
}

/// Every Ingress name among `ingresses` whose ownership *might* have
/// flipped because `changed_class` was added, modified, or deleted
/// (§4.5): those naming it explicitly, plus — conservatively, since
/// default-ness may have just changed — every unclassed Ingress.
pub fn affected_by_class_change(
    changed_class_name: &str,
    ingresses: &[(NamespacedName, Ingress)],
) -> Vec<NamespacedName> {
    ingresses
        .iter()
        .filter(|(_, ing)| match effective_class_name(ing) {
            Some(name) => name == changed_class_name,
            None => true,
        })
        .map(|(key, _)| key.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::networking::v1::{IngressClassSpec, IngressSpec};
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    fn ingress_with(class_name: Option<&str>, legacy: Option<&str>) -> Ingress {
        let mut annotations = BTreeMap::new();
        if let Some(v) = legacy {
            annotations.insert(LEGACY_CLASS_ANNOTATION.to_string(), v.to_string());
        }
        Ingress {
            metadata: ObjectMeta {
                name: Some("app".into()),
                namespace: Some("default".into()),
                annotations: Some(annotations),
                ..Default::default()
            },
            spec: Some(IngressSpec {
                ingress_class_name: class_name.map(str::to_string),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn class(name: &str, controller: &str, default: bool) -> IngressClass {
        let mut annotations = BTreeMap::new();
        if default {
            annotations.insert(DEFAULT_CLASS_ANNOTATION.to_string(), "true".to_string());
        }
        IngressClass {
            metadata: ObjectMeta {
                name: Some(name.into()),
                annotations: Some(annotations),
                ..Default::default()
            },
            spec: Some(IngressClassSpec {
                controller: Some(controller.to_string()),
                ..Default::default()
            }),
        }
    }

    const US: &str = "pomerium.io/ingress-controller";

    #[test]
    fn owned_via_matching_class_name() {
        let ing = ingress_with(Some("pomerium"), None);
        let classes = vec![class("pomerium", US, false)];
        assert!(is_owned(&ing, &classes, US));
    }

    #[test]
    fn unclassed_with_no_default_is_not_owned() {
        let ing = ingress_with(None, None);
        let classes = vec![class("pomerium", US, false)];
        assert!(!is_owned(&ing, &classes, US));
    }

    #[test]
    fn unclassed_is_owned_once_class_becomes_default() {
        let ing = ingress_with(None, None);
        let classes = vec![class("pomerium", US, true)];
        assert!(is_owned(&ing, &classes, US));
    }

    #[test]
    fn unmatched_class_name_loses_ownership() {
        let ing = ingress_with(Some("other"), None);
        let classes = vec![class("pomerium", US, false), class("other", "someone-else", false)];
        assert!(!is_owned(&ing, &classes, US));
    }

    #[test]
    fn legacy_annotation_takes_precedence() {
        let ing = ingress_with(Some("other"), Some("pomerium"));
        let classes = vec![class("pomerium", US, false), class("other", "someone-else", false)];
        assert!(is_owned(&ing, &classes, US));
    }

    #[test]
    fn http01_solver_label_bypasses_class_resolution() {
        let mut ing = ingress_with(None, None);
        let mut labels = BTreeMap::new();
        labels.insert(HTTP01_SOLVER_LABEL.to_string(), "true".to_string());
        ing.metadata.labels = Some(labels);
        assert!(is_owned(&ing, &[], US));
    }

    #[test]
    fn affected_by_class_change_includes_named_and_unclassed() {
        let named = ingress_with(Some("pomerium"), None);
        let other = ingress_with(Some("other"), None);
        let unclassed = ingress_with(None, None);
        let ingresses = vec![
            (NamespacedName::new("default", "named"), named),
            (NamespacedName::new("default", "other"), other),
            (NamespacedName::new("default", "unclassed"), unclassed),
        ];
        let affected = affected_by_class_change("pomerium", &ingresses);
        assert_eq!(affected.len(), 2);
        assert!(affected.contains(&NamespacedName::new("default", "named")));
        assert!(affected.contains(&NamespacedName::new("default", "unclassed")));
    }
}
