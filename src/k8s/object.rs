use k8s_openapi::api::core::v1::{Endpoints, Secret, Service};
use k8s_openapi::api::networking::v1::{Ingress, IngressClass};
use kube::ResourceExt;

/// The kind half of an object's identity. `IngressClass` is cluster scoped;
/// its `NamespacedName::namespace` is always empty.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectKind {
    Ingress,
    IngressClass,
    Service,
    Endpoints,
    Secret,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Ingress => "Ingress",
            ObjectKind::IngressClass => "IngressClass",
            ObjectKind::Service => "Service",
            ObjectKind::Endpoints => "Endpoints",
            ObjectKind::Secret => "Secret",
        }
    }
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

impl NamespacedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Cluster-scoped identity (used for `IngressClass`).
    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            namespace: String::new(),
            name: name.into(),
        }
    }

    /// Parses the `namespace/name` form used by `--update-status-from-service`.
    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw.split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() => Ok(Self::new(ns, name)),
            _ => Err(format!("expected namespace/name, got {raw:?}")),
        }
    }
}

impl std::fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.namespace.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

/// `(kind, namespace, name)` — the identity every watched object and every
/// dependency edge is keyed by.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub kind: ObjectKind,
    pub name: NamespacedName,
}

impl ObjectKey {
    pub fn new(kind: ObjectKind, name: NamespacedName) -> Self {
        Self { kind, name }
    }

    pub fn ingress(ns: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(ObjectKind::Ingress, NamespacedName::new(ns, name))
    }

    pub fn ingress_class(name: impl Into<String>) -> Self {
        Self::new(ObjectKind::IngressClass, NamespacedName::cluster(name))
    }

    pub fn service(ns: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(ObjectKind::Service, NamespacedName::new(ns, name))
    }

    pub fn endpoints(ns: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(ObjectKind::Endpoints, NamespacedName::new(ns, name))
    }

    pub fn secret(ns: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(ObjectKind::Secret, NamespacedName::new(ns, name))
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// The last-seen body of a watched object. Boxed so an empty `Registry`
/// entry doesn't force every variant to the size of the largest one.
#[derive(Clone, Debug)]
pub enum Object {
    Ingress(Box<Ingress>),
    IngressClass(Box<IngressClass>),
    Service(Box<Service>),
    Endpoints(Box<Endpoints>),
    Secret(Box<Secret>),
}

impl Object {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Object::Ingress(_) => ObjectKind::Ingress,
            Object::IngressClass(_) => ObjectKind::IngressClass,
            Object::Service(_) => ObjectKind::Service,
            Object::Endpoints(_) => ObjectKind::Endpoints,
            Object::Secret(_) => ObjectKind::Secret,
        }
    }

    pub fn key(&self) -> ObjectKey {
        let name = match self {
            Object::Ingress(o) => {
                NamespacedName::new(o.namespace().unwrap_or_default(), o.name_any())
            }
            Object::IngressClass(o) => NamespacedName::cluster(o.name_any()),
            Object::Service(o) => {
                NamespacedName::new(o.namespace().unwrap_or_default(), o.name_any())
            }
            Object::Endpoints(o) => {
                NamespacedName::new(o.namespace().unwrap_or_default(), o.name_any())
            }
            Object::Secret(o) => {
                NamespacedName::new(o.namespace().unwrap_or_default(), o.name_any())
            }
        };
        ObjectKey::new(self.kind(), name)
    }

    pub fn as_ingress(&self) -> Option<&Ingress> {
        match self {
            Object::Ingress(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_ingress_class(&self) -> Option<&IngressClass> {
        match self {
            Object::IngressClass(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_service(&self) -> Option<&Service> {
        match self {
            Object::Service(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_endpoints(&self) -> Option<&Endpoints> {
        match self {
            Object::Endpoints(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_secret(&self) -> Option<&Secret> {
        match self {
            Object::Secret(o) => Some(o),
            _ => None,
        }
    }
}

impl From<Ingress> for Object {
    fn from(o: Ingress) -> Self {
        Object::Ingress(Box::new(o))
    }
}

impl From<IngressClass> for Object {
    fn from(o: IngressClass) -> Self {
        Object::IngressClass(Box::new(o))
    }
}

impl From<Service> for Object {
    fn from(o: Service) -> Self {
        Object::Service(Box::new(o))
    }
}

impl From<Endpoints> for Object {
    fn from(o: Endpoints) -> Self {
        Object::Endpoints(Box::new(o))
    }
}

impl From<Secret> for Object {
    fn from(o: Secret) -> Self {
        Object::Secret(Box::new(o))
    }
}

/// Namespace allow-list from `--namespaces`. Empty means "all namespaces".
#[derive(Clone, Debug, Default)]
pub struct NamespaceFilter(pub Vec<String>);

impl NamespaceFilter {
    pub fn allows(&self, namespace: &str) -> bool {
        self.0.is_empty() || self.0.iter().any(|ns| ns == namespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_allows_everything() {
        let f = NamespaceFilter::default();
        assert!(f.allows("a"));
        assert!(f.allows("anything"));
    }

    #[test]
    fn nonempty_filter_restricts() {
        let f = NamespaceFilter(vec!["a".into(), "c".into()]);
        assert!(f.allows("a"));
        assert!(!f.allows("b"));
        assert!(f.allows("c"));
        assert!(!f.allows("d"));
    }

    #[test]
    fn cluster_scoped_name_displays_without_slash() {
        let n = NamespacedName::cluster("pomerium");
        assert_eq!(n.to_string(), "pomerium");
    }

    #[test]
    fn parse_splits_on_the_first_slash() {
        assert_eq!(
            NamespacedName::parse("pomerium/pomerium-proxy").unwrap(),
            NamespacedName::new("pomerium", "pomerium-proxy")
        );
        assert!(NamespacedName::parse("pomerium-proxy").is_err());
        assert!(NamespacedName::parse("/pomerium-proxy").is_err());
        assert!(NamespacedName::parse("pomerium/").is_err());
    }
}
