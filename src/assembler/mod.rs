//! The Ingress Assembler (§4.4): turns one owned Ingress into a
//! self-contained [`IngressConfig`] snapshot, or an [`UnemittableError`]
//! naming exactly why it can't be published yet.

mod config;
mod secrets;

pub use config::IngressConfig;
pub use secrets::SecretRole;

use std::collections::{BTreeMap, HashSet};

use k8s_openapi::api::core::v1::{Endpoints, Service};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, Ingress, IngressClass, IngressServiceBackend, ServiceBackendPort,
};
use kube::api::ObjectMeta;
use kube::ResourceExt;

use crate::k8s::{NamespacedName, ObjectKey, Shared};

/// Annotation suffixes under the configured prefix (§4.4.4, SPEC_FULL §4.4).
pub const ANNOTATION_CUSTOM_CA: &str = "tls_custom_ca_secret";
pub const ANNOTATION_CLIENT_CERT: &str = "tls_client_secret";
pub const ANNOTATION_DOWNSTREAM_CLIENT_CA: &str = "tls_downstream_client_ca_secret";

/// Annotation on an `IngressClass` naming the secret substituted for an
/// empty `spec.tls[].secretName` (§4.4.3). Not part of the upstream
/// `networking.k8s.io` API; this is a pomerium-specific extension, namespaced
/// under the same configurable prefix as the other annotations.
pub const DEFAULT_CERT_SECRET_ANNOTATION_SUFFIX: &str = "default-cert-secret";

#[derive(Clone, Debug)]
pub struct AssemblerConfig {
    pub annotation_prefix: String,
    pub disable_cert_check: bool,
}

impl AssemblerConfig {
    fn annotation(&self, suffix: &str) -> String {
        format!("{}/{}", self.annotation_prefix, suffix)
    }
}

#[derive(thiserror::Error, Debug, Clone)]
pub enum UnemittableError {
    #[error("ingress has no namespace")]
    MissingNamespace,
    #[error("ingress rule references a resource backend, which is unsupported")]
    ResourceBackendUnsupported,
    #[error("backend service {0} not found")]
    ServiceMissing(NamespacedName),
    #[error("service {service} has no port matching {port}")]
    PortMissing { service: NamespacedName, port: PortRef },
    #[error("tls secret {0} not found")]
    SecretMissing(NamespacedName),
    #[error("tls secret {name} is not of type kubernetes.io/tls, or has an empty cert or key")]
    InvalidTlsSecret { name: NamespacedName },
    #[error("secret {name} has no non-empty certificate for role {role}")]
    InvalidCertSecret {
        name: NamespacedName,
        role: SecretRole,
    },
    #[error(
        "spec.tls[{index}].secretName is empty and no default certificate is configured on \
         the ingress class"
    )]
    NoDefaultCertificate { index: usize },
}

#[derive(Clone, Debug)]
pub struct PortRef(pub Option<String>, pub Option<i32>);

impl std::fmt::Display for PortRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.0, self.1) {
            (Some(name), _) => write!(f, "name={name}"),
            (None, Some(num)) => write!(f, "number={num}"),
            (None, None) => write!(f, "<unspecified>"),
        }
    }
}

impl From<&ServiceBackendPort> for PortRef {
    fn from(p: &ServiceBackendPort) -> Self {
        PortRef(p.name.clone(), p.number)
    }
}

pub struct Assembled {
    pub config: IngressConfig,
    pub deps: HashSet<ObjectKey>,
}

/// §4.4: assemble `ingress` into a published-ready snapshot.
///
/// `ingress_class` is the `IngressClass` that made `ingress` owned (by name
/// or as the cluster default) — the same one the Ownership Filter resolved
/// — or `None` if the Ingress is an ACME HTTP-01 solver owned without a
/// class.
pub async fn assemble(
    ingress: &Ingress,
    ingress_class: Option<&IngressClass>,
    registry: &Shared,
    cfg: &AssemblerConfig,
    skip_tls_validation: bool,
) -> Result<Assembled, UnemittableError> {
    let namespace = ingress.namespace().ok_or(UnemittableError::MissingNamespace)?;
    let ingress_name = NamespacedName::new(&namespace, ingress.name_any());
    let backends = collect_backends(ingress)?;

    // Register the full candidate dependency set — including names that
    // don't resolve yet — *before* validating. This is what lets an
    // Unemittable Ingress recover on its own: the Dependency Graph must
    // already point the missing Service/Secret back at this Ingress so its
    // later creation re-triggers reconciliation (§7, "reassessed
    // automatically when any referenced object changes").
    let candidate_deps = candidate_dependency_set(&namespace, ingress, ingress_class, &backends, cfg);
    registry.set_deps(ingress_name.clone(), candidate_deps).await;

    let mut deps = HashSet::new();
    let mut services = BTreeMap::new();
    let mut endpoints = BTreeMap::new();

    for backend_ref in &backends {
        let svc_name = NamespacedName::new(&namespace, &backend_ref.name);
        let svc_key = ObjectKey::service(&namespace, &backend_ref.name);
        let service = registry
            .get(&svc_key)
            .await
            .and_then(|o| o.as_service().cloned())
            .ok_or_else(|| UnemittableError::ServiceMissing(svc_name.clone()))?;

        if let Some(port) = &backend_ref.port {
            if resolve_port(&service, port).is_none() {
                return Err(UnemittableError::PortMissing {
                    service: svc_name.clone(),
                    port: port.into(),
                });
            }
        }

        deps.insert(svc_key.clone());
        let ep_key = ObjectKey::endpoints(&namespace, &backend_ref.name);
        deps.insert(ep_key.clone());

        let ep = registry
            .get(&ep_key)
            .await
            .and_then(|o| o.as_endpoints().cloned())
            .unwrap_or_else(|| empty_endpoints(&namespace, &backend_ref.name));

        services.insert(svc_name.to_string(), service);
        endpoints.insert(svc_name.to_string(), ep);
    }

    let mut secrets = BTreeMap::new();
    let mut default_cert_secret_name = None;

    for (index, tls) in ingress.spec.iter().flat_map(|s| s.tls.iter().flatten()).enumerate() {
        let requested = tls.secret_name.clone().unwrap_or_default();
        let secret_name = if requested.is_empty() {
            let default = ingress_class.and_then(|c| default_cert_secret(c, cfg));
            match default {
                Some(name) => {
                    default_cert_secret_name = Some(name.clone());
                    name
                }
                None => {
                    if skip_tls_validation || cfg.disable_cert_check {
                        continue;
                    }
                    return Err(UnemittableError::NoDefaultCertificate { index });
                }
            }
        } else {
            requested
        };

        let key = ObjectKey::secret(&namespace, &secret_name);
        let secret = registry.get(&key).await.and_then(|o| o.as_secret().cloned());
        let name = NamespacedName::new(&namespace, &secret_name);
        match secret {
            None => {
                if !(skip_tls_validation || cfg.disable_cert_check) {
                    return Err(UnemittableError::SecretMissing(name));
                }
            }
            Some(secret) => {
                if !(skip_tls_validation || cfg.disable_cert_check)
                    && !secrets::is_valid_tls_secret(&secret)
                {
                    return Err(UnemittableError::InvalidTlsSecret { name });
                }
                deps.insert(key.clone());
                secrets.insert(name.to_string(), secret);
            }
        }
    }

    for (annotation_suffix, role) in [
        (ANNOTATION_CUSTOM_CA, SecretRole::CustomCa),
        (ANNOTATION_CLIENT_CERT, SecretRole::ClientCert),
        (ANNOTATION_DOWNSTREAM_CLIENT_CA, SecretRole::DownstreamClientCa),
    ] {
        let annotation = cfg.annotation(annotation_suffix);
        let Some(secret_name) = ingress.annotations().get(&annotation) else {
            continue;
        };
        let key = ObjectKey::secret(&namespace, secret_name);
        let name = NamespacedName::new(&namespace, secret_name);
        let secret = registry
            .get(&key)
            .await
            .and_then(|o| o.as_secret().cloned())
            .ok_or_else(|| UnemittableError::SecretMissing(name.clone()))?;

        if !secrets::matches_role(&secret, role) {
            return Err(UnemittableError::InvalidCertSecret { name, role });
        }
        deps.insert(key.clone());
        secrets.insert(name.to_string(), secret);
    }

    if let Some(class) = ingress_class {
        deps.insert(ObjectKey::ingress_class(class.name_any()));
    }

    let config = IngressConfig {
        name: ingress_name,
        ingress: ingress.clone(),
        services,
        endpoints,
        secrets,
        default_cert_secret_name,
    };

    Ok(Assembled { config, deps })
}

/// Every dependency this Ingress *could* reference, computed from names
/// alone — no registry lookups, so it never fails. See the comment at the
/// top of [`assemble`] for why this has to be computed before validation.
fn candidate_dependency_set(
    namespace: &str,
    ingress: &Ingress,
    ingress_class: Option<&IngressClass>,
    backends: &[BackendRef],
    cfg: &AssemblerConfig,
) -> HashSet<ObjectKey> {
    let mut deps = HashSet::new();

    for backend_ref in backends {
        deps.insert(ObjectKey::service(namespace, &backend_ref.name));
        deps.insert(ObjectKey::endpoints(namespace, &backend_ref.name));
    }

    for tls in ingress.spec.iter().flat_map(|s| s.tls.iter().flatten()) {
        let requested = tls.secret_name.clone().unwrap_or_default();
        let name = if requested.is_empty() {
            ingress_class.and_then(|c| default_cert_secret(c, cfg))
        } else {
            Some(requested)
        };
        if let Some(name) = name {
            deps.insert(ObjectKey::secret(namespace, name));
        }
    }

    for annotation_suffix in [ANNOTATION_CUSTOM_CA, ANNOTATION_CLIENT_CERT, ANNOTATION_DOWNSTREAM_CLIENT_CA] {
        if let Some(name) = ingress.annotations().get(&cfg.annotation(annotation_suffix)) {
            deps.insert(ObjectKey::secret(namespace, name));
        }
    }

    if let Some(class) = ingress_class {
        deps.insert(ObjectKey::ingress_class(class.name_any()));
    }

    deps
}

fn default_cert_secret(class: &IngressClass, cfg: &AssemblerConfig) -> Option<String> {
    class
        .annotations()
        .get(&cfg.annotation(DEFAULT_CERT_SECRET_ANNOTATION_SUFFIX))
        .cloned()
}

struct BackendRef {
    name: String,
    port: Option<ServiceBackendPort>,
}

fn backend_ref(backend: &IngressServiceBackend) -> BackendRef {
    BackendRef {
        name: backend.name.clone(),
        port: backend.port.clone(),
    }
}

/// Every `(namespace, serviceName, port)` triple from the Ingress' rules and
/// default backend, in the Ingress' own declared order (§4.4.1 ordering
/// note). Resource backends are rejected outright — this rewrite only
/// understands Service backends.
fn collect_backends(ingress: &Ingress) -> Result<Vec<BackendRef>, UnemittableError> {
    let mut out = Vec::new();
    let Some(spec) = ingress.spec.as_ref() else {
        return Ok(out);
    };

    if let Some(default_backend) = &spec.default_backend {
        if default_backend.resource.is_some() {
            return Err(UnemittableError::ResourceBackendUnsupported);
        }
        if let Some(service) = &default_backend.service {
            out.push(backend_ref(service));
        }
    }

    for rule in spec.rules.iter().flatten() {
        let Some(http) = rule.http.as_ref() else {
            continue;
        };
        for path in &http.paths {
            out.push(path_backend(path)?);
        }
    }

    Ok(out)
}

fn path_backend(path: &HTTPIngressPath) -> Result<BackendRef, UnemittableError> {
    if path.backend.resource.is_some() {
        return Err(UnemittableError::ResourceBackendUnsupported);
    }
    let service = path
        .backend
        .service
        .as_ref()
        .ok_or(UnemittableError::ResourceBackendUnsupported)?;
    Ok(backend_ref(service))
}

fn resolve_port(service: &Service, port: &ServiceBackendPort) -> Option<i32> {
    let ports = service.spec.as_ref()?.ports.as_ref()?;
    if let Some(number) = port.number {
        return ports.iter().find(|p| p.port == number).map(|p| p.port);
    }
    let name = port.name.as_ref()?;
    ports
        .iter()
        .find(|p| p.name.as_deref() == Some(name.as_str()))
        .map(|p| p.port)
}

fn empty_endpoints(namespace: &str, name: &str) -> Endpoints {
    Endpoints {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        subsets: None,
    }
}

#[cfg(test)]
mod tests;
