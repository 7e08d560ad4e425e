use super::*;
use k8s_openapi::api::core::v1::{ServicePort, ServiceSpec};
use k8s_openapi::api::networking::v1::{
    HTTPIngressRuleValue, IngressBackend, IngressRule, IngressSpec, IngressTLS,
};
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use std::collections::BTreeMap;

fn cfg() -> AssemblerConfig {
    AssemblerConfig {
        annotation_prefix: "ingress.pomerium.io".to_string(),
        disable_cert_check: false,
    }
}

fn backend(name: &str, port: i32) -> IngressBackend {
    IngressBackend {
        service: Some(IngressServiceBackend {
            name: name.to_string(),
            port: Some(ServiceBackendPort {
                number: Some(port),
                name: None,
            }),
        }),
        resource: None,
    }
}

fn ingress_with_rule(name: &str, service: &str, port: i32) -> Ingress {
    Ingress {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            ..Default::default()
        },
        spec: Some(IngressSpec {
            rules: Some(vec![IngressRule {
                host: Some("example.com".to_string()),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some("/".to_string()),
                        path_type: "Prefix".to_string(),
                        backend: backend(service, port),
                    }],
                }),
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

fn service_with_port(name: &str, port: i32) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            ports: Some(vec![ServicePort {
                port,
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

#[tokio::test]
async fn missing_service_is_unemittable() {
    let registry = Shared::new();
    let ingress = ingress_with_rule("app", "web", 80);
    let err = assemble(&ingress, None, &registry, &cfg(), false)
        .await
        .unwrap_err();
    assert!(matches!(err, UnemittableError::ServiceMissing(_)));
}

#[tokio::test]
async fn missing_port_is_unemittable() {
    let registry = Shared::new();
    registry.upsert(service_with_port("web", 8080).into()).await;
    let ingress = ingress_with_rule("app", "web", 80);
    let err = assemble(&ingress, None, &registry, &cfg(), false)
        .await
        .unwrap_err();
    assert!(matches!(err, UnemittableError::PortMissing { .. }));
}

#[tokio::test]
async fn missing_endpoints_become_an_empty_subset() {
    let registry = Shared::new();
    registry.upsert(service_with_port("web", 80).into()).await;
    let ingress = ingress_with_rule("app", "web", 80);
    let assembled = assemble(&ingress, None, &registry, &cfg(), false)
        .await
        .unwrap();
    let ep = assembled.config.endpoints.get("default/web").unwrap();
    assert!(ep.subsets.is_none());
}

#[tokio::test]
async fn missing_tls_secret_is_unemittable_then_succeeds_once_created() {
    let registry = Shared::new();
    registry.upsert(service_with_port("web", 80).into()).await;
    let mut ingress = ingress_with_rule("app", "web", 80);
    ingress.spec.as_mut().unwrap().tls = Some(vec![IngressTLS {
        hosts: Some(vec!["example.com".to_string()]),
        secret_name: Some("secret".to_string()),
    }]);

    let err = assemble(&ingress, None, &registry, &cfg(), false)
        .await
        .unwrap_err();
    assert!(matches!(err, UnemittableError::SecretMissing(_)));

    let mut data = BTreeMap::new();
    data.insert("tls.crt".to_string(), ByteString(b"cert".to_vec()));
    data.insert("tls.key".to_string(), ByteString(b"key".to_vec()));
    registry
        .upsert(
            Secret {
                metadata: ObjectMeta {
                    name: Some("secret".to_string()),
                    namespace: Some("default".to_string()),
                    ..Default::default()
                },
                type_: Some("kubernetes.io/tls".to_string()),
                data: Some(data),
                ..Default::default()
            }
            .into(),
        )
        .await;

    let assembled = assemble(&ingress, None, &registry, &cfg(), false)
        .await
        .unwrap();
    assert!(assembled.config.secrets.contains_key("default/secret"));
}

#[tokio::test]
async fn unemittable_ingress_still_registers_its_dependency_edges() {
    let registry = Shared::new();
    registry.upsert(service_with_port("web", 80).into()).await;
    let mut ingress = ingress_with_rule("app", "web", 80);
    ingress.spec.as_mut().unwrap().tls = Some(vec![IngressTLS {
        hosts: Some(vec!["example.com".to_string()]),
        secret_name: Some("secret".to_string()),
    }]);

    let err = assemble(&ingress, None, &registry, &cfg(), false)
        .await
        .unwrap_err();
    assert!(matches!(err, UnemittableError::SecretMissing(_)));

    // The secret doesn't exist yet, but the edge must already be there —
    // otherwise creating it later would never wake this Ingress back up.
    let secret_key = ObjectKey::secret("default", "secret");
    let dependents = registry.dependents(&secret_key).await;
    assert_eq!(dependents, vec![NamespacedName::new("default", "app")]);
}

#[tokio::test]
async fn annotation_ca_secret_is_required_then_included() {
    let registry = Shared::new();
    registry.upsert(service_with_port("web", 80).into()).await;
    let mut ingress = ingress_with_rule("app", "web", 80);
    let mut annotations = BTreeMap::new();
    annotations.insert(
        "ingress.pomerium.io/tls_custom_ca_secret".to_string(),
        "custom-ca".to_string(),
    );
    ingress.metadata.annotations = Some(annotations);

    let err = assemble(&ingress, None, &registry, &cfg(), false)
        .await
        .unwrap_err();
    assert!(matches!(err, UnemittableError::SecretMissing(_)));

    let mut data = BTreeMap::new();
    data.insert("ca.crt".to_string(), ByteString(b"ca-cert".to_vec()));
    registry
        .upsert(
            Secret {
                metadata: ObjectMeta {
                    name: Some("custom-ca".to_string()),
                    namespace: Some("default".to_string()),
                    ..Default::default()
                },
                type_: Some("Opaque".to_string()),
                data: Some(data),
                ..Default::default()
            }
            .into(),
        )
        .await;

    let assembled = assemble(&ingress, None, &registry, &cfg(), false)
        .await
        .unwrap();
    assert!(assembled.config.secrets.contains_key("default/custom-ca"));
}

#[tokio::test]
async fn http01_solver_bypasses_tls_validation() {
    let registry = Shared::new();
    registry.upsert(service_with_port("web", 80).into()).await;
    let mut ingress = ingress_with_rule("app", "web", 80);
    ingress.spec.as_mut().unwrap().tls = Some(vec![IngressTLS {
        hosts: Some(vec!["example.com".to_string()]),
        secret_name: Some("missing-secret".to_string()),
    }]);

    let assembled = assemble(&ingress, None, &registry, &cfg(), true)
        .await
        .unwrap();
    assert!(assembled.config.secrets.is_empty());
}

#[tokio::test]
async fn dependency_set_covers_service_endpoints_secret_and_class() {
    use k8s_openapi::api::networking::v1::{IngressClass, IngressClassSpec};

    let registry = Shared::new();
    registry.upsert(service_with_port("web", 80).into()).await;
    let ingress = ingress_with_rule("app", "web", 80);
    let class = IngressClass {
        metadata: ObjectMeta {
            name: Some("pomerium".to_string()),
            ..Default::default()
        },
        spec: Some(IngressClassSpec {
            controller: Some("pomerium.io/ingress-controller".to_string()),
            ..Default::default()
        }),
    };

    let assembled = assemble(&ingress, Some(&class), &registry, &cfg(), false)
        .await
        .unwrap();
    assert!(assembled.deps.contains(&ObjectKey::service("default", "web")));
    assert!(assembled.deps.contains(&ObjectKey::endpoints("default", "web")));
    assert!(assembled.deps.contains(&ObjectKey::ingress_class("pomerium")));
}
