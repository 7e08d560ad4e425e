use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Endpoints, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use serde::Serialize;

use crate::k8s::NamespacedName;

/// §3: the self-contained snapshot emitted per Ingress. Keys of every map
/// are `BTreeMap`, not `HashMap` — §4.4's "map keys are serialized in
/// sorted order" requirement falls out of the type rather than needing a
/// manual sort at serialization time.
#[derive(Clone, Debug, Serialize)]
pub struct IngressConfig {
    pub name: NamespacedName,
    pub ingress: Ingress,
    pub services: BTreeMap<String, Service>,
    pub endpoints: BTreeMap<String, Endpoints>,
    pub secrets: BTreeMap<String, Secret>,
    pub default_cert_secret_name: Option<String>,
}

impl Serialize for NamespacedName {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl IngressConfig {
    /// §4.6: canonical serialization used both as the databroker record
    /// value and as the idempotence fingerprint. Byte-equal for
    /// byte-equal configs (round-trip law, §8).
    pub fn canonical_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("IngressConfig always serializes")
    }

    pub fn databroker_key(&self) -> String {
        format!("ingress/{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;

    fn config(name: &str) -> IngressConfig {
        IngressConfig {
            name: NamespacedName::new("default", name),
            ingress: Ingress {
                metadata: ObjectMeta {
                    name: Some(name.to_string()),
                    namespace: Some("default".to_string()),
                    ..Default::default()
                },
                ..Default::default()
            },
            services: BTreeMap::new(),
            endpoints: BTreeMap::new(),
            secrets: BTreeMap::new(),
            default_cert_secret_name: None,
        }
    }

    #[test]
    fn equal_configs_serialize_byte_equal() {
        let a = config("app");
        let b = config("app");
        assert_eq!(a.canonical_bytes(), b.canonical_bytes());
    }

    #[test]
    fn databroker_key_matches_the_documented_scheme() {
        let c = config("app");
        assert_eq!(c.databroker_key(), "ingress/default/app");
    }
}
