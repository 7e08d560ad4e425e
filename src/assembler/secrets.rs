//! Secret-shape validation (§3 invariants, §4.4.5).

use k8s_openapi::api::core::v1::Secret;

const TLS_SECRET_TYPE: &str = "kubernetes.io/tls";
const KEY_TLS_CERT: &str = "tls.crt";
const KEY_TLS_KEY: &str = "tls.key";
const KEY_CA_CERT: &str = "ca.crt";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SecretRole {
    /// `spec.tls[].secretName` (or its IngressClass-default substitute).
    ServerCert,
    /// `<prefix>/tls_custom_ca_secret` — CA bundle validating upstream.
    CustomCa,
    /// `<prefix>/tls_client_secret` — client cert presented to backends.
    ClientCert,
    /// `<prefix>/tls_downstream_client_ca_secret` — CA validating callers.
    DownstreamClientCa,
}

impl std::fmt::Display for SecretRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SecretRole::ServerCert => "server certificate",
            SecretRole::CustomCa => "custom CA bundle",
            SecretRole::ClientCert => "client certificate",
            SecretRole::DownstreamClientCa => "downstream client CA bundle",
        };
        f.write_str(s)
    }
}

fn data_bytes<'a>(secret: &'a Secret, key: &str) -> Option<&'a [u8]> {
    secret
        .data
        .as_ref()?
        .get(key)
        .map(|b| b.0.as_slice())
        .filter(|b| !b.is_empty())
}

/// Full TLS-typed secret: `type: kubernetes.io/tls` plus non-empty cert and
/// key (§3: "of TLS type, and contain non-empty cert and key bytes").
pub fn is_valid_tls_secret(secret: &Secret) -> bool {
    secret.type_.as_deref() == Some(TLS_SECRET_TYPE)
        && data_bytes(secret, KEY_TLS_CERT).is_some()
        && data_bytes(secret, KEY_TLS_KEY).is_some()
}

/// Cert-only bundle: any non-empty `ca.crt` or `tls.crt` (§3: "cert-only
/// for CA bundles").
fn is_valid_cert_bundle(secret: &Secret) -> bool {
    data_bytes(secret, KEY_CA_CERT).is_some() || data_bytes(secret, KEY_TLS_CERT).is_some()
}

/// Does `secret` have the shape required for `role`?
pub fn matches_role(secret: &Secret, role: SecretRole) -> bool {
    match role {
        SecretRole::ServerCert | SecretRole::ClientCert => is_valid_tls_secret(secret),
        SecretRole::CustomCa | SecretRole::DownstreamClientCa => is_valid_cert_bundle(secret),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;
    use std::collections::BTreeMap;

    fn secret_with(type_: Option<&str>, data: &[(&str, &[u8])]) -> Secret {
        let mut map = BTreeMap::new();
        for (k, v) in data {
            map.insert(k.to_string(), ByteString(v.to_vec()));
        }
        Secret {
            type_: type_.map(str::to_string),
            data: Some(map),
            ..Default::default()
        }
    }

    #[test]
    fn tls_secret_requires_type_and_both_keys() {
        let ok = secret_with(Some("kubernetes.io/tls"), &[("tls.crt", b"c"), ("tls.key", b"k")]);
        assert!(is_valid_tls_secret(&ok));

        let wrong_type = secret_with(Some("Opaque"), &[("tls.crt", b"c"), ("tls.key", b"k")]);
        assert!(!is_valid_tls_secret(&wrong_type));

        let empty_key = secret_with(Some("kubernetes.io/tls"), &[("tls.crt", b"c"), ("tls.key", b"")]);
        assert!(!is_valid_tls_secret(&empty_key));
    }

    #[test]
    fn cert_bundle_accepts_either_known_key() {
        let ca = secret_with(Some("Opaque"), &[("ca.crt", b"c")]);
        assert!(matches_role(&ca, SecretRole::CustomCa));

        let empty = secret_with(Some("Opaque"), &[]);
        assert!(!matches_role(&empty, SecretRole::CustomCa));
    }
}
