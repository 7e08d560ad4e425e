//! The CLI surface (§6): one flag per row of the table, each mirrored to a
//! `SCREAMING_SNAKE_CASE` environment variable via clap's `env` attribute.
//! [`Args::into_config`] turns the raw strings into a validated [`Config`]
//! — malformed values are a Configuration error (§7), fatal at startup,
//! before any watch is established.

use std::net::SocketAddr;
use std::path::PathBuf;

use base64::Engine;
use clap::Parser;
use reqwest::Url;

use crate::k8s::{NamespaceFilter, NamespacedName};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid --{flag}: {reason}")]
    Invalid { flag: &'static str, reason: String },
}

#[derive(Parser, Debug)]
#[command(name = "controller", about = "Translates Ingress resources into a databroker configuration")]
pub struct Args {
    #[arg(long, env = "METRICS_BIND_ADDRESS", default_value = ":8080")]
    pub metrics_bind_address: String,

    #[arg(long, env = "HEALTH_PROBE_BIND_ADDRESS", default_value = ":8081")]
    pub health_probe_bind_address: String,

    /// Reserved: admission webhooks are a non-goal (§1) but the port is
    /// still accepted so deployment manifests written for the original
    /// controller don't need to change.
    #[arg(long, env = "WEBHOOK_PORT", default_value_t = 9443)]
    pub webhook_port: u16,

    #[arg(long, env = "NAME", default_value = "pomerium.io/ingress-controller")]
    pub name: String,

    #[arg(long, env = "PREFIX", default_value = "ingress.pomerium.io")]
    pub prefix: String,

    #[arg(long, env = "NAMESPACES", default_value = "")]
    pub namespaces: String,

    #[arg(long, env = "DATABROKER_SERVICE_URL", default_value = "http://localhost:5443")]
    pub databroker_service_url: String,

    #[arg(long, env = "DATABROKER_TLS_CA_FILE")]
    pub databroker_tls_ca_file: Option<PathBuf>,

    #[arg(long, env = "DATABROKER_TLS_CA")]
    pub databroker_tls_ca: Option<String>,

    #[arg(long, env = "DATABROKER_TLS_INSECURE_SKIP_VERIFY")]
    pub databroker_tls_insecure_skip_verify: bool,

    #[arg(long, env = "DATABROKER_TLS_OVERRIDE_CERTIFICATE_NAME")]
    pub databroker_tls_override_certificate_name: Option<String>,

    #[arg(long, env = "SHARED_SECRET")]
    pub shared_secret: Option<String>,

    #[arg(long, env = "UPDATE_STATUS_FROM_SERVICE")]
    pub update_status_from_service: Option<String>,

    #[arg(long, env = "DISABLE_CERT_CHECK")]
    pub disable_cert_check: bool,
}

/// Validated configuration derived from [`Args`].
pub struct Config {
    pub metrics_bind_address: SocketAddr,
    pub health_probe_bind_address: SocketAddr,
    pub webhook_port: u16,
    pub controller_name: String,
    pub annotation_prefix: String,
    pub namespaces: NamespaceFilter,
    pub databroker_service_url: Url,
    pub databroker_tls_ca: Option<Vec<u8>>,
    pub databroker_tls_insecure_skip_verify: bool,
    pub databroker_tls_override_certificate_name: Option<String>,
    pub shared_secret: Option<Vec<u8>>,
    pub update_status_from_service: Option<NamespacedName>,
    pub disable_cert_check: bool,
}

impl Args {
    pub fn into_config(self) -> Result<Config, Error> {
        let metrics_bind_address = parse_bind_address("metrics-bind-address", &self.metrics_bind_address)?;
        let health_probe_bind_address =
            parse_bind_address("health-probe-bind-address", &self.health_probe_bind_address)?;

        let namespaces = NamespaceFilter(
            self.namespaces
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        );

        let databroker_service_url = Url::parse(&self.databroker_service_url).map_err(|e| Error::Invalid {
            flag: "databroker-service-url",
            reason: e.to_string(),
        })?;

        let databroker_tls_ca = match (self.databroker_tls_ca_file, self.databroker_tls_ca) {
            (Some(_), Some(_)) => {
                return Err(Error::Invalid {
                    flag: "databroker-tls-ca-file / --databroker-tls-ca",
                    reason: "only one of the path or base64 form may be set".to_string(),
                })
            }
            (Some(path), None) => Some(std::fs::read(&path).map_err(|e| Error::Invalid {
                flag: "databroker-tls-ca-file",
                reason: e.to_string(),
            })?),
            (None, Some(b64)) => Some(decode_base64("databroker-tls-ca", &b64)?),
            (None, None) => None,
        };

        let shared_secret = self.shared_secret.map(|s| decode_base64("shared-secret", &s)).transpose()?;

        let update_status_from_service = self
            .update_status_from_service
            .map(|s| {
                NamespacedName::parse(&s).map_err(|reason| Error::Invalid {
                    flag: "update-status-from-service",
                    reason,
                })
            })
            .transpose()?;

        Ok(Config {
            metrics_bind_address,
            health_probe_bind_address,
            webhook_port: self.webhook_port,
            controller_name: self.name,
            annotation_prefix: self.prefix,
            namespaces,
            databroker_service_url,
            databroker_tls_ca,
            databroker_tls_insecure_skip_verify: self.databroker_tls_insecure_skip_verify,
            databroker_tls_override_certificate_name: self.databroker_tls_override_certificate_name,
            shared_secret,
            update_status_from_service,
            disable_cert_check: self.disable_cert_check,
        })
    }
}

/// Accepts a bare `:PORT` (listen on all interfaces) alongside full
/// `host:port` forms — `SocketAddr`'s own `FromStr` rejects the former.
fn parse_bind_address(flag: &'static str, raw: &str) -> Result<SocketAddr, Error> {
    let normalized = if raw.starts_with(':') { format!("0.0.0.0{raw}") } else { raw.to_string() };
    normalized
        .parse()
        .map_err(|e| Error::Invalid { flag, reason: format!("{e} (got {raw:?})") })
}

fn decode_base64(flag: &'static str, raw: &str) -> Result<Vec<u8>, Error> {
    base64::engine::general_purpose::STANDARD
        .decode(raw)
        .map_err(|e| Error::Invalid { flag, reason: e.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> Args {
        Args {
            metrics_bind_address: ":8080".to_string(),
            health_probe_bind_address: ":8081".to_string(),
            webhook_port: 9443,
            name: "pomerium.io/ingress-controller".to_string(),
            prefix: "ingress.pomerium.io".to_string(),
            namespaces: "".to_string(),
            databroker_service_url: "http://localhost:5443".to_string(),
            databroker_tls_ca_file: None,
            databroker_tls_ca: None,
            databroker_tls_insecure_skip_verify: false,
            databroker_tls_override_certificate_name: None,
            shared_secret: None,
            update_status_from_service: None,
            disable_cert_check: false,
        }
    }

    #[test]
    fn bind_address_with_bare_colon_listens_on_all_interfaces() {
        let cfg = args().into_config().unwrap();
        assert_eq!(cfg.metrics_bind_address, "0.0.0.0:8080".parse().unwrap());
    }

    #[test]
    fn empty_namespaces_means_all_namespaces() {
        let cfg = args().into_config().unwrap();
        assert!(cfg.namespaces.allows("anything"));
    }

    #[test]
    fn namespaces_list_is_parsed_and_trimmed() {
        let mut a = args();
        a.namespaces = "a, c".to_string();
        let cfg = a.into_config().unwrap();
        assert!(cfg.namespaces.allows("a"));
        assert!(!cfg.namespaces.allows("b"));
        assert!(cfg.namespaces.allows("c"));
    }

    #[test]
    fn update_status_from_service_requires_namespace_slash_name() {
        let mut a = args();
        a.update_status_from_service = Some("pomerium-proxy".to_string());
        assert!(a.into_config().is_err());

        let mut a = args();
        a.update_status_from_service = Some("pomerium/pomerium-proxy".to_string());
        let cfg = a.into_config().unwrap();
        assert_eq!(cfg.update_status_from_service, Some(NamespacedName::new("pomerium", "pomerium-proxy")));
    }

    #[test]
    fn rejects_both_ca_forms_at_once() {
        let mut a = args();
        a.databroker_tls_ca = Some(base64::engine::general_purpose::STANDARD.encode(b"x"));
        a.databroker_tls_ca_file = Some(PathBuf::from("/nonexistent"));
        assert!(a.into_config().is_err());
    }

    #[test]
    fn shared_secret_is_base64_decoded() {
        let mut a = args();
        a.shared_secret = Some(base64::engine::general_purpose::STANDARD.encode(b"sekret"));
        let cfg = a.into_config().unwrap();
        assert_eq!(cfg.shared_secret, Some(b"sekret".to_vec()));
    }
}
