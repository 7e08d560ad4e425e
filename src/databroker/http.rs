//! Reference HTTP implementation of [`DatabrokerClient`]. The wire
//! protocol itself is out of scope (the concrete RPC transport to the
//! databroker is a deployment detail); this is a thin, swappable stand-in —
//! request, map response, surface transient-vs-invalid errors — rather than
//! a faithful reimplementation of pomerium's own gRPC protocol.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use base64::Engine;
use jsonwebtoken::{encode, EncodingKey, Header};
use reqwest::Url;
use serde::{Deserialize, Serialize};

use super::{DatabrokerClient, Error, Record};

#[derive(Clone, Debug, Default)]
pub struct TlsConfig {
    pub ca: Option<Vec<u8>>,
    pub insecure_skip_verify: bool,
    /// SNI / certificate-name override. Plumbed through to callers; not
    /// applied by `reqwest`'s high-level client builder, which has no
    /// stable hook for per-connection SNI override. A production
    /// transport would carry this into a custom `hyper` connector — left
    /// as a documented gap since the transport itself is out of scope.
    pub override_certificate_name: Option<String>,
}

#[derive(Clone)]
struct JwtSigner {
    key: EncodingKey,
}

#[derive(Serialize, Deserialize)]
struct Claims {
    iss: &'static str,
    iat: u64,
    exp: u64,
}

impl JwtSigner {
    fn token(&self) -> Result<String, Error> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| Error::Invalid(e.to_string()))?
            .as_secs();
        let claims = Claims {
            iss: "pomerium-ingress-controller",
            iat: now,
            exp: now + 60,
        };
        encode(&Header::default(), &claims, &self.key)
            .map_err(|e| Error::Invalid(format!("failed to sign databroker request: {e}")))
    }
}

pub struct HttpDatabroker {
    http: reqwest::Client,
    base_url: Url,
    signer: Option<JwtSigner>,
}

impl HttpDatabroker {
    pub fn new(base_url: Url, tls: &TlsConfig, shared_secret: Option<&[u8]>) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(10));

        if let Some(ca) = &tls.ca {
            let cert = reqwest::Certificate::from_pem(ca)?;
            builder = builder.add_root_certificate(cert);
        }
        if tls.insecure_skip_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let signer = shared_secret.map(|secret| JwtSigner {
            key: EncodingKey::from_secret(secret),
        });

        Ok(Self {
            http: builder.build()?,
            base_url,
            signer,
        })
    }

    fn url(&self, path: &str) -> Result<Url, Error> {
        self.base_url
            .join(path)
            .map_err(|e| Error::Invalid(format!("bad databroker url: {e}")))
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder, Error> {
        match &self.signer {
            Some(signer) => Ok(builder.bearer_auth(signer.token()?)),
            None => Ok(builder),
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response, Error> {
        let builder = self.request(builder)?;
        let resp = builder
            .send()
            .await
            .map_err(|e| Error::Transient(e.to_string()))?;
        if resp.status().is_server_error() || resp.status() == reqwest::StatusCode::REQUEST_TIMEOUT {
            return Err(Error::Transient(format!("databroker returned {}", resp.status())));
        }
        if resp.status().is_client_error() {
            return Err(Error::Invalid(format!("databroker returned {}", resp.status())));
        }
        Ok(resp)
    }
}

#[derive(Serialize, Deserialize)]
struct WireRecord {
    value: String,
    version: u64,
}

impl WireRecord {
    fn into_record(self) -> Result<Record, Error> {
        let value = base64::engine::general_purpose::STANDARD
            .decode(self.value)
            .map_err(|e| Error::Invalid(format!("malformed databroker payload: {e}")))?;
        Ok(Record {
            value,
            version: self.version,
        })
    }
}

#[derive(Serialize)]
struct PutBody {
    value: String,
    expected_version: Option<u64>,
}

#[async_trait]
impl DatabrokerClient for HttpDatabroker {
    async fn get(&self, key: &str) -> Result<Option<Record>, Error> {
        let url = self.url(&format!("v1/records/{key}"))?;
        let builder = self.request(self.http.get(url))?;
        let resp = builder.send().await.map_err(|e| Error::Transient(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if resp.status().is_server_error() {
            return Err(Error::Transient(format!("databroker returned {}", resp.status())));
        }
        if resp.status().is_client_error() {
            return Err(Error::Invalid(format!("databroker returned {}", resp.status())));
        }
        let wire: WireRecord = resp
            .json()
            .await
            .map_err(|e| Error::Transient(e.to_string()))?;
        Ok(Some(wire.into_record()?))
    }

    async fn put(&self, key: &str, value: Vec<u8>, expected_version: Option<u64>) -> Result<(), Error> {
        let url = self.url(&format!("v1/records/{key}"))?;
        let body = PutBody {
            value: base64::engine::general_purpose::STANDARD.encode(value),
            expected_version,
        };
        self.send(self.http.put(url).json(&body)).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), Error> {
        let url = self.url(&format!("v1/records/{key}"))?;
        self.send(self.http.delete(url)).await?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<(String, Record)>, Error> {
        let url = self.url(&format!("v1/records?prefix={prefix}"))?;
        let resp = self.send(self.http.get(url)).await?;
        let wire: Vec<(String, WireRecord)> =
            resp.json().await.map_err(|e| Error::Transient(e.to_string()))?;
        wire.into_iter()
            .map(|(k, r)| Ok((k, r.into_record()?)))
            .collect()
    }
}
