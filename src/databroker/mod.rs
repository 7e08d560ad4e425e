//! The external store ("databroker", §6): an abstract key/value store with
//! conditional writes, used both for `ingress/*` config records and for the
//! election lease. The concrete RPC transport is out of scope (§1); this
//! module defines the trait boundary plus an HTTP reference client and an
//! in-memory test double.

pub mod http;
pub mod memory;

use async_trait::async_trait;

pub use memory::InMemoryDatabroker;

#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    /// Databroker unreachable, timed out, or returned a 5xx — worth
    /// retrying with backoff (§7).
    #[error("databroker transient error: {0}")]
    Transient(String),
    /// Malformed request, conflicting version, or similar — retrying
    /// as-is would never succeed (§7).
    #[error("databroker rejected the request: {0}")]
    Invalid(String),
}

impl Error {
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_))
    }
}

/// One record as read from the store: raw bytes plus the version needed
/// for a conditional write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub value: Vec<u8>,
    pub version: u64,
}

/// §6: `Put` (optionally conditional on a prior version, for lease
/// coordination), `Get`, `Delete`, `List(prefix)`.
///
/// `#[async_trait]` rather than native `async fn` in a trait so the type is
/// dyn-compatible: call sites hold an `Arc<dyn DatabrokerClient>`.
#[async_trait]
pub trait DatabrokerClient: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Record>, Error>;

    /// `expected_version: Some(v)` makes the write conditional — it fails
    /// with `Error::Invalid` if the stored version doesn't match. `None`
    /// always writes (used for ordinary config upserts).
    async fn put(&self, key: &str, value: Vec<u8>, expected_version: Option<u64>) -> Result<(), Error>;

    async fn delete(&self, key: &str) -> Result<(), Error>;

    async fn list(&self, prefix: &str) -> Result<Vec<(String, Record)>, Error>;
}
