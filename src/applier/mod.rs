//! The Config Applier (§4.6): idempotent upsert/delete of an
//! [`IngressConfig`] against the databroker.

use std::collections::HashSet;
use std::sync::Arc;

use crate::assembler::IngressConfig;
use crate::databroker::{DatabrokerClient, Error as DatabrokerError};
use crate::k8s::NamespacedName;

const KEY_PREFIX: &str = "ingress/";

pub struct Applier {
    client: Arc<dyn DatabrokerClient>,
}

impl Applier {
    pub fn new(client: Arc<dyn DatabrokerClient>) -> Self {
        Self { client }
    }

    /// §4.6: write `config` if it differs from what's already stored,
    /// report whether it did. Applying the same config twice must report
    /// `changed=false` on the second call (P5).
    pub async fn upsert(&self, config: &IngressConfig) -> Result<bool, DatabrokerError> {
        let key = config.databroker_key();
        let canonical = config.canonical_bytes();

        if let Some(existing) = self.client.get(&key).await? {
            if existing.value == canonical {
                return Ok(false);
            }
        }
        self.client.put(&key, canonical, None).await?;
        Ok(true)
    }

    pub async fn delete(&self, name: &NamespacedName) -> Result<(), DatabrokerError> {
        self.client.delete(&format!("{KEY_PREFIX}{name}")).await
    }

    /// §4.6 bulk variant: replace the entire set atomically from the
    /// reconciler's perspective. Called once after the initial Ingress
    /// list has been processed, at pipeline startup — anything already in
    /// the store whose key isn't in `configs` is stale and gets deleted.
    pub async fn set(&self, configs: &[IngressConfig]) -> Result<(), DatabrokerError> {
        let wanted: HashSet<String> = configs.iter().map(|c| c.databroker_key()).collect();

        for config in configs {
            self.upsert(config).await?;
        }

        for (key, _) in self.client.list(KEY_PREFIX).await? {
            if !wanted.contains(&key) {
                self.client.delete(&key).await?;
            }
        }
        Ok(())
    }
}
