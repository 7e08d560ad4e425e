use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{DatabrokerClient, Error, Record};

/// In-process stand-in for the databroker, used by the component test
/// suite. Not built for production; there's no persistence, no TLS, no
/// JWT signing — just the contract in `DatabrokerClient`.
#[derive(Default)]
pub struct InMemoryDatabroker {
    records: Mutex<HashMap<String, Record>>,
}

impl InMemoryDatabroker {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DatabrokerClient for InMemoryDatabroker {
    async fn get(&self, key: &str) -> Result<Option<Record>, Error> {
        Ok(self.records.lock().unwrap().get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>, expected_version: Option<u64>) -> Result<(), Error> {
        let mut records = self.records.lock().unwrap();
        let next_version = match (records.get(key), expected_version) {
            (Some(existing), Some(expected)) if existing.version != expected => {
                return Err(Error::Invalid(format!(
                    "version conflict on {key}: expected {expected}, found {}",
                    existing.version
                )));
            }
            (None, Some(expected)) if expected != 0 => {
                return Err(Error::Invalid(format!(
                    "version conflict on {key}: expected {expected}, found no record"
                )));
            }
            (Some(existing), _) => existing.version + 1,
            (None, _) => 1,
        };
        let record = Record {
            value,
            version: next_version,
        };
        records.insert(key.to_string(), record);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), Error> {
        self.records.lock().unwrap().remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<(String, Record)>, Error> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_roundtrips() {
        let db = InMemoryDatabroker::new();
        db.put("ingress/default/app", b"payload".to_vec(), None)
            .await
            .unwrap();
        let record = db.get("ingress/default/app").await.unwrap().unwrap();
        assert_eq!(record.value, b"payload");
        assert_eq!(record.version, 1);
    }

    #[tokio::test]
    async fn conditional_put_rejects_version_mismatch() {
        let db = InMemoryDatabroker::new();
        db.put("lease/ingress-controller", b"a".to_vec(), None)
            .await
            .unwrap();
        let err = db
            .put("lease/ingress-controller", b"b".to_vec(), Some(99))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Invalid(_)));
    }

    #[tokio::test]
    async fn conditional_put_succeeds_on_create_when_absent() {
        let db = InMemoryDatabroker::new();
        db.put("lease/ingress-controller", b"a".to_vec(), Some(0))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn list_filters_by_prefix() {
        let db = InMemoryDatabroker::new();
        db.put("ingress/default/a", b"1".to_vec(), None).await.unwrap();
        db.put("ingress/default/b", b"2".to_vec(), None).await.unwrap();
        db.put("lease/ingress-controller", b"3".to_vec(), None).await.unwrap();
        let listed = db.list("ingress/").await.unwrap();
        assert_eq!(listed.len(), 2);
    }

    #[tokio::test]
    async fn delete_removes_the_record() {
        let db = InMemoryDatabroker::new();
        db.put("ingress/default/a", b"1".to_vec(), None).await.unwrap();
        db.delete("ingress/default/a").await.unwrap();
        assert!(db.get("ingress/default/a").await.unwrap().is_none());
    }
}
