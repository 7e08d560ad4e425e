//! The Lease Controller (§4.8): single-writer election against the
//! databroker. Implemented as a plain `match`-driven loop over
//! [`LeaseState`] rather than a typestate-per-struct encoding — the states
//! are data-light and the transition table reads more plainly this way
//! (SPEC_FULL §4.8).

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::databroker::{DatabrokerClient, Error as DatabrokerError};
use crate::readiness::Readiness;

pub const LEASE_KEY: &str = "lease/ingress-controller";

const TTL: Duration = Duration::from_secs(30);
const RENEW_INTERVAL: Duration = Duration::from_secs(10); // TTL/3
const RENEW_GIVE_UP: Duration = Duration::from_secs(15); // TTL/2
const RETRY_JITTER_MIN: Duration = Duration::from_secs(5);
const RETRY_JITTER_MAX: Duration = Duration::from_secs(10);
/// Bound on how long a task gets to wind down after losing the lease (§5).
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
struct LeaseRecord {
    holder: String,
    acquired_at: u64,
    expires_at: u64,
}

impl LeaseRecord {
    fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }
}

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// The full watch→reconcile→apply→status pipeline: started while the
/// lease is `Held`, cancelled on loss (§4.8).
#[async_trait]
pub trait Pipeline: Send + Sync {
    /// `readiness` is the Reporter's handle (§2.9/§6): the pipeline itself
    /// flips it to `true` once its initial sync against the databroker
    /// completes, not merely once the lease is held.
    async fn run(&self, cancel: CancellationToken, readiness: Readiness);
}

/// Tracks only the states actually visited by [`LeaseController::run`]'s
/// `match`; `Acquiring` and `Releasing` are transient sub-steps of
/// `try_acquire`/`hold` rather than states this type itself holds, since
/// nothing outside those functions observes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LeaseState {
    Idle,
    Held,
}

pub struct LeaseController {
    client: Arc<dyn DatabrokerClient>,
    identity: String,
}

impl LeaseController {
    pub fn new(client: Arc<dyn DatabrokerClient>, identity: String) -> Self {
        Self { client, identity }
    }

    /// Runs `Idle → Acquiring → Held → Releasing → Idle` forever, or until
    /// `shutdown` is cancelled.
    pub async fn run(&self, pipeline: Arc<dyn Pipeline>, readiness: Readiness, shutdown: CancellationToken) {
        let mut state = LeaseState::Idle;
        loop {
            if shutdown.is_cancelled() {
                return;
            }
            state = match state {
                LeaseState::Idle => match self.try_acquire().await {
                    Ok(true) => {
                        tracing::info!(holder = %self.identity, "acquired ingress-controller lease");
                        LeaseState::Held
                    }
                    Ok(false) => {
                        self.jittered_wait(&shutdown).await;
                        LeaseState::Idle
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to contact databroker while acquiring lease");
                        self.jittered_wait(&shutdown).await;
                        LeaseState::Idle
                    }
                },
                LeaseState::Held => {
                    self.hold(pipeline.clone(), &readiness, &shutdown).await;
                    readiness.set(false);
                    LeaseState::Idle
                }
            };
        }
    }

    /// `Idle → Acquiring → Held`: attempt a conditional create. `Ok(true)`
    /// on success, `Ok(false)` if a live lease is already held elsewhere.
    async fn try_acquire(&self) -> Result<bool, DatabrokerError> {
        let existing = self.client.get(LEASE_KEY).await?;
        let now = now_unix();

        let expected_version = match &existing {
            Some(record) => {
                let parsed: LeaseRecord = serde_json::from_slice(&record.value)
                    .map_err(|e| DatabrokerError::Invalid(e.to_string()))?;
                if !parsed.is_expired(now) {
                    return Ok(false);
                }
                Some(record.version)
            }
            None => Some(0),
        };

        let record = LeaseRecord {
            holder: self.identity.clone(),
            acquired_at: now,
            expires_at: now + TTL.as_secs(),
        };
        let bytes = serde_json::to_vec(&record).expect("LeaseRecord always serializes");

        match self.client.put(LEASE_KEY, bytes, expected_version).await {
            Ok(()) => Ok(true),
            // Another replica's create/renew raced ahead of ours.
            Err(DatabrokerError::Invalid(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// `Held`: run the pipeline, renewing at `TTL/3` until the lease is
    /// lost or shutdown is requested, then tear the pipeline down within
    /// `SHUTDOWN_GRACE`.
    async fn hold(&self, pipeline: Arc<dyn Pipeline>, readiness: &Readiness, shutdown: &CancellationToken) {
        let pipeline_cancel = CancellationToken::new();
        let handle: JoinHandle<()> = {
            let cancel = pipeline_cancel.clone();
            let readiness = readiness.clone();
            tokio::spawn(async move { pipeline.run(cancel, readiness).await })
        };

        let mut renew_failures_since: Option<Instant> = None;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    self.release().await;
                    break;
                }
                _ = tokio::time::sleep(RENEW_INTERVAL) => {
                    match self.renew().await {
                        Ok(true) => renew_failures_since = None,
                        Ok(false) => {
                            tracing::warn!("lost ingress-controller lease to another holder");
                            break;
                        }
                        Err(e) => {
                            let since = *renew_failures_since.get_or_insert_with(Instant::now);
                            tracing::warn!(error = %e, "transient error renewing lease");
                            if since.elapsed() >= RENEW_GIVE_UP {
                                tracing::warn!("giving up renewing lease after sustained errors");
                                break;
                            }
                        }
                    }
                }
            }
        }

        pipeline_cancel.cancel();
        if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
            tracing::warn!("pipeline did not shut down within the grace period after losing the lease");
        }
    }

    /// `Ok(true)`: renewed. `Ok(false)`: another holder now owns the key.
    async fn renew(&self) -> Result<bool, DatabrokerError> {
        let Some(existing) = self.client.get(LEASE_KEY).await? else {
            return Ok(false);
        };
        let parsed: LeaseRecord = serde_json::from_slice(&existing.value)
            .map_err(|e| DatabrokerError::Invalid(e.to_string()))?;
        if parsed.holder != self.identity {
            return Ok(false);
        }

        let record = LeaseRecord {
            holder: self.identity.clone(),
            acquired_at: parsed.acquired_at,
            expires_at: now_unix() + TTL.as_secs(),
        };
        let bytes = serde_json::to_vec(&record).expect("LeaseRecord always serializes");

        match self.client.put(LEASE_KEY, bytes, Some(existing.version)).await {
            Ok(()) => Ok(true),
            Err(DatabrokerError::Invalid(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn release(&self) {
        let Ok(Some(existing)) = self.client.get(LEASE_KEY).await else { return };
        let Ok(parsed) = serde_json::from_slice::<LeaseRecord>(&existing.value) else { return };
        if parsed.holder != self.identity {
            return;
        }
        if let Err(e) = self.client.delete(LEASE_KEY).await {
            tracing::warn!(error = %e, "failed to release ingress-controller lease");
        }
    }

    async fn jittered_wait(&self, shutdown: &CancellationToken) {
        let wait = rand::thread_rng().gen_range(RETRY_JITTER_MIN..=RETRY_JITTER_MAX);
        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = tokio::time::sleep(wait) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::databroker::InMemoryDatabroker;

    fn controller(client: Arc<dyn DatabrokerClient>, identity: &str) -> LeaseController {
        LeaseController::new(client, identity.to_string())
    }

    #[tokio::test]
    async fn try_acquire_succeeds_when_no_lease_exists() {
        let db: Arc<dyn DatabrokerClient> = Arc::new(InMemoryDatabroker::new());
        let lc = controller(db, "replica-a");
        assert!(lc.try_acquire().await.unwrap());
    }

    #[tokio::test]
    async fn try_acquire_fails_while_another_holder_is_live() {
        let db: Arc<dyn DatabrokerClient> = Arc::new(InMemoryDatabroker::new());
        let a = controller(db.clone(), "replica-a");
        let b = controller(db, "replica-b");

        assert!(a.try_acquire().await.unwrap());
        assert!(!b.try_acquire().await.unwrap());
    }

    #[tokio::test]
    async fn try_acquire_succeeds_once_the_existing_lease_is_expired() {
        let db = Arc::new(InMemoryDatabroker::new());
        let expired = LeaseRecord { holder: "replica-a".to_string(), acquired_at: 0, expires_at: 0 };
        db.put(LEASE_KEY, serde_json::to_vec(&expired).unwrap(), None).await.unwrap();

        let b = controller(db as Arc<dyn DatabrokerClient>, "replica-b");
        assert!(b.try_acquire().await.unwrap());
    }

    #[tokio::test]
    async fn renew_extends_the_lease_for_the_current_holder() {
        let db: Arc<dyn DatabrokerClient> = Arc::new(InMemoryDatabroker::new());
        let lc = controller(db.clone(), "replica-a");
        assert!(lc.try_acquire().await.unwrap());

        let before = db.get(LEASE_KEY).await.unwrap().unwrap();
        let before_parsed: LeaseRecord = serde_json::from_slice(&before.value).unwrap();

        assert!(lc.renew().await.unwrap());

        let after = db.get(LEASE_KEY).await.unwrap().unwrap();
        let after_parsed: LeaseRecord = serde_json::from_slice(&after.value).unwrap();
        assert!(after_parsed.expires_at >= before_parsed.expires_at);
        assert_eq!(after_parsed.holder, "replica-a");
    }

    #[tokio::test]
    async fn renew_reports_loss_when_another_holder_took_over() {
        let db: Arc<dyn DatabrokerClient> = Arc::new(InMemoryDatabroker::new());
        let a = controller(db.clone(), "replica-a");
        assert!(a.try_acquire().await.unwrap());

        // Simulate another holder overwriting the record directly.
        let stolen = LeaseRecord {
            holder: "replica-b".to_string(),
            acquired_at: now_unix(),
            expires_at: now_unix() + 30,
        };
        let existing = db.get(LEASE_KEY).await.unwrap().unwrap();
        db.put(LEASE_KEY, serde_json::to_vec(&stolen).unwrap(), Some(existing.version))
            .await
            .unwrap();

        assert!(!a.renew().await.unwrap());
    }

    #[tokio::test]
    async fn release_only_deletes_our_own_lease() {
        let db: Arc<dyn DatabrokerClient> = Arc::new(InMemoryDatabroker::new());
        let a = controller(db.clone(), "replica-a");
        assert!(a.try_acquire().await.unwrap());

        a.release().await;
        assert!(db.get(LEASE_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn release_is_a_noop_if_we_are_not_the_holder() {
        let db: Arc<dyn DatabrokerClient> = Arc::new(InMemoryDatabroker::new());
        let a = controller(db.clone(), "replica-a");
        let b = controller(db.clone(), "replica-b");
        assert!(a.try_acquire().await.unwrap());

        b.release().await;
        assert!(db.get(LEASE_KEY).await.unwrap().is_some());
    }
}
