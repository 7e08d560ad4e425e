//! The Reconciler (§4.5): a single-threaded work loop that turns Ingress
//! keys off the [`Queue`] into databroker writes, re-evaluating ownership
//! and re-running the Assembler on every dequeue.

pub mod backoff;
pub mod events;
pub mod queue;
pub mod watch;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::networking::v1::IngressClass;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::applier::Applier;
use crate::assembler::{assemble, AssemblerConfig, IngressConfig};
use crate::databroker::Error as DatabrokerError;
use crate::k8s::{ownership, NamespaceFilter, NamespacedName, ObjectKey, Shared};
use crate::metrics::Metrics;

use events::EventSink;
use queue::Queue;

#[derive(Clone, Debug)]
pub struct ReconcilerConfig {
    pub controller_name: String,
    pub annotation_prefix: String,
    pub disable_cert_check: bool,
}

impl ReconcilerConfig {
    fn assembler_config(&self) -> AssemblerConfig {
        AssemblerConfig {
            annotation_prefix: self.annotation_prefix.clone(),
            disable_cert_check: self.disable_cert_check,
        }
    }
}

/// §4.5's main loop: one item at a time, deduplicated by [`Queue`].
/// Transient databroker errors are retried with backoff (§4.6/§7) by
/// re-enqueueing after a delay; everything else is resolved for this key
/// and will only be revisited on its next event.
pub async fn run(
    mut rx: mpsc::UnboundedReceiver<NamespacedName>,
    queue: Queue,
    shared: Shared,
    applier: Arc<Applier>,
    events: Arc<dyn EventSink>,
    metrics: Arc<Metrics>,
    cfg: ReconcilerConfig,
    cancel: CancellationToken,
) {
    let mut attempts: HashMap<NamespacedName, u32> = HashMap::new();
    loop {
        let key = tokio::select! {
            _ = cancel.cancelled() => break,
            received = rx.recv() => match received {
                Some(key) => key,
                None => break,
            },
        };
        queue.mark_dequeued(&key);

        match reconcile_one(&key, &shared, &applier, events.as_ref(), &cfg).await {
            Outcome::Done => {
                metrics.record_outcome("done");
                attempts.remove(&key);
            }
            Outcome::RetryTransient => {
                metrics.record_outcome("retry_transient");
                let attempt = attempts.entry(key.clone()).or_insert(0);
                let delay = backoff::next_delay(*attempt);
                *attempt += 1;
                let queue = queue.clone();
                let retry_key = key.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    queue.enqueue(retry_key);
                });
            }
        }
    }
}

enum Outcome {
    /// Resolved: either applied, deleted, recorded Invalid, or rejected
    /// outright by the databroker (non-transient — §7 says these are
    /// logged and dropped, not retried).
    Done,
    RetryTransient,
}

async fn reconcile_one(
    key: &NamespacedName,
    shared: &Shared,
    applier: &Applier,
    events: &dyn EventSink,
    cfg: &ReconcilerConfig,
) -> Outcome {
    let ingress_key = ObjectKey::ingress(&key.namespace, &key.name);
    let Some(obj) = shared.get(&ingress_key).await else {
        // Already deleted; the watch loop cleared the graph and issued the
        // delete itself when it observed the Delete event.
        return Outcome::Done;
    };
    let ingress = obj
        .as_ingress()
        .expect("registry entry keyed as Ingress is always an Ingress")
        .clone();

    let classes = owned_classes(shared).await;

    if !ownership::is_owned(&ingress, &classes, &cfg.controller_name) {
        shared.remove_ingress(key).await;
        return match applier.delete(key).await {
            Ok(()) => Outcome::Done,
            Err(e) => handle_databroker_error(key, e),
        };
    }

    let ingress_class = ownership::resolve_class(&ingress, &classes, &cfg.controller_name).cloned();
    let skip_tls_validation = ownership::is_http01_solver(&ingress);
    let assembler_cfg = cfg.assembler_config();

    match assemble(&ingress, ingress_class.as_ref(), shared, &assembler_cfg, skip_tls_validation).await {
        Err(reason) => {
            let outcome = match applier.delete(key).await {
                Ok(()) => Outcome::Done,
                Err(e) => handle_databroker_error(key, e),
            };
            events.record_invalid(&ingress, &reason).await;
            outcome
        }
        Ok(assembled) => match applier.upsert(&assembled.config).await {
            Ok(changed) => {
                if changed {
                    events.record_applied(&ingress).await;
                }
                Outcome::Done
            }
            Err(e) => handle_databroker_error(key, e),
        },
    }
}

fn handle_databroker_error(key: &NamespacedName, err: DatabrokerError) -> Outcome {
    if err.is_transient() {
        tracing::warn!(ingress = %key, error = %err, "transient databroker error, will retry");
        Outcome::RetryTransient
    } else {
        tracing::warn!(ingress = %key, error = %err, "databroker rejected the request, dropping until next event");
        Outcome::Done
    }
}

async fn owned_classes(shared: &Shared) -> Vec<IngressClass> {
    shared
        .ingress_classes()
        .await
        .iter()
        .filter_map(|o| o.as_ingress_class().cloned())
        .collect()
}

/// Used once at pipeline startup (§4.6 bulk `Set`): every Ingress in the
/// registry snapshot that is both owned and emittable, after the initial
/// Kubernetes list has been consumed. Assembly failures are simply
/// excluded here — the per-key reconcile triggered by the same watch
/// event will record the `Invalid` event once it runs.
pub async fn assemble_all_owned(shared: &Shared, cfg: &ReconcilerConfig) -> Vec<IngressConfig> {
    let classes = owned_classes(shared).await;
    let assembler_cfg = cfg.assembler_config();

    let mut out = Vec::new();
    for obj in shared.ingresses(&NamespaceFilter::default()).await {
        let Some(ingress) = obj.as_ingress() else { continue };
        if !ownership::is_owned(ingress, &classes, &cfg.controller_name) {
            continue;
        }
        let ingress_class = ownership::resolve_class(ingress, &classes, &cfg.controller_name).cloned();
        let skip_tls_validation = ownership::is_http01_solver(ingress);
        if let Ok(assembled) =
            assemble(ingress, ingress_class.as_ref(), shared, &assembler_cfg, skip_tls_validation).await
        {
            out.push(assembled.config);
        }
    }
    out
}
