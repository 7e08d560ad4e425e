//! Per-kind watch loops. Each keeps the Object Registry current and pushes
//! affected Ingress keys onto the work queue — the "four sources" of §4.5.
//!
//! Built on the same `watcher(api, wc).default_backoff()` shape used
//! elsewhere in this codebase, but without feeding a `reflector::Store`,
//! since the Object Registry and Dependency Graph (`Shared`) already hold
//! everything a reconcile needs.

use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::{Endpoints, Secret, Service};
use k8s_openapi::api::networking::v1::{Ingress, IngressClass};
use kube::runtime::watcher::{self, watcher, Event};
use kube::runtime::WatchStreamExt;
use kube::{Api, ResourceExt};
use tokio_stream::wrappers::IntervalStream;

use crate::k8s::{NamespaceFilter, NamespacedName, ObjectKey, Shared};
use crate::k8s::ownership;

use super::queue::Queue;

pub async fn run_ingress_watch(
    api: Api<Ingress>,
    shared: Shared,
    queue: Queue,
    filter: NamespaceFilter,
    init_done: tokio::sync::oneshot::Sender<()>,
) {
    let stream = watcher(api, watcher::Config::default()).default_backoff();
    tokio::pin!(stream);
    let mut init_done = Some(init_done);
    while let Some(event) = stream.next().await {
        match event {
            Ok(Event::Apply(ing)) | Ok(Event::InitApply(ing)) => {
                let Some(ns) = ing.namespace() else { continue };
                if !filter.allows(&ns) {
                    continue;
                }
                let name = ing.name_any();
                shared.upsert(ing.into()).await;
                queue.enqueue(NamespacedName::new(ns, name));
            }
            Ok(Event::Delete(ing)) => {
                let Some(ns) = ing.namespace() else { continue };
                let name = ing.name_any();
                shared.delete(&ObjectKey::ingress(ns.clone(), name.clone())).await;
                let key = NamespacedName::new(ns, name);
                shared.remove_ingress(&key).await;
                queue.enqueue(key);
            }
            Ok(Event::Init) => {}
            Ok(Event::InitDone) => {
                if let Some(tx) = init_done.take() {
                    let _ = tx.send(());
                }
            }
            Err(e) => tracing::warn!(error = %e, "ingress watch error"),
        }
    }
}

pub async fn run_ingress_class_watch(api: Api<IngressClass>, shared: Shared, queue: Queue) {
    let stream = watcher(api, watcher::Config::default()).default_backoff();
    tokio::pin!(stream);
    while let Some(event) = stream.next().await {
        match event {
            Ok(Event::Apply(class)) | Ok(Event::InitApply(class)) => {
                let name = class.name_any();
                shared.upsert(class.into()).await;
                requeue_affected_by_class(&shared, &queue, &name).await;
            }
            Ok(Event::Delete(class)) => {
                let name = class.name_any();
                shared.delete(&ObjectKey::ingress_class(name.clone())).await;
                requeue_affected_by_class(&shared, &queue, &name).await;
            }
            Ok(Event::Init) | Ok(Event::InitDone) => {}
            Err(e) => tracing::warn!(error = %e, "ingressclass watch error"),
        }
    }
}

async fn requeue_affected_by_class(shared: &Shared, queue: &Queue, class_name: &str) {
    let ingresses = shared.ingresses(&NamespaceFilter::default()).await;
    let pairs: Vec<(NamespacedName, Ingress)> = ingresses
        .iter()
        .filter_map(|o| {
            let ing = o.as_ingress()?;
            Some((NamespacedName::new(ing.namespace()?, ing.name_any()), ing.clone()))
        })
        .collect();
    for key in ownership::affected_by_class_change(class_name, &pairs) {
        queue.enqueue(key);
    }
}

/// Shared body for the Service/Endpoints/Secret watch loops: keep the
/// registry current, then fan out to whichever Ingresses the Dependency
/// Graph says reference this object.
async fn run_dependency_watch<K>(
    api: Api<K>,
    shared: Shared,
    queue: Queue,
    filter: NamespaceFilter,
    key_of: impl Fn(&str, &str) -> ObjectKey,
    kind_label: &'static str,
) where
    K: kube::Resource<DynamicType = ()>
        + Clone
        + std::fmt::Debug
        + serde::de::DeserializeOwned
        + Into<crate::k8s::Object>
        + Send
        + Sync
        + 'static,
{
    let stream = watcher(api, watcher::Config::default()).default_backoff();
    tokio::pin!(stream);
    while let Some(event) = stream.next().await {
        match event {
            Ok(Event::Apply(obj)) | Ok(Event::InitApply(obj)) => {
                let Some(ns) = obj.namespace() else { continue };
                if !filter.allows(&ns) {
                    continue;
                }
                let name = obj.name_any();
                let key = key_of(&ns, &name);
                shared.upsert(obj.into()).await;
                for dep in shared.dependents(&key).await {
                    queue.enqueue(dep);
                }
            }
            Ok(Event::Delete(obj)) => {
                let Some(ns) = obj.namespace() else { continue };
                let name = obj.name_any();
                let key = key_of(&ns, &name);
                shared.delete(&key).await;
                for dep in shared.dependents(&key).await {
                    queue.enqueue(dep);
                }
            }
            Ok(Event::Init) | Ok(Event::InitDone) => {}
            Err(e) => tracing::warn!(error = %e, kind = kind_label, "dependency watch error"),
        }
    }
}

pub async fn run_service_watch(api: Api<Service>, shared: Shared, queue: Queue, filter: NamespaceFilter) {
    run_dependency_watch(api, shared, queue, filter, ObjectKey::service, "Service").await
}

pub async fn run_endpoints_watch(api: Api<Endpoints>, shared: Shared, queue: Queue, filter: NamespaceFilter) {
    run_dependency_watch(api, shared, queue, filter, ObjectKey::endpoints, "Endpoints").await
}

pub async fn run_secret_watch(api: Api<Secret>, shared: Shared, queue: Queue, filter: NamespaceFilter) {
    run_dependency_watch(api, shared, queue, filter, ObjectKey::secret, "Secret").await
}

/// §4.5's "periodic full resync": heals any reconcile that was missed
/// because an event was dropped or arrived while the pipeline was down.
pub async fn run_full_resync(shared: Shared, queue: Queue, interval: Duration) {
    let mut ticker = IntervalStream::new(tokio::time::interval(interval));
    ticker.next().await; // first tick fires immediately; skip it, watches already primed the queue
    while ticker.next().await.is_some() {
        for obj in shared.ingresses(&NamespaceFilter::default()).await {
            if let Some(ing) = obj.as_ingress() {
                if let Some(ns) = ing.namespace() {
                    queue.enqueue(NamespacedName::new(ns, ing.name_any()));
                }
            }
        }
    }
}
