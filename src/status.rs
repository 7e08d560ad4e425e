//! The Status Updater (§4.7): watches a designated proxy Service and
//! propagates its `status.loadBalancer.ingress` onto every currently-owned
//! Ingress. A plain [`watcher`] stream is enough here — there's nothing to
//! reconcile back onto the Service itself, unlike the main Ingress watch.

use futures::StreamExt;
use k8s_openapi::api::core::v1::{LoadBalancerIngress, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{Patch, PatchParams};
use kube::runtime::watcher::{self, watcher, Event};
use kube::runtime::WatchStreamExt;
use kube::{Api, Client, ResourceExt};
use serde_json::json;

use crate::k8s::{ownership, NamespaceFilter, Shared};

/// Watches `service_api` (already namespaced to the target's namespace) for
/// `target_name`, and on every observed change to
/// `status.loadBalancer.ingress`, patches the same slice onto every owned
/// Ingress. No-op writes are suppressed by comparing against the Ingress'
/// current status before issuing a patch.
pub async fn run(
    service_api: Api<Service>,
    client: Client,
    shared: Shared,
    controller_name: String,
    namespaces: NamespaceFilter,
    target_name: String,
) {
    let stream = watcher(service_api, watcher::Config::default()).default_backoff();
    tokio::pin!(stream);
    let mut last: Option<Vec<LoadBalancerIngress>> = None;

    while let Some(event) = stream.next().await {
        let svc = match event {
            Ok(Event::Apply(svc)) | Ok(Event::InitApply(svc)) => svc,
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!(error = %e, "status-source service watch error");
                continue;
            }
        };
        if svc.name_any() != target_name {
            continue;
        }

        let current = load_balancer_ingress(&svc);
        if last.as_ref() == Some(&current) {
            continue;
        }
        last = Some(current.clone());

        if let Err(e) = propagate(&client, &shared, &controller_name, &namespaces, &current).await {
            tracing::warn!(error = %e, "failed to propagate load balancer status to ingresses");
        }
    }
}

fn load_balancer_ingress(svc: &Service) -> Vec<LoadBalancerIngress> {
    svc.status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.clone())
        .unwrap_or_default()
}

async fn propagate(
    client: &Client,
    shared: &Shared,
    controller_name: &str,
    namespaces: &NamespaceFilter,
    lb_ingress: &[LoadBalancerIngress],
) -> Result<(), kube::Error> {
    let class_objs = shared.ingress_classes().await;
    let classes: Vec<_> = class_objs.iter().filter_map(|o| o.as_ingress_class().cloned()).collect();

    for obj in shared.ingresses(namespaces).await {
        let Some(ingress) = obj.as_ingress() else { continue };
        if !ownership::is_owned(ingress, &classes, controller_name) {
            continue;
        }
        let existing = load_balancer_ingress_of(ingress);
        if existing == lb_ingress {
            continue;
        }
        let Some(ns) = ingress.namespace() else { continue };

        let patch = json!({ "status": { "loadBalancer": { "ingress": lb_ingress } } });
        let api: Api<Ingress> = Api::namespaced(client.clone(), &ns);
        api.patch_status(&ingress.name_any(), &PatchParams::default(), &Patch::Merge(patch))
            .await?;
    }
    Ok(())
}

fn load_balancer_ingress_of(ingress: &Ingress) -> Vec<LoadBalancerIngress> {
    ingress
        .status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.clone())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{LoadBalancerIngress as LbIngress, LoadBalancerStatus, ServiceStatus};
    use kube::api::ObjectMeta;

    fn service_with_lb(ips: &[&str]) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some("pomerium-proxy".to_string()),
                namespace: Some("pomerium".to_string()),
                ..Default::default()
            },
            status: Some(ServiceStatus {
                load_balancer: Some(LoadBalancerStatus {
                    ingress: Some(
                        ips.iter()
                            .map(|ip| LbIngress { ip: Some(ip.to_string()), ..Default::default() })
                            .collect(),
                    ),
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn load_balancer_ingress_reads_the_nested_status_field() {
        let svc = service_with_lb(&["10.10.10.10"]);
        let got = load_balancer_ingress(&svc);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].ip.as_deref(), Some("10.10.10.10"));
    }

    #[test]
    fn missing_status_reads_as_empty() {
        let svc = Service {
            metadata: ObjectMeta { name: Some("x".to_string()), ..Default::default() },
            ..Default::default()
        };
        assert!(load_balancer_ingress(&svc).is_empty());
    }
}
