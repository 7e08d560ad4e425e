//! Wires the Object Registry, the per-kind watch loops, the Reconciler, the
//! Status Updater, the Lease Controller and the Readiness Reporter into one
//! process (§2, §4).

mod applier;
mod assembler;
mod cli;
mod databroker;
mod k8s;
mod lease;
mod metrics;
mod readiness;
mod reconciler;
mod status;
mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use k8s_openapi::api::core::v1::{Endpoints, Secret, Service};
use k8s_openapi::api::networking::v1::{Ingress, IngressClass};
use kube::{Api, Client};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use applier::Applier;
use cli::Config;
use databroker::http::{HttpDatabroker, TlsConfig};
use databroker::DatabrokerClient;
use k8s::{NamespaceFilter, Shared};
use lease::{LeaseController, Pipeline};
use metrics::Metrics;
use readiness::Readiness;
use reconciler::events::EventRecorder;
use reconciler::queue::Queue;
use reconciler::ReconcilerConfig;

const FULL_RESYNC_INTERVAL: Duration = Duration::from_secs(600);

/// The full watch → reconcile → apply → status pipeline (§4), started once
/// the election lease is held and torn down the moment it's lost.
struct ControllerPipeline {
    client: Client,
    applier: Arc<Applier>,
    namespaces: NamespaceFilter,
    cfg: ReconcilerConfig,
    update_status_from_service: Option<k8s::NamespacedName>,
    metrics: Arc<Metrics>,
}

#[async_trait]
impl Pipeline for ControllerPipeline {
    async fn run(&self, cancel: CancellationToken, readiness: Readiness) {
        let shared = Shared::new();
        let (queue, rx) = Queue::new();

        let (ingress_init_tx, ingress_init_rx) = tokio::sync::oneshot::channel();

        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        tasks.push(tokio::spawn(reconciler::watch::run_ingress_watch(
            Api::<Ingress>::all(self.client.clone()),
            shared.clone(),
            queue.clone(),
            self.namespaces.clone(),
            ingress_init_tx,
        )));
        tasks.push(tokio::spawn(reconciler::watch::run_ingress_class_watch(
            Api::<IngressClass>::all(self.client.clone()),
            shared.clone(),
            queue.clone(),
        )));
        tasks.push(tokio::spawn(reconciler::watch::run_service_watch(
            Api::<Service>::all(self.client.clone()),
            shared.clone(),
            queue.clone(),
            self.namespaces.clone(),
        )));
        tasks.push(tokio::spawn(reconciler::watch::run_endpoints_watch(
            Api::<Endpoints>::all(self.client.clone()),
            shared.clone(),
            queue.clone(),
            self.namespaces.clone(),
        )));
        tasks.push(tokio::spawn(reconciler::watch::run_secret_watch(
            Api::<Secret>::all(self.client.clone()),
            shared.clone(),
            queue.clone(),
            self.namespaces.clone(),
        )));
        tasks.push(tokio::spawn(reconciler::watch::run_full_resync(
            shared.clone(),
            queue.clone(),
            FULL_RESYNC_INTERVAL,
        )));

        if let Some(target) = &self.update_status_from_service {
            let service_api: Api<Service> = Api::namespaced(self.client.clone(), &target.namespace);
            tasks.push(tokio::spawn(status::run(
                service_api,
                self.client.clone(),
                shared.clone(),
                self.cfg.controller_name.clone(),
                self.namespaces.clone(),
                target.name.clone(),
            )));
        }

        let events = Arc::new(EventRecorder::new(self.client.clone(), &self.cfg.controller_name));
        let reconciler_cancel = CancellationToken::new();
        tasks.push(tokio::spawn(reconciler::run(
            rx,
            queue,
            shared.clone(),
            self.applier.clone(),
            events,
            self.metrics.clone(),
            self.cfg.clone(),
            reconciler_cancel.clone(),
        )));

        // Readiness is "the lease is held and the initial Ingress list has
        // been consumed" (§2.9), not merely "the lease is held" — wait for
        // the first watcher InitDone before flipping it, and then perform
        // the bulk `Set` that reconciles anything the databroker missed
        // while no replica held the lease (§4.6).
        if ingress_init_rx.await.is_ok() {
            let configs = reconciler::assemble_all_owned(&shared, &self.cfg).await;
            if let Err(e) = self.applier.set(&configs).await {
                tracing::warn!(error = %e, "initial bulk sync against the databroker failed");
            }
            readiness.set(true);
        }

        cancel.cancelled().await;
        reconciler_cancel.cancel();
        for task in tasks {
            task.abort();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init();

    let config: Config = match cli::Args::parse().into_config() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    let client = Client::try_default().await?;

    let tls = TlsConfig {
        ca: config.databroker_tls_ca.clone(),
        insecure_skip_verify: config.databroker_tls_insecure_skip_verify,
        override_certificate_name: config.databroker_tls_override_certificate_name.clone(),
    };
    let databroker: Arc<dyn DatabrokerClient> = Arc::new(HttpDatabroker::new(
        config.databroker_service_url.clone(),
        &tls,
        config.shared_secret.as_deref(),
    )?);

    let applier = Arc::new(Applier::new(databroker.clone()));
    let identity = Uuid::new_v4().to_string();
    let readiness = Readiness::new();
    let shutdown = CancellationToken::new();

    let health_router = readiness::router(readiness.clone());
    let health_listener = tokio::net::TcpListener::bind(config.health_probe_bind_address).await?;
    let health_server = tokio::spawn(async move {
        if let Err(e) = axum::serve(health_listener, health_router).await {
            tracing::error!(error = %e, "health probe server exited");
        }
    });

    let metrics = Arc::new(Metrics::new());
    let metrics_router = metrics::router(metrics.clone());
    let metrics_listener = tokio::net::TcpListener::bind(config.metrics_bind_address).await?;
    let metrics_server = tokio::spawn(async move {
        if let Err(e) = axum::serve(metrics_listener, metrics_router).await {
            tracing::error!(error = %e, "metrics server exited");
        }
    });

    let pipeline = Arc::new(ControllerPipeline {
        client,
        applier,
        namespaces: config.namespaces,
        cfg: ReconcilerConfig {
            controller_name: config.controller_name,
            annotation_prefix: config.annotation_prefix,
            disable_cert_check: config.disable_cert_check,
        },
        update_status_from_service: config.update_status_from_service,
        metrics,
    });

    let lease_controller = LeaseController::new(databroker, identity);
    let lease_shutdown = shutdown.clone();
    let lease_readiness = readiness.clone();
    let lease_task = tokio::spawn(async move {
        lease_controller.run(pipeline, lease_readiness, lease_shutdown).await;
    });

    wait_for_shutdown_signal().await;
    tracing::info!("shutdown requested, releasing lease if held");
    shutdown.cancel();
    let _ = lease_task.await;
    health_server.abort();
    metrics_server.abort();

    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
