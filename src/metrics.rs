//! Prometheus metrics (§6's `--metrics-bind-address`): reconcile outcome
//! counters exposed over `/metrics` in the text exposition format.

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;
use std::sync::Arc;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OutcomeLabels {
    pub outcome: String,
}

pub struct Metrics {
    registry: Registry,
    reconciles: Family<OutcomeLabels, Counter>,
}

impl Default for Metrics {
    fn default() -> Self {
        let mut registry = Registry::with_prefix("ingress_controller");
        let reconciles = Family::<OutcomeLabels, Counter>::default();
        registry.register(
            "reconciles",
            "Ingress reconcile attempts, by outcome",
            reconciles.clone(),
        );
        Self { registry, reconciles }
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_outcome(&self, outcome: &'static str) {
        self.reconciles
            .get_or_create(&OutcomeLabels { outcome: outcome.to_string() })
            .inc();
    }
}

/// §6: `/metrics` in the Prometheus text exposition format.
pub fn router(metrics: Arc<Metrics>) -> Router {
    Router::new().route("/metrics", get(metrics_handler)).with_state(metrics)
}

async fn metrics_handler(State(metrics): State<Arc<Metrics>>) -> impl IntoResponse {
    let mut buf = String::new();
    match encode(&mut buf, &metrics.registry) {
        Ok(()) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/openmetrics-text; version=1.0.0; charset=utf-8")],
            buf,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_outcomes_by_label() {
        let metrics = Metrics::new();
        metrics.record_outcome("done");
        metrics.record_outcome("done");
        metrics.record_outcome("retry_transient");

        let mut buf = String::new();
        encode(&mut buf, &metrics.registry).unwrap();
        assert!(buf.contains("outcome=\"done\""));
        assert!(buf.contains("outcome=\"retry_transient\""));
    }
}
