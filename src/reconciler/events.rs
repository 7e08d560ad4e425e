//! Kubernetes Event recording (§7): the user-visible half of error
//! propagation, alongside structured logs.

use async_trait::async_trait;
use k8s_openapi::api::networking::v1::Ingress;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};

use crate::assembler::UnemittableError;

/// Abstracts event recording behind a trait so the Reconciler can be
/// exercised in tests without a live `kube::Client`.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn record_invalid(&self, ingress: &Ingress, reason: &UnemittableError);
    async fn record_applied(&self, ingress: &Ingress);
}

pub struct EventRecorder {
    recorder: Recorder,
}

impl EventRecorder {
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: None,
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventSink for EventRecorder {
    async fn record_invalid(&self, ingress: &Ingress, reason: &UnemittableError) {
        let event = Event {
            type_: EventType::Warning,
            reason: "Invalid".to_string(),
            note: Some(reason.to_string()),
            action: "Reconcile".to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, &ingress.object_ref(&())).await {
            tracing::warn!(error = %e, "failed to record Invalid event");
        }
    }

    async fn record_applied(&self, ingress: &Ingress) {
        let event = Event {
            type_: EventType::Normal,
            reason: "Applied".to_string(),
            note: Some("ingress config applied to databroker".to_string()),
            action: "Reconcile".to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, &ingress.object_ref(&())).await {
            tracing::warn!(error = %e, "failed to record Applied event");
        }
    }
}
