//! The work queue (§4.5, §5): one pending reconcile per Ingress key, no
//! matter how many times it's enqueued before being picked up.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::k8s::NamespacedName;

struct Inner {
    pending: Mutex<HashSet<NamespacedName>>,
    tx: mpsc::UnboundedSender<NamespacedName>,
}

#[derive(Clone)]
pub struct Queue(Arc<Inner>);

impl Queue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<NamespacedName>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self(Arc::new(Inner {
                pending: Mutex::new(HashSet::new()),
                tx,
            })),
            rx,
        )
    }

    /// No-op if `key` is already queued or being processed.
    pub fn enqueue(&self, key: NamespacedName) {
        let mut pending = self.0.pending.lock().unwrap();
        if pending.insert(key.clone()) {
            // Receiver only drops once the whole pipeline is shutting down.
            let _ = self.0.tx.send(key);
        }
    }

    /// Called as soon as a key is dequeued, before it's processed — so a
    /// change arriving mid-reconcile re-enqueues it instead of being
    /// swallowed.
    pub fn mark_dequeued(&self, key: &NamespacedName) {
        self.0.pending.lock().unwrap().remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn duplicate_enqueues_before_dequeue_coalesce() {
        let (queue, mut rx) = Queue::new();
        let key = NamespacedName::new("default", "app");
        queue.enqueue(key.clone());
        queue.enqueue(key.clone());
        queue.enqueue(key.clone());

        assert_eq!(rx.recv().await, Some(key));
        // Draining should not yield a second entry for the same key.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn enqueue_after_mark_dequeued_is_delivered_again() {
        let (queue, mut rx) = Queue::new();
        let key = NamespacedName::new("default", "app");
        queue.enqueue(key.clone());
        assert_eq!(rx.recv().await, Some(key.clone()));

        queue.mark_dequeued(&key);
        queue.enqueue(key.clone());
        assert_eq!(rx.recv().await, Some(key));
    }
}
