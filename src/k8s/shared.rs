use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;

use super::object::{NamespaceFilter, NamespacedName, Object, ObjectKey, ObjectKind};

/// The Object Registry and Dependency Graph live behind one lock (§5):
/// reconciles take it briefly to copy the subset they need, watch
/// callbacks take it briefly to record an update. Neither ever awaits
/// while holding it.
#[derive(Default)]
struct Inner {
    registry: HashMap<ObjectKey, Object>,
    /// dependency -> ingresses that reference it.
    reverse: HashMap<ObjectKey, HashSet<NamespacedName>>,
    /// ingress -> its current dependency set, so `set_deps` can diff.
    forward: HashMap<NamespacedName, HashSet<ObjectKey>>,
}

#[derive(Clone, Default)]
pub struct Shared(Arc<RwLock<Inner>>);

impl Shared {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- Object Registry -------------------------------------------------

    pub async fn upsert(&self, obj: Object) {
        let key = obj.key();
        let mut inner = self.0.write().await;
        inner.registry.insert(key, obj);
    }

    pub async fn delete(&self, key: &ObjectKey) {
        let mut inner = self.0.write().await;
        inner.registry.remove(key);
    }

    pub async fn get(&self, key: &ObjectKey) -> Option<Object> {
        let inner = self.0.read().await;
        inner.registry.get(key).cloned()
    }

    pub async fn list(&self, kind: ObjectKind, filter: &NamespaceFilter) -> Vec<Object> {
        let inner = self.0.read().await;
        inner
            .registry
            .values()
            .filter(|o| o.kind() == kind && filter.allows(&o.key().name.namespace))
            .cloned()
            .collect()
    }

    /// All Ingress objects currently in the registry, namespace-filtered.
    pub async fn ingresses(&self, filter: &NamespaceFilter) -> Vec<Object> {
        self.list(ObjectKind::Ingress, filter).await
    }

    pub async fn ingress_classes(&self) -> Vec<Object> {
        self.list(ObjectKind::IngressClass, &NamespaceFilter::default())
            .await
    }

    // ---- Dependency Graph --------------------------------------------------

    /// Atomically replace `ingress`'s dependency set, removing edges that
    /// are no longer present.
    pub async fn set_deps(&self, ingress: NamespacedName, deps: HashSet<ObjectKey>) {
        let mut inner = self.0.write().await;
        let previous = inner.forward.remove(&ingress).unwrap_or_default();
        for dep in previous.difference(&deps) {
            if let Some(set) = inner.reverse.get_mut(dep) {
                set.remove(&ingress);
                if set.is_empty() {
                    inner.reverse.remove(dep);
                }
            }
        }
        for dep in &deps {
            inner.reverse.entry(dep.clone()).or_default().insert(ingress.clone());
        }
        if deps.is_empty() {
            inner.forward.remove(&ingress);
        } else {
            inner.forward.insert(ingress, deps);
        }
    }

    pub async fn dependents(&self, dep: &ObjectKey) -> Vec<NamespacedName> {
        let inner = self.0.read().await;
        inner
            .reverse
            .get(dep)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop every edge pointing at `ingress` (it is no longer owned, or was
    /// deleted).
    pub async fn remove_ingress(&self, ingress: &NamespacedName) {
        let mut inner = self.0.write().await;
        if let Some(deps) = inner.forward.remove(ingress) {
            for dep in deps {
                if let Some(set) = inner.reverse.get_mut(&dep) {
                    set.remove(ingress);
                    if set.is_empty() {
                        inner.reverse.remove(&dep);
                    }
                }
            }
        }
    }
}
