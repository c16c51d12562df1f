// ABOUTME: In-process instance registry keyed by sandbox id
// ABOUTME: A refreshable cache over the backend, which stays the source of truth

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::types::{SandboxInstance, SandboxStatus};

/// Storage seam for instance descriptors
///
/// Providers only ever talk to this trait, so a shared store can replace the
/// in-memory map without touching backend code.
#[async_trait]
pub trait InstanceStore: Send + Sync {
    async fn insert(&self, instance: SandboxInstance);

    async fn get(&self, id: &str) -> Option<SandboxInstance>;

    async fn remove(&self, id: &str) -> Option<SandboxInstance>;

    async fn list(&self) -> Vec<SandboxInstance>;

    /// Record activity; `last_activity_at` never moves backwards.
    /// Returns false when the id is unknown.
    async fn touch(&self, id: &str, status: Option<SandboxStatus>) -> bool;

    async fn set_status(&self, id: &str, status: SandboxStatus) -> bool;

    async fn clear(&self);
}

/// Default store: a map behind a tokio RwLock
#[derive(Debug, Clone, Default)]
pub struct MemoryRegistry {
    entries: Arc<RwLock<HashMap<String, SandboxInstance>>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl InstanceStore for MemoryRegistry {
    async fn insert(&self, instance: SandboxInstance) {
        debug!(sandbox_id = %instance.id, status = %instance.status, "Registering sandbox");
        self.entries
            .write()
            .await
            .insert(instance.id.clone(), instance);
    }

    async fn get(&self, id: &str) -> Option<SandboxInstance> {
        self.entries.read().await.get(id).cloned()
    }

    async fn remove(&self, id: &str) -> Option<SandboxInstance> {
        let removed = self.entries.write().await.remove(id);
        if removed.is_some() {
            debug!(sandbox_id = %id, "Removed sandbox from registry");
        }
        removed
    }

    async fn list(&self) -> Vec<SandboxInstance> {
        self.entries.read().await.values().cloned().collect()
    }

    async fn touch(&self, id: &str, status: Option<SandboxStatus>) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get_mut(id) {
            Some(instance) => {
                instance.last_activity_at = instance.last_activity_at.max(Utc::now());
                if let Some(status) = status {
                    instance.status = status;
                }
                true
            }
            None => false,
        }
    }

    async fn set_status(&self, id: &str, status: SandboxStatus) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get_mut(id) {
            Some(instance) => {
                instance.status = status;
                true
            }
            None => false,
        }
    }

    async fn clear(&self) {
        self.entries.write().await.clear();
    }
}
