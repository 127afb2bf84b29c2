use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::warn;

use super::{StorageBackend, StorageResult};

/// Buffer size for storage change notifications.
/// A full credential write is at most four key changes; 64 leaves headroom
/// for slow subscribers before they start lagging.
const EVENT_BUFFER_SIZE: usize = 64;

/// A value change made through some `StorageHandle`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub key: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    origin: u64,
}

impl StorageEvent {
    /// The key was deleted
    pub fn is_removal(&self) -> bool {
        self.old_value.is_some() && self.new_value.is_none()
    }

    /// The key went from absent to present
    pub fn is_addition(&self) -> bool {
        self.old_value.is_none() && self.new_value.is_some()
    }
}

/// One storage backend shared by any number of execution contexts.
pub struct SharedStorage {
    backend: Arc<dyn StorageBackend>,
    events: broadcast::Sender<StorageEvent>,
    next_origin: AtomicU64,
}

impl SharedStorage {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_BUFFER_SIZE);
        Arc::new(Self {
            backend,
            events,
            next_origin: AtomicU64::new(1),
        })
    }

    /// Open a new context on this storage.
    pub fn handle(self: &Arc<Self>) -> StorageHandle {
        StorageHandle {
            shared: Arc::clone(self),
            origin: self.next_origin.fetch_add(1, Ordering::Relaxed),
        }
    }
}

/// A single context's access to shared storage. Clones share the origin.
#[derive(Clone)]
pub struct StorageHandle {
    shared: Arc<SharedStorage>,
    origin: u64,
}

impl StorageHandle {
    /// Convenience for a lone context with nothing to share with.
    pub fn standalone(backend: Arc<dyn StorageBackend>) -> Self {
        SharedStorage::new(backend).handle()
    }

    pub fn get(&self, key: &str) -> StorageResult<Option<String>> {
        self.shared.backend.get(key)
    }

    pub fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let old_value = self.shared.backend.get(key)?;
        self.shared.backend.set(key, value)?;
        if old_value.as_deref() != Some(value) {
            self.publish(key, old_value, Some(value.to_string()));
        }
        Ok(())
    }

    pub fn remove(&self, key: &str) -> StorageResult<()> {
        let old_value = self.shared.backend.get(key)?;
        self.shared.backend.remove(key)?;
        if old_value.is_some() {
            self.publish(key, old_value, None);
        }
        Ok(())
    }

    /// Listen for changes written by other contexts.
    pub fn subscribe(&self) -> StorageSubscription {
        StorageSubscription {
            rx: self.shared.events.subscribe(),
            origin: self.origin,
        }
    }

    fn publish(&self, key: &str, old_value: Option<String>, new_value: Option<String>) {
        // No receivers is the common case for a single context
        let _ = self.shared.events.send(StorageEvent {
            key: key.to_string(),
            old_value,
            new_value,
            origin: self.origin,
        });
    }
}

pub struct StorageSubscription {
    rx: broadcast::Receiver<StorageEvent>,
    origin: u64,
}

impl StorageSubscription {
    /// Next change made by another context, or `None` once the storage is gone.
    pub async fn recv(&mut self) -> Option<StorageEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.origin == self.origin => continue,
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Storage subscriber lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
