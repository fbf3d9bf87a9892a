//! Change listeners.
//!
//! Each listener gets every change on its own task with a timeout. A slow
//! or failing listener is logged and skipped; it never holds up detection.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::SchemaChange;

#[derive(Debug, Error)]
#[error("{0}")]
pub struct ListenerError(pub String);

#[async_trait]
pub trait SchemaChangeListener: Send + Sync {
    async fn on_schema_change(&self, change: &SchemaChange) -> Result<(), ListenerError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(Uuid);

type Registered = (ListenerId, Arc<dyn SchemaChangeListener>);

#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<Vec<Registered>>,
}

impl ListenerRegistry {
    pub fn register(&self, listener: Arc<dyn SchemaChangeListener>) -> ListenerId {
        let id = ListenerId(Uuid::new_v4());
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    pub fn unregister(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(registered, _)| *registered != id);
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `change` to every listener, one task each.
    pub fn dispatch(&self, change: &SchemaChange, timeout: Duration) -> Vec<JoinHandle<()>> {
        let listeners: Vec<Registered> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        listeners
            .into_iter()
            .map(|(id, listener)| {
                let change = change.clone();
                tokio::spawn(async move {
                    match tokio::time::timeout(timeout, listener.on_schema_change(&change)).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => tracing::warn!(
                            listener = %id.0,
                            change = %change.id,
                            error = %e,
                            "schema change listener failed"
                        ),
                        Err(_) => tracing::warn!(
                            listener = %id.0,
                            change = %change.id,
                            timeout_ms = timeout.as_millis() as u64,
                            "schema change listener timed out"
                        ),
                    }
                })
            })
            .collect()
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}
