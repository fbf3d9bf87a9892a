use std::sync::Arc;

use tokio::sync::watch;

use super::{EngineSettings, SettingsError};

/// Shared, hot-reloadable view of the engine settings.
///
/// Components call [`SettingsHandle::current`] once per operation and work
/// against that snapshot, so a reload never changes settings halfway through
/// a call.
#[derive(Debug, Clone)]
pub struct SettingsHandle {
    tx: Arc<watch::Sender<Arc<EngineSettings>>>,
}

impl SettingsHandle {
    /// Wrap validated settings.
    pub fn new(settings: EngineSettings) -> Result<Self, SettingsError> {
        settings.validate()?;
        let (tx, _rx) = watch::channel(Arc::new(settings));
        Ok(Self { tx: Arc::new(tx) })
    }

    pub fn current(&self) -> Arc<EngineSettings> {
        self.tx.borrow().clone()
    }

    /// Validate and publish new settings. On error the old settings stay live.
    pub fn update(&self, settings: EngineSettings) -> Result<(), SettingsError> {
        settings.validate()?;
        self.tx.send_replace(Arc::new(settings));
        tracing::info!("settings reloaded");
        Ok(())
    }

    /// Receiver notified on every successful update.
    pub fn subscribe(&self) -> watch::Receiver<Arc<EngineSettings>> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_publishes_new_snapshot() {
        let handle = SettingsHandle::new(EngineSettings::default()).unwrap();
        let before = handle.current();

        let mut next = EngineSettings::default();
        next.cache.capacity = 42;
        handle.update(next).unwrap();

        assert_eq!(before.cache.capacity, 10_000);
        assert_eq!(handle.current().cache.capacity, 42);
    }

    #[test]
    fn test_invalid_update_keeps_old_settings() {
        let handle = SettingsHandle::new(EngineSettings::default()).unwrap();

        let mut bad = EngineSettings::default();
        bad.resilience.retry.max_attempts = 0;
        assert!(handle.update(bad).is_err());
        assert_eq!(handle.current().resilience.retry.max_attempts, 3);
    }

    #[tokio::test]
    async fn test_subscribers_see_changes() {
        let handle = SettingsHandle::new(EngineSettings::default()).unwrap();
        let mut rx = handle.subscribe();

        let mut next = EngineSettings::default();
        next.detector.poll_interval_seconds = 5;
        handle.update(next).unwrap();

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().detector.poll_interval_seconds, 5);
    }
}
