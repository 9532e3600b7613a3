//! Periodic hot reload
//!
//! Runs [`CapabilityRegistry::check_and_reload_modified`] on its own task,
//! independent of any conversation.

use super::CapabilityRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Handle to a running hot-reload task. Dropping it stops the task.
pub struct HotReloader {
    shutdown: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl HotReloader {
    /// Start checking `registry` every `interval`
    pub fn spawn(registry: Arc<CapabilityRegistry>, interval: Duration) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; startup loading is the caller's job.
            ticker.tick().await;

            tracing::info!(
                "Hot reload watching {} every {:?}",
                registry.dir().display(),
                interval
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let changed = registry.check_and_reload_modified().await;
                        if !changed.is_empty() {
                            tracing::debug!("Hot reload cycle changed {} modules", changed.len());
                        }
                    }
                    result = shutdown_rx.changed() => {
                        if result.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            tracing::info!("Hot reload stopped");
        });

        Self {
            shutdown,
            handle: Some(handle),
        }
    }

    /// Stop the task and wait for an in-progress cycle to finish
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::warn!("Hot reload task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for HotReloader {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}
