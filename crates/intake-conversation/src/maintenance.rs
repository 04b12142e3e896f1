//! Periodic cleanup owned by the host process.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::info;

use crate::engine::ConversationEngine;

/// Background loop that runs [`ConversationEngine::run_maintenance`] on an
/// interval until shut down.
pub struct MaintenanceTask {
    engine: Arc<ConversationEngine>,
    interval: Duration,
    shutdown: Arc<Notify>,
}

impl MaintenanceTask {
    pub fn new(engine: Arc<ConversationEngine>, interval: Duration) -> Self {
        Self {
            engine,
            interval,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Run one pass immediately, then one per interval. Returns on shutdown.
    pub async fn run(&self) {
        loop {
            let report = self.engine.run_maintenance().await;
            if report.cache_entries_purged > 0 || report.histories_purged > 0 {
                info!(
                    cache_entries_purged = report.cache_entries_purged,
                    histories_purged = report.histories_purged,
                    "Maintenance removed stale entries"
                );
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = self.shutdown.notified() => return,
            }
        }
    }

    /// Signal the loop to stop after its current pass.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offline::OfflineServices;
    use intake_core::config::IntakeConfig;
    use intake_storage::MemoryPrimary;

    fn engine() -> Arc<ConversationEngine> {
        let services = OfflineServices::new("https://pay.example.com");
        Arc::new(ConversationEngine::new(
            &IntakeConfig::default(),
            Arc::new(MemoryPrimary::new()),
            services.collaborators(),
        ))
    }

    #[tokio::test]
    async fn test_shutdown_before_run_returns_after_one_pass() {
        let task = MaintenanceTask::new(engine(), Duration::from_secs(3600));
        task.shutdown();
        tokio::time::timeout(Duration::from_secs(2), task.run())
            .await
            .expect("Maintenance task should shut down within timeout");
    }

    #[tokio::test]
    async fn test_shutdown_while_sleeping() {
        let task = Arc::new(MaintenanceTask::new(engine(), Duration::from_secs(3600)));
        let runner = Arc::clone(&task);
        let handle = tokio::spawn(async move { runner.run().await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        task.shutdown();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("Maintenance task should stop")
            .unwrap();
    }
}
