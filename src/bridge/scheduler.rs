//! Periodic sync scheduler
//!
//! While the embedded content is visible the host asks it for a full dump
//! on a fixed cadence, so host-side storage never trails the embedded side
//! by more than one interval.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::protocol::{MessageChannel, OutboundMessage};
use crate::config::SchedulerConfig;

pub struct AutoSyncScheduler {
    cfg: SchedulerConfig,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl AutoSyncScheduler {
    pub fn new(cfg: SchedulerConfig) -> Self {
        Self {
            cfg,
            task: Mutex::new(None),
        }
    }

    /// Start the periodic tick. Calling start on a running scheduler
    /// replaces the timer; there is never more than one.
    pub fn start(&self, channel: Arc<dyn MessageChannel>) {
        let interval = Duration::from_secs(self.cfg.sync_interval_secs);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The immediate first tick is redundant with the hydrate push.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                debug!("Auto-sync tick");
                if let Err(e) = channel.post(OutboundMessage::SyncRequest.to_wire()).await {
                    // Next tick retries; the embedded side may be reloading.
                    warn!(error = %e, "Auto-sync request failed");
                }
            }
        });

        let mut guard = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = guard.replace(handle) {
            previous.abort();
        }
        info!(interval_secs = self.cfg.sync_interval_secs, "Auto-sync started");
    }

    /// Stop the timer. Idempotent; stopping a stopped scheduler is a no-op.
    pub fn stop(&self) {
        let previous = {
            let mut guard = self.task.lock().unwrap_or_else(|e| e.into_inner());
            guard.take()
        };
        if let Some(handle) = previous {
            handle.abort();
            info!("Auto-sync stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }
}

impl Drop for AutoSyncScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
