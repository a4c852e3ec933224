//! Refresh Monitor
//!
//! Background task that refreshes credentials shortly before they expire.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::token::TokenManager;

/// Default interval between expiry checks.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Default remaining lifetime below which a refresh is started.
pub const DEFAULT_REFRESH_THRESHOLD: Duration = Duration::from_secs(300);

/// Handle to a running refresh monitor. The task stops when the handle is
/// dropped.
#[derive(Debug)]
pub struct RefreshMonitor {
    handle: JoinHandle<()>,
}

impl RefreshMonitor {
    /// Spawn a monitor checking `manager` every `interval`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(manager: Arc<TokenManager>, interval: Duration, threshold: Duration) -> Self {
        let handle = tokio::spawn(monitor_loop(manager, interval, threshold));
        Self { handle }
    }

    /// Stop the monitor.
    pub fn stop(self) {}

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for RefreshMonitor {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn monitor_loop(manager: Arc<TokenManager>, interval: Duration, threshold: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;

        match manager.needs_refresh(threshold).await {
            Ok(true) => {
                tracing::debug!("credentials near expiry, refreshing");
                if let Err(error) = manager.refresh().await {
                    tracing::warn!(error = %error, "background credential refresh failed");
                }
            }
            Ok(false) => {
                tracing::trace!("credentials not near expiry");
            }
            Err(error) => {
                tracing::warn!(error = %error, "unable to read credentials for refresh check");
            }
        }
    }
}
