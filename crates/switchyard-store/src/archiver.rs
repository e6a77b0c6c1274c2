//! The monthly archiver task.
//!
//! Runs hourly. On the first day of a month it archives the month that just
//! ended (once), and on every run it refreshes the running month's row so
//! the archive stays near-live. All the arithmetic lives in
//! [`Store::archive_month`]; this task only decides which months to touch.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, Utc};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::store::Store;

/// Time between archiver runs.
const DEFAULT_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Handle to the running archiver.
pub struct ArchiverHandle {
    stop_tx: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl ArchiverHandle {
    /// Stop the archiver and wait for the loop to finish.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.task.await;
    }
}

/// Hourly monthly-stats archiver.
pub struct MonthlyArchiver {
    store: Arc<Store>,
    interval: Duration,
    last_closed_month: Option<(i32, u32)>,
}

impl MonthlyArchiver {
    /// Create an archiver with the default hourly cadence.
    #[must_use]
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            interval: DEFAULT_INTERVAL,
            last_closed_month: None,
        }
    }

    /// Override the cadence (used by tests).
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Start the archive loop. The first run happens immediately, closing
    /// out the previous month if that has not happened yet.
    #[must_use]
    pub fn spawn(mut self) -> ArchiverHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            // Close out the previous month on startup.
            self.archive_previous_month().await;

            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval.tick().await; // immediate tick consumed by startup work

            loop {
                tokio::select! {
                    _ = interval.tick() => self.run_once().await,
                    _ = stop_rx.changed() => {
                        info!("monthly archiver stopping");
                        return;
                    }
                }
            }
        });

        ArchiverHandle { stop_tx, task }
    }

    async fn run_once(&mut self) {
        let now = Utc::now();

        // First of the month: close out the month that just ended, once.
        if now.day() == 1 {
            let previous = previous_month(now.year(), now.month());
            if self.last_closed_month != Some(previous) {
                self.archive_previous_month().await;
            }
        }

        // Keep the running month near-live.
        if let Err(e) = self.store.archive_month(now.year(), now.month()).await {
            warn!(error = %e, "failed to refresh current month archive");
        }
    }

    async fn archive_previous_month(&mut self) {
        let now = Utc::now();
        let (year, month) = previous_month(now.year(), now.month());

        match self.store.archive_month(year, month).await {
            Ok(()) => {
                info!(year, month, "archived monthly statistics");
                self.last_closed_month = Some((year, month));
            }
            Err(e) => warn!(year, month, error = %e, "failed to archive month"),
        }
    }
}

fn previous_month(year: i32, month: u32) -> (i32, u32) {
    if month == 1 {
        (year - 1, 12)
    } else {
        (year, month - 1)
    }
}
