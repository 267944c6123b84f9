use std::time;

use health::HealthHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use sync_common::config::{SourceConfig, SourceList};
use sync_common::error::SyncError;
use sync_common::reconcile::SyncReport;
use sync_common::sync::BulkSync;

/// A worker that bulk syncs every configured source on a fixed schedule.
pub struct SyncWorker {
    /// Fetches and reconciles one source.
    bulk_sync: BulkSync,
    /// The sources to sync, in order.
    sources: SourceList,
    /// Time between the start of two scheduled passes.
    interval: time::Duration,
    /// Upper bound for the sync of a single source.
    timeout: time::Duration,
    /// The liveness check handle, to call on a schedule to report healthy
    liveness: HealthHandle,
}

impl SyncWorker {
    pub fn new(
        bulk_sync: BulkSync,
        sources: SourceList,
        interval: time::Duration,
        timeout: time::Duration,
        liveness: HealthHandle,
    ) -> Self {
        Self {
            bulk_sync,
            sources,
            interval,
            timeout,
            liveness,
        }
    }

    /// Run a pass on every tick, forever. A pass that overruns the interval
    /// delays the next tick instead of stacking passes.
    pub async fn run(&self) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            self.liveness.report_healthy();

            let reports = self.sync_all().await;
            info!(
                synced_sources = reports.len(),
                failed_sources = self.sources.0.len() - reports.len(),
                "finished scheduled sync"
            );
        }
    }

    /// Sync every source once, one after the other. Failures are logged and
    /// left for the next pass; the reports of the runs that finished are returned.
    pub async fn sync_all(&self) -> Vec<SyncReport> {
        let mut reports = Vec::with_capacity(self.sources.0.len());

        for source in self.sources.iter() {
            match self.sync_source(source).await {
                Ok(report) => {
                    metrics::counter!("sync_runs_total", &[("outcome", "finished")]).increment(1);
                    reports.push(report);
                }
                Err(error) => {
                    metrics::counter!("sync_runs_total", &[("outcome", "failed")]).increment(1);
                    error!(source = %source.key, "scheduled sync failed: {}", error);
                }
            }
            self.liveness.report_healthy();
        }

        reports
    }

    async fn sync_source(&self, source: &SourceConfig) -> Result<SyncReport, SyncError> {
        tokio::time::timeout(self.timeout, self.bulk_sync.run(source))
            .await
            .map_err(|_| SyncError::Timeout {
                source_key: source.key.to_string(),
                seconds: self.timeout.as_secs(),
            })?
    }
}
