use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{error, info};

use sync_common::error::StoreError;

#[derive(Error, Debug)]
pub enum CleanerError {
    #[error("store error: {0}")]
    StoreError(#[from] StoreError),
}

/// One periodic janitor task. `cleanup` returns how many rows it changed.
#[async_trait]
pub trait Cleaner: Send + Sync {
    fn name(&self) -> &'static str;

    async fn cleanup(&self, now: DateTime<Utc>) -> Result<u64, CleanerError>;
}

/// Run every task once. A failing task does not keep the others from running.
pub async fn run_all(cleaners: &[Box<dyn Cleaner>], now: DateTime<Utc>) {
    for cleaner in cleaners {
        let task = cleaner.name();
        match cleaner.cleanup(now).await {
            Ok(changed) => {
                metrics::counter!("janitor_runs_total", &[("task", task), ("outcome", "ok")])
                    .increment(1);
                if changed > 0 {
                    info!(task, changed, "janitor task finished");
                }
            }
            Err(e) => {
                metrics::counter!("janitor_runs_total", &[("task", task), ("outcome", "error")])
                    .increment(1);
                error!(task, "janitor task failed: {}", e);
            }
        }
    }
}
