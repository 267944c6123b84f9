use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use sync_common::store::Store;

use crate::cleanup::{Cleaner, CleanerError};

/// Deletes events, with their registrations, once they finished more than
/// `retention` ago.
pub struct RetentionCleaner {
    store: Arc<dyn Store>,
    retention: Duration,
}

impl RetentionCleaner {
    pub fn new(store: Arc<dyn Store>, retention_days: u32) -> Self {
        Self {
            store,
            retention: Duration::days(i64::from(retention_days)),
        }
    }
}

#[async_trait]
impl Cleaner for RetentionCleaner {
    fn name(&self) -> &'static str {
        "retention"
    }

    async fn cleanup(&self, now: DateTime<Utc>) -> Result<u64, CleanerError> {
        // A retention reaching past the calendar keeps everything.
        let Some(cutoff) = now.checked_sub_signed(self.retention) else {
            return Ok(0);
        };
        let deleted = self
            .store
            .delete_events_finished_before(cutoff, false)
            .await?;
        metrics::counter!("janitor_events_deleted_total").increment(deleted);

        Ok(deleted)
    }
}
