use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Duration, Utc};
use serde_derive::{Deserialize, Serialize};
use tracing::{error, info};

use super::app::AppState;

/// Either an absolute cutoff or an age in days, never both.
#[derive(Deserialize, Debug)]
pub struct CleanupRequest {
    before: Option<DateTime<Utc>>,
    older_than_days: Option<u32>,
    #[serde(default)]
    dry_run: bool,
}

#[derive(Serialize, Debug, Default)]
pub struct CleanupResponse {
    matched: u64,
    deleted: u64,
    dry_run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    cutoff: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl CleanupRequest {
    fn cutoff(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, &'static str> {
        match (self.before, self.older_than_days) {
            (Some(before), None) => Ok(before),
            (None, Some(days)) => Duration::try_days(i64::from(days))
                .and_then(|age| now.checked_sub_signed(age))
                .ok_or("'older_than_days' is out of range"),
            (Some(_), Some(_)) => Err("only one of 'before' and 'older_than_days' may be set"),
            (None, None) => Err("one of 'before' or 'older_than_days' is required"),
        }
    }
}

/// Delete events that finished before a cutoff, and their registrations with
/// them. With `dry_run` the matching events are only counted.
pub async fn post_cleanup(
    State(state): State<AppState>,
    Json(request): Json<CleanupRequest>,
) -> Result<Json<CleanupResponse>, (StatusCode, Json<CleanupResponse>)> {
    let cutoff = request.cutoff(Utc::now()).map_err(|msg| {
        (
            StatusCode::BAD_REQUEST,
            Json(CleanupResponse {
                dry_run: request.dry_run,
                error: Some(msg.to_owned()),
                ..Default::default()
            }),
        )
    })?;

    let matched = state
        .store
        .delete_events_finished_before(cutoff, request.dry_run)
        .await
        .map_err(|err| {
            error!("cleanup failed: {}", err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(CleanupResponse {
                    dry_run: request.dry_run,
                    cutoff: Some(cutoff),
                    error: Some(err.to_string()),
                    ..Default::default()
                }),
            )
        })?;

    let deleted = if request.dry_run { 0 } else { matched };
    info!(%cutoff, matched, deleted, dry_run = request.dry_run, "cleaned up events");

    Ok(Json(CleanupResponse {
        matched,
        deleted,
        dry_run: request.dry_run,
        cutoff: Some(cutoff),
        error: None,
    }))
}
