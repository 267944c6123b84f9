use axum::{body::Bytes, extract::State, http::HeaderMap, http::StatusCode, Json};
use chrono::Utc;
use serde_derive::Serialize;
use tracing::{debug, error, warn};

use sync_common::error::WebhookError;
use sync_common::webhook::{dispatch, WebhookEnvelope, WebhookOutcome, SIGNATURE_HEADER};

use super::app::AppState;

#[derive(Serialize, Debug)]
pub struct WebhookResponse {
    #[serde(flatten)]
    outcome: Option<WebhookOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Receive one delivery from an upstream site. The body is taken raw because
/// the signature covers the exact bytes that were sent.
pub async fn post_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, (StatusCode, Json<WebhookResponse>)> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    state.verifier.verify(&body, signature).map_err(rejection)?;

    let envelope = WebhookEnvelope::parse(&body).map_err(rejection)?;
    debug!(event_type = %envelope.event_type, "received webhook");

    let outcome = dispatch(state.store.as_ref(), envelope, Utc::now(), state.max_tickets)
        .await
        .map_err(rejection)?;

    Ok(Json(WebhookResponse {
        outcome: Some(outcome),
        error: None,
    }))
}

fn rejection(error: WebhookError) -> (StatusCode, Json<WebhookResponse>) {
    let status = match &error {
        WebhookError::MissingSignature | WebhookError::InvalidSignature => {
            StatusCode::UNAUTHORIZED
        }
        WebhookError::InvalidEnvelope(_)
        | WebhookError::MissingField(_)
        | WebhookError::Config(_) => StatusCode::BAD_REQUEST,
        WebhookError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        error!("failed to process webhook: {}", error);
    } else {
        warn!("rejected webhook: {}", error);
    }
    let labels = [
        ("event_type", "unknown".to_owned()),
        ("outcome", status.as_u16().to_string()),
    ];
    metrics::counter!("webhook_requests_total", &labels).increment(1);

    (
        status,
        Json(WebhookResponse {
            outcome: None,
            error: Some(error.to_string()),
        }),
    )
}
