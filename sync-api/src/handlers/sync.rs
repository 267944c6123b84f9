use axum::{body::Bytes, extract::State, http::StatusCode, Json};
use serde_derive::{Deserialize, Serialize};
use tracing::{error, info};

use sync_common::error::SyncError;
use sync_common::reconcile::SyncReport;

use super::app::AppState;

/// The body of a manual sync request. An empty body syncs every configured source.
#[derive(Deserialize, Debug, Default)]
pub struct SyncRequest {
    site_url: Option<String>,
}

#[derive(Serialize, Debug, Default)]
pub struct SyncResponse {
    reports: Vec<SyncReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    failures: Vec<SyncFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize, Debug)]
pub struct SyncFailure {
    source: String,
    error: String,
}

/// Run a bulk sync of one configured source, or of all of them, right now.
///
/// Sources are synced one after the other. A source that cannot be fetched does
/// not stop the others; its failure is listed and the response is a 502.
pub async fn post_sync(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<SyncResponse>, (StatusCode, Json<SyncResponse>)> {
    let request: SyncRequest = if body.iter().all(u8::is_ascii_whitespace) {
        SyncRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|error| bad_request(format!("invalid sync request: {}", error)))?
    };

    let sources = state
        .sources
        .select(request.site_url.as_deref())
        .map_err(|error| bad_request(error.to_string()))?;

    let mut response = SyncResponse::default();
    for source in sources {
        match state.bulk_sync.run(&source).await {
            Ok(report) => response.reports.push(report),
            Err(error) => {
                error!(source = %source.key, "manual sync failed: {}", error);
                response.failures.push(SyncFailure {
                    source: source.key.to_string(),
                    error: error.to_string(),
                });
                if let SyncError::Config(_) = error {
                    return Err((StatusCode::BAD_REQUEST, Json(response)));
                }
            }
        }
    }

    if response.failures.is_empty() {
        info!(sources = response.reports.len(), "manual sync finished");
        Ok(Json(response))
    } else {
        Err((StatusCode::BAD_GATEWAY, Json(response)))
    }
}

fn bad_request(msg: String) -> (StatusCode, Json<SyncResponse>) {
    error!("{}", msg);
    (
        StatusCode::BAD_REQUEST,
        Json(SyncResponse {
            error: Some(msg),
            ..Default::default()
        }),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{self, Request, StatusCode},
    };
    use http_body_util::BodyExt; // for `collect`
    use httpmock::prelude::*;
    use serde_json::{json, Value};
    use tower::ServiceExt; // for `call`, `oneshot`, and `ready`

    use sync_common::store::{MemoryStore, Store};
    use sync_common::webhook::SignatureVerifier;

    use super::super::app::tests::{app, state, BOOKINGS_PATH, EVENTS_PATH};

    fn request(body: &str) -> Request<Body> {
        Request::builder()
            .method(http::Method::POST)
            .uri("/sync")
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_owned()))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn sync_configured_source() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path(EVENTS_PATH);
                then.status(200)
                    .json_body(json!([{"id": 1, "title": "Talk", "start": "2031-03-03 10:00"}]));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path(BOOKINGS_PATH);
                then.status(200).json_body(json!([
                    {"id": 2, "event_id": 1, "name": "Sam", "email": "sam@example.com", "tickets": 2}
                ]));
            })
            .await;

        let store = Arc::new(MemoryStore::new());
        let app = app(state(store.clone(), &server.base_url(), SignatureVerifier::default()));

        let body = json!({"site_url": format!("{}/wp-json", server.base_url())}).to_string();
        let response = app.oneshot(request(&body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["reports"][0]["events"]["synced"], 1);
        assert_eq!(body["reports"][0]["registrations"]["synced"], 2);
        assert_eq!(store.count_registrations().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn sync_unknown_source() {
        let store = Arc::new(MemoryStore::new());
        let app = app(state(store, "https://a.example", SignatureVerifier::default()));

        let response = app
            .oneshot(request(r#"{"site_url": "https://b.example"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"], "source https://b.example is not configured");
    }

    #[tokio::test]
    async fn sync_without_sources() {
        let store = Arc::new(MemoryStore::new());
        let app = app(state(store, "", SignatureVerifier::default()));

        let response = app.oneshot(request("")).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn sync_unreachable_source() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path(EVENTS_PATH);
                then.status(500);
            })
            .await;

        let store = Arc::new(MemoryStore::new());
        let app = app(state(store, &server.base_url(), SignatureVerifier::default()));

        let response = app.oneshot(request("{}")).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = json_body(response).await;
        assert_eq!(body["failures"].as_array().unwrap().len(), 1);
    }
}
