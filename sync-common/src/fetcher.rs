use std::time;

use reqwest::header;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::config::FetchConfig;
use crate::error::{ConfigError, FetchError};

/// Walks paginated collection endpoints of upstream sites.
///
/// Pages are requested one at a time, never in parallel: upstream rate limits
/// are unknown. A walk ends on an empty page, on a page shorter than
/// `per_page`, or after `max_pages` pages. Any failure aborts the whole walk;
/// a partial collection is never returned.
#[derive(Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    per_page: u32,
    max_pages: u32,
}

/// Everything a walk collected, in arrival order.
#[derive(Debug, Default)]
pub struct Collection {
    pub records: Vec<Value>,
    pub pages: u32,
    /// The walk stopped at the page ceiling rather than at the end of the data.
    pub truncated: bool,
}

impl Fetcher {
    pub fn new(
        request_timeout: time::Duration,
        per_page: u32,
        max_pages: u32,
    ) -> Result<Self, ConfigError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent("Event Sync Fetcher")
            .timeout(request_timeout)
            .build()
            .map_err(ConfigError::HttpClient)?;

        Ok(Self {
            client,
            per_page: per_page.max(1),
            max_pages: max_pages.max(1),
        })
    }

    pub fn from_config(config: &FetchConfig) -> Result<Self, ConfigError> {
        Self::new(config.request_timeout.0, config.per_page, config.max_pages)
    }

    /// Fetch every page of `url`.
    ///
    /// # Arguments
    ///
    /// * `url`: The collection endpoint, without pagination parameters.
    /// * `collection`: The name of the list when the endpoint wraps it in an object, e.g. `events`.
    /// * `token`: Sent as a bearer token when the source requires authentication.
    #[instrument(skip(self, token), fields(per_page = self.per_page))]
    pub async fn fetch_all(
        &self,
        url: &str,
        collection: &str,
        token: Option<&str>,
    ) -> Result<Collection, FetchError> {
        let mut result = Collection::default();

        for page in 1..=self.max_pages {
            let records = self.fetch_page(url, collection, token, page).await?;
            let received = records.len();
            result.pages = page;
            result.records.extend(records);

            metrics::counter!("sync_fetch_pages_total", "collection" => collection.to_owned())
                .increment(1);
            debug!(page, received, "fetched page");

            if received == 0 || received < self.per_page as usize {
                return Ok(result);
            }
        }

        warn!(
            url,
            max_pages = self.max_pages,
            "stopped paginating at the page ceiling"
        );
        result.truncated = true;
        Ok(result)
    }

    async fn fetch_page(
        &self,
        url: &str,
        collection: &str,
        token: Option<&str>,
        page: u32,
    ) -> Result<Vec<Value>, FetchError> {
        let mut request = self
            .client
            .get(url)
            .query(&[("per_page", self.per_page), ("page", page)]);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|error| FetchError::RequestError {
                url: url.to_owned(),
                error,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::StatusError {
                url: url.to_owned(),
                status,
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|error| FetchError::RequestError {
                url: url.to_owned(),
                error,
            })?;
        let body: Value = serde_json::from_slice(&body).map_err(|error| FetchError::DecodeError {
            url: url.to_owned(),
            error,
        })?;

        extract_collection(body, collection).ok_or_else(|| FetchError::UnexpectedShape {
            url: url.to_owned(),
        })
    }
}

/// Accept a bare list, or an object holding the list under the collection's
/// name or under `data`. Anything else is not a collection.
fn extract_collection(body: Value, collection: &str) -> Option<Vec<Value>> {
    match body {
        Value::Array(records) => Some(records),
        Value::Object(mut object) => [collection, "data"]
            .iter()
            .find_map(|key| match object.remove(*key) {
                Some(Value::Array(records)) => Some(records),
                _ => None,
            }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;

    use super::*;

    fn fetcher(per_page: u32, max_pages: u32) -> Fetcher {
        Fetcher::new(time::Duration::from_secs(5), per_page, max_pages).unwrap()
    }

    fn records(start: u32, count: u32) -> Value {
        Value::Array((start..start + count).map(|id| json!({"id": id})).collect())
    }

    #[test]
    fn test_extract_collection() {
        assert_eq!(extract_collection(json!([1, 2]), "events"), Some(vec![json!(1), json!(2)]));
        assert_eq!(
            extract_collection(json!({"events": [1], "total": 1}), "events"),
            Some(vec![json!(1)])
        );
        assert_eq!(extract_collection(json!({"data": []}), "events"), Some(vec![]));
        assert_eq!(extract_collection(json!({"bookings": [1]}), "events"), None);
        assert_eq!(extract_collection(json!({"events": "nope"}), "events"), None);
        assert_eq!(extract_collection(json!("events"), "events"), None);
    }

    #[tokio::test]
    async fn test_stops_on_short_page() {
        let server = MockServer::start_async().await;
        let first = server
            .mock_async(|when, then| {
                when.method(GET).path("/events").query_param("page", "1");
                then.status(200).json_body(records(0, 2));
            })
            .await;
        let second = server
            .mock_async(|when, then| {
                when.method(GET).path("/events").query_param("page", "2");
                then.status(200).json_body(records(2, 1));
            })
            .await;

        let collection = fetcher(2, 10)
            .fetch_all(&server.url("/events"), "events", None)
            .await
            .unwrap();

        first.assert_async().await;
        second.assert_async().await;
        assert_eq!(collection.records, records(0, 3).as_array().unwrap().clone());
        assert_eq!(collection.pages, 2);
        assert!(!collection.truncated);
    }

    #[tokio::test]
    async fn test_full_last_page_then_empty_page() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/events").query_param("page", "1");
                then.status(200).json_body(json!({"events": records(0, 2)}));
            })
            .await;
        let empty = server
            .mock_async(|when, then| {
                when.method(GET).path("/events").query_param("page", "2");
                then.status(200).json_body(json!({"events": []}));
            })
            .await;

        let collection = fetcher(2, 10)
            .fetch_all(&server.url("/events"), "events", None)
            .await
            .unwrap();

        empty.assert_hits_async(1).await;
        assert_eq!(collection.records.len(), 2);
        assert_eq!(collection.pages, 2);
        assert!(!collection.truncated);
    }

    #[tokio::test]
    async fn test_page_ceiling_stops_endless_source() {
        let server = MockServer::start_async().await;
        let endless = server
            .mock_async(|when, then| {
                when.method(GET).path("/events");
                then.status(200).json_body(records(0, 2));
            })
            .await;

        let collection = fetcher(2, 3)
            .fetch_all(&server.url("/events"), "events", None)
            .await
            .unwrap();

        endless.assert_hits_async(3).await;
        assert_eq!(collection.records.len(), 6);
        assert!(collection.truncated);
    }

    #[tokio::test]
    async fn test_error_status_aborts_the_walk() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/events").query_param("page", "1");
                then.status(200).json_body(records(0, 2));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/events").query_param("page", "2");
                then.status(503);
            })
            .await;

        let result = fetcher(2, 10)
            .fetch_all(&server.url("/events"), "events", None)
            .await;

        assert!(matches!(
            result,
            Err(FetchError::StatusError { status, .. }) if status == reqwest::StatusCode::SERVICE_UNAVAILABLE
        ));
    }

    #[tokio::test]
    async fn test_wrong_shape_is_not_empty() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/events");
                then.status(200).json_body(json!({"message": "maintenance"}));
            })
            .await;

        let result = fetcher(2, 10)
            .fetch_all(&server.url("/events"), "events", None)
            .await;

        assert!(matches!(result, Err(FetchError::UnexpectedShape { .. })));
    }

    #[tokio::test]
    async fn test_malformed_json() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/events");
                then.status(200).body("<html>oops</html>");
            })
            .await;

        let result = fetcher(2, 10)
            .fetch_all(&server.url("/events"), "events", None)
            .await;

        assert!(matches!(result, Err(FetchError::DecodeError { .. })));
    }

    #[tokio::test]
    async fn test_sends_token_and_page_size() {
        let server = MockServer::start_async().await;
        let authed = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/bookings")
                    .query_param("per_page", "50")
                    .query_param("page", "1")
                    .header("Authorization", "Bearer s3cret");
                then.status(200).json_body(json!([]));
            })
            .await;

        let collection = fetcher(50, 10)
            .fetch_all(&server.url("/bookings"), "bookings", Some("s3cret"))
            .await
            .unwrap();

        authed.assert_async().await;
        assert!(collection.records.is_empty());
    }
}
