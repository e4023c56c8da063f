//! Common test utilities for API testing with mocks.
//!
//! Builds an in-process router over the real service, with mock protocol
//! searchers and a mock client factory injected. No network is involved.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use gamearr_core::{
    testing::{MockClientFactory, MockDownloadClient, MockProtocolSearcher},
    AcquisitionService, Config, DownloadDispatcher, DownloaderType, InMemoryConfigStore,
    IndexerProtocol, SearchAggregator,
};
use gamearr_server::{api::create_router, state::AppState};

/// Re-export fixtures for test convenience
pub use gamearr_core::testing::fixtures;

/// Test fixture for API testing with mock dependencies.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_add_download() {
///     let fixture = TestFixture::new();
///     fixture.add_downloader("tr", DownloaderType::Transmission, 1).await;
///
///     let response = fixture.post("/api/v1/downloads", json!({
///         "url": "magnet:?xt=urn:btih:abc",
///         "title": "Game",
///     })).await;
///
///     assert_eq!(response.status, 200);
/// }
/// ```
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    /// Config store shared with the service
    pub store: Arc<InMemoryConfigStore>,
    /// Torznab searcher - configure results per indexer
    pub torznab: MockProtocolSearcher,
    /// Newznab searcher - configure results per indexer
    pub newznab: MockProtocolSearcher,
    /// Client factory - register mock download clients by downloader id
    pub factory: MockClientFactory,
}

impl TestFixture {
    pub fn new() -> Self {
        let store = Arc::new(InMemoryConfigStore::default());
        let torznab = MockProtocolSearcher::new(IndexerProtocol::Torznab);
        let newznab = MockProtocolSearcher::new(IndexerProtocol::Newznab);
        let factory = MockClientFactory::new();

        let aggregator = SearchAggregator::new(
            Arc::new(torznab.clone()),
            Arc::new(newznab.clone()),
            Duration::from_secs(1),
        );
        let dispatcher =
            DownloadDispatcher::new(Arc::new(factory.clone()), Duration::from_millis(500));
        let service = AcquisitionService::new(store.clone(), aggregator, dispatcher);

        let state = Arc::new(AppState::new(Config::default(), Arc::new(service)));
        let router = create_router(state);

        Self {
            router,
            store,
            torznab,
            newznab,
            factory,
        }
    }

    /// Store an enabled indexer named after its id.
    pub async fn add_indexer(&self, id: &str, protocol: IndexerProtocol) {
        self.store
            .upsert_indexer(fixtures::indexer(id, protocol))
            .await
            .unwrap();
    }

    /// Store a downloader and register its mock client.
    pub async fn add_downloader(
        &self,
        id: &str,
        client_type: DownloaderType,
        priority: i32,
    ) -> MockDownloadClient {
        self.store
            .upsert_downloader(fixtures::downloader_config(id, client_type, priority))
            .await;
        let client = MockDownloadClient::new(client_type);
        self.factory.insert(id, client.clone());
        client
    }

    /// Make a GET request.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// Make a POST request with a JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// Make a POST request without a body.
    pub async fn post_empty(&self, path: &str) -> TestResponse {
        self.request("POST", path, None).await
    }

    /// Make a DELETE request.
    pub async fn delete(&self, path: &str) -> TestResponse {
        self.request("DELETE", path, None).await
    }

    /// Make a raw request and return the body as text.
    pub async fn get_text(&self, path: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .unwrap();
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        let request = request_builder.body(body).unwrap();

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body }
    }
}

/// Response from a test request.
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}
