//! # Sóc de Poble Net
//!
//! Request/response model and network access for the offline-caching worker.
//!
//! ## Design Goals
//!
//! 1. **One seam for the network**: everything the worker fetches goes through [`Fetcher`]
//! 2. **Snapshot responses**: bodies are fully buffered so a response can be cloned into the cache
//! 3. **Response classification**: `basic` vs `cors` vs `opaque`, mirroring what a page would see
//! 4. **Health probe**: version-skew detection against the backend health endpoint

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, info, trace};
use url::Url;

pub mod health;

pub use health::{HealthProbe, HealthStatus, VersionSkew};

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Unexpected status {0}")]
    Status(StatusCode),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

impl NetError {
    /// Whether another attempt could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            NetError::RequestFailed(_) | NetError::Timeout(_) | NetError::HttpError(_) => true,
            NetError::Status(status) => status.is_server_error(),
            NetError::InvalidUrl(_) | NetError::Decode(_) => false,
        }
    }
}

/// Unique identifier for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// Request mode, as seen by a fetch handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// Top-level page navigation.
    Navigate,
    /// Same-origin subresource.
    SameOrigin,
    /// CORS subresource.
    #[default]
    Cors,
    /// No-CORS subresource (yields opaque cross-origin responses).
    NoCors,
}

/// HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub mode: RequestMode,
    pub body: Option<Bytes>,
}

impl Request {
    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self {
            id: RequestId::new(),
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            mode: RequestMode::Cors,
            body: None,
        }
    }

    /// Create a navigation request (GET, navigate mode).
    pub fn navigate(url: Url) -> Self {
        Self {
            mode: RequestMode::Navigate,
            ..Self::get(url)
        }
    }

    /// Create a POST request.
    pub fn post(url: Url, body: Bytes) -> Self {
        Self {
            method: Method::POST,
            body: Some(body),
            ..Self::get(url)
        }
    }

    /// Set the request mode.
    pub fn with_mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    /// Whether this is a full-page navigation.
    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }
}

/// Response type, following the fetch standard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// Same-origin response.
    #[default]
    Basic,
    /// Cross-origin response readable through CORS.
    Cors,
    /// Cross-origin no-cors response; status and body are hidden.
    Opaque,
    /// Manual-redirect response.
    OpaqueRedirect,
    /// Network error.
    Error,
}

/// HTTP response with a fully buffered body.
#[derive(Debug, Clone)]
pub struct Response {
    pub url: Url,
    pub status: StatusCode,
    pub status_text: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub response_type: ResponseType,
    pub redirected: bool,
}

impl Response {
    /// Create a basic response.
    pub fn new(url: Url, status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            url,
            status,
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers: HeaderMap::new(),
            body: body.into(),
            response_type: ResponseType::Basic,
            redirected: false,
        }
    }

    /// Synthetic 503 returned when neither network nor cache can answer.
    pub fn offline(url: Url, body: &str) -> Self {
        let mut response = Self::new(url, StatusCode::SERVICE_UNAVAILABLE, body.to_string());
        response.status_text = body.to_string();
        response.headers.insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response
    }

    /// Set the response type.
    pub fn with_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    /// Mark the response as the product of a redirect.
    pub fn with_redirected(mut self, redirected: bool) -> Self {
        self.redirected = redirected;
        self
    }

    /// Check if the status is 2xx.
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Same-origin, non-redirected, readable response.
    pub fn is_same_origin_basic(&self) -> bool {
        self.response_type == ResponseType::Basic && !self.redirected
    }

    /// Decode the body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, NetError> {
        serde_json::from_slice(&self.body).map_err(|e| NetError::Decode(e.to_string()))
    }
}

/// The network, as the worker sees it.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Perform the request. Errors mean the network could not answer at all.
    async fn fetch(&self, request: &Request) -> Result<Response, NetError>;
}

#[async_trait]
impl<T: Fetcher + ?Sized> Fetcher for Arc<T> {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        (**self).fetch(request).await
    }
}

/// Fetcher configuration.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// User agent string.
    pub user_agent: String,
    /// Origin of the application; responses from elsewhere are `cors`.
    pub app_origin: Option<Url>,
    /// Default timeout.
    pub timeout: Duration,
    /// Maximum redirects.
    pub max_redirects: usize,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("SocDePoble-Worker/{}", env!("CARGO_PKG_VERSION")),
            app_origin: None,
            timeout: Duration::from_secs(15),
            max_redirects: 10,
        }
    }
}

/// `reqwest`-backed fetcher.
pub struct HttpFetcher {
    client: Client,
    config: FetcherConfig,
}

impl HttpFetcher {
    /// Create a new fetcher.
    pub fn new(config: FetcherConfig) -> Result<Self, NetError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| NetError::RequestFailed(e.to_string()))?;

        info!(origin = ?config.app_origin.as_ref().map(Url::as_str), "HttpFetcher initialized");

        Ok(Self { client, config })
    }

    fn classify(&self, request: &Request, final_url: &Url) -> ResponseType {
        let origin = self
            .config
            .app_origin
            .as_ref()
            .unwrap_or(&request.url)
            .origin();

        if final_url.origin() == origin {
            ResponseType::Basic
        } else if request.mode == RequestMode::NoCors {
            ResponseType::Opaque
        } else {
            ResponseType::Cors
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        debug!(url = %request.url, method = %request.method, "Fetching resource");

        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone());

        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }

        if let Some(ref body) = request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                NetError::Timeout(self.config.timeout)
            } else {
                NetError::HttpError(e)
            }
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let final_url = response.url().clone();
        let redirected = final_url != request.url;
        let response_type = self.classify(request, &final_url);

        let body = response.bytes().await?;

        trace!(
            url = %final_url,
            status = %status,
            ?response_type,
            redirected,
            body_len = body.len(),
            "Response received"
        );

        let mut response = Response::new(final_url, status, body)
            .with_type(response_type)
            .with_redirected(redirected);
        response.headers = headers;

        if response_type == ResponseType::Opaque {
            // Opaque responses hide everything from the page.
            response.status = StatusCode::OK;
            response.body = Bytes::new();
            response.headers = HeaderMap::new();
        }

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_request_builders() {
        let url = Url::parse("https://example.com/feed").unwrap();
        let nav = Request::navigate(url.clone());
        assert_eq!(nav.method, Method::GET);
        assert!(nav.is_navigation());

        let post = Request::post(url, Bytes::from_static(b"{}"));
        assert_eq!(post.method, Method::POST);
        assert!(!post.is_navigation());
    }

    #[test]
    fn test_request_id_uniqueness() {
        assert_ne!(RequestId::new(), RequestId::new());
    }

    #[test]
    fn test_offline_response() {
        let url = Url::parse("https://example.com/x.png").unwrap();
        let response = Response::offline(url, "Offline");
        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.status_text, "Offline");
        assert_eq!(&response.body[..], b"Offline");
    }

    #[test]
    fn test_transient_errors() {
        assert!(NetError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(NetError::Status(StatusCode::BAD_GATEWAY).is_transient());
        assert!(!NetError::Status(StatusCode::NOT_FOUND).is_transient());
        assert!(!NetError::Decode("bad".into()).is_transient());
    }

    #[tokio::test]
    async fn test_http_fetcher_same_origin_is_basic() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/index.html"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
            .mount(&server)
            .await;

        let origin = Url::parse(&server.uri()).unwrap();
        let fetcher = HttpFetcher::new(FetcherConfig {
            app_origin: Some(origin.clone()),
            ..Default::default()
        })
        .unwrap();

        let request = Request::get(origin.join("/index.html").unwrap());
        let response = fetcher.fetch(&request).await.unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.response_type, ResponseType::Basic);
        assert!(!response.redirected);
        assert_eq!(&response.body[..], b"<html></html>");
    }

    #[tokio::test]
    async fn test_http_fetcher_marks_redirects() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(ResponseTemplate::new(302).insert_header("location", "/new"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/new"))
            .respond_with(ResponseTemplate::new(200).set_body_string("moved"))
            .mount(&server)
            .await;

        let origin = Url::parse(&server.uri()).unwrap();
        let fetcher = HttpFetcher::new(FetcherConfig {
            app_origin: Some(origin.clone()),
            ..Default::default()
        })
        .unwrap();

        let response = fetcher
            .fetch(&Request::get(origin.join("/old").unwrap()))
            .await
            .unwrap();

        assert!(response.redirected);
        assert!(!response.is_same_origin_basic());
        assert_eq!(response.url.path(), "/new");
    }

    #[tokio::test]
    async fn test_http_fetcher_other_origin_is_cors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/avatar.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1, 2, 3]))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(FetcherConfig {
            app_origin: Some(Url::parse("https://soc.example").unwrap()),
            ..Default::default()
        })
        .unwrap();

        let url = Url::parse(&server.uri()).unwrap().join("/avatar.png").unwrap();
        let response = fetcher.fetch(&Request::get(url)).await.unwrap();
        assert_eq!(response.response_type, ResponseType::Cors);
    }
}
