//! Health probe and version-skew detection.
//!
//! The backend exposes `GET /api/health` returning
//! `{ status, version, timestamp, environment, message }`. Polling it lets a
//! long-lived page notice that the deployed version moved on.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use soc_common::{retry_with_backoff, RetryConfig};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::{Fetcher, NetError, Request};

/// Shortest polling period; shorter requests are raised to it.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Body of the health endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub timestamp: String,
    #[serde(default)]
    pub environment: String,
    #[serde(default)]
    pub message: String,
}

impl HealthStatus {
    pub fn is_ok(&self) -> bool {
        self.status.eq_ignore_ascii_case("ok")
    }
}

/// The deployed version differs from the one this client runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionSkew {
    pub running: String,
    pub deployed: String,
}

/// Client for the health endpoint.
pub struct HealthProbe {
    fetcher: Arc<dyn Fetcher>,
    endpoint: Url,
    retry: RetryConfig,
}

impl HealthProbe {
    /// Create a probe for `origin` + `path`.
    pub fn new(fetcher: Arc<dyn Fetcher>, origin: &Url, path: &str) -> Result<Self, NetError> {
        let endpoint = origin
            .join(path)
            .map_err(|e| NetError::InvalidUrl(e.to_string()))?;
        Ok(Self {
            fetcher,
            endpoint,
            retry: RetryConfig::default(),
        })
    }

    /// Override the retry policy used by [`HealthProbe::check`].
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Fetch the health document once (with retries on transient failures).
    pub async fn check(&self) -> Result<HealthStatus, NetError> {
        retry_with_backoff(&self.retry, NetError::is_transient, || async {
            let response = self.fetcher.fetch(&Request::get(self.endpoint.clone())).await?;
            if !response.ok() {
                return Err(NetError::Status(response.status));
            }
            response.json::<HealthStatus>()
        })
        .await
    }

    /// Compare the deployed version with `running`.
    pub async fn detect_skew(&self, running: &str) -> Result<Option<VersionSkew>, NetError> {
        let health = self.check().await?;
        if health.version == running {
            debug!(version = %running, "No version skew");
            return Ok(None);
        }
        info!(running = %running, deployed = %health.version, "Version skew detected");
        Ok(Some(VersionSkew {
            running: running.to_string(),
            deployed: health.version,
        }))
    }

    /// Poll every `interval`, publishing each detected skew.
    ///
    /// `interval` is clamped to [`MIN_POLL_INTERVAL`]. The task ends when the
    /// receiver is dropped.
    pub fn spawn_polling(
        self: Arc<Self>,
        running: String,
        interval: Duration,
    ) -> (JoinHandle<()>, mpsc::Receiver<VersionSkew>) {
        let (tx, rx) = mpsc::channel(4);
        let interval = interval.max(MIN_POLL_INTERVAL);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match self.detect_skew(&running).await {
                    Ok(Some(skew)) => {
                        if tx.send(skew).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!(endpoint = %self.endpoint, error = %e, "Health probe failed"),
                }
                if tx.is_closed() {
                    break;
                }
            }
        });

        (handle, rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FetcherConfig, HttpFetcher};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn health_body(version: &str) -> serde_json::Value {
        serde_json::json!({
            "status": "ok",
            "version": version,
            "timestamp": "2026-10-19T10:00:00Z",
            "environment": "production",
            "message": "Sóc de Poble API operativa"
        })
    }

    async fn probe_for(server: &MockServer) -> HealthProbe {
        let origin = Url::parse(&server.uri()).unwrap();
        let fetcher = HttpFetcher::new(FetcherConfig {
            app_origin: Some(origin.clone()),
            ..Default::default()
        })
        .unwrap();
        HealthProbe::new(Arc::new(fetcher), &origin, "/api/health")
            .unwrap()
            .with_retry(RetryConfig::none())
    }

    #[tokio::test]
    async fn test_check_parses_health() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(health_body("2.3.0")))
            .mount(&server)
            .await;

        let health = probe_for(&server).await.check().await.unwrap();
        assert!(health.is_ok());
        assert_eq!(health.version, "2.3.0");
        assert_eq!(health.environment, "production");
    }

    #[tokio::test]
    async fn test_detect_skew() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(health_body("2.4.0")))
            .mount(&server)
            .await;

        let probe = probe_for(&server).await;
        assert_eq!(probe.detect_skew("2.4.0").await.unwrap(), None);

        let skew = probe.detect_skew("2.3.0").await.unwrap().unwrap();
        assert_eq!(skew.deployed, "2.4.0");
        assert_eq!(skew.running, "2.3.0");
    }

    #[tokio::test]
    async fn test_check_rejects_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/health"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = probe_for(&server).await.check().await.unwrap_err();
        assert!(matches!(err, NetError::Status(s) if s.as_u16() == 500));
    }

    #[tokio::test]
    async fn test_polling_publishes_skew() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(health_body("9.9.9")))
            .mount(&server)
            .await;

        let probe = Arc::new(probe_for(&server).await);
        let (handle, mut rx) = probe.spawn_polling("1.0.0".into(), Duration::from_millis(10));

        let skew = rx.recv().await.unwrap();
        assert_eq!(skew.deployed, "9.9.9");

        drop(rx);
        handle.abort();
    }

    #[tokio::test]
    async fn test_polling_with_zero_interval_is_clamped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(health_body("9.9.9")))
            .mount(&server)
            .await;

        let probe = Arc::new(probe_for(&server).await);
        let (handle, mut rx) = probe.spawn_polling("1.0.0".into(), Duration::ZERO);

        let skew = rx.recv().await.unwrap();
        assert_eq!(skew.deployed, "9.9.9");

        drop(rx);
        handle.abort();
    }
}
