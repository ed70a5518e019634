//! Push subscription seams.
//!
//! The subscription table and VAPID signing live in the backend; this module
//! only asks whether a user can be reached and fans a payload out to the
//! user's endpoints.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use soc_common::{retry_with_backoff, RetryConfig, SocError};
use tracing::{debug, info, warn};
use url::Url;

use crate::push::PushPayload;

/// Keys a push service needs to encrypt for one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionKeys {
    pub p256dh: String,
    pub auth: String,
}

/// One browser push endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushSubscription {
    pub endpoint: Url,
    pub keys: SubscriptionKeys,
}

/// Lookup of a user's subscriptions.
#[async_trait]
pub trait SubscriptionDirectory: Send + Sync {
    async fn subscriptions_for(&self, user: &str) -> Result<Vec<PushSubscription>, SocError>;
}

/// Whether `user` has at least one endpoint.
pub async fn has_active_subscription(
    directory: &dyn SubscriptionDirectory,
    user: &str,
) -> Result<bool, SocError> {
    Ok(!directory.subscriptions_for(user).await?.is_empty())
}

/// Result of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Delivered,
    /// The push service no longer knows the endpoint.
    Expired,
}

impl DeliveryStatus {
    /// Map a push-service status code.
    pub fn from_status(status: StatusCode) -> Result<Self, SocError> {
        if status.is_success() {
            Ok(Self::Delivered)
        } else if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            Ok(Self::Expired)
        } else if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            Err(SocError::network(format!("push service returned {status}")))
        } else {
            Err(SocError::push(format!("push service rejected message: {status}")))
        }
    }
}

/// Sends an encoded payload to one endpoint.
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn send(
        &self,
        subscription: &PushSubscription,
        payload: Bytes,
    ) -> Result<DeliveryStatus, SocError>;
}

/// Per-endpoint results of a fan-out.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: Vec<Url>,
    /// Endpoints the backend should forget.
    pub expired: Vec<Url>,
    pub failed: Vec<(Url, String)>,
}

impl DeliveryReport {
    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.expired.len() + self.failed.len()
    }
}

/// Fans a payload out to every endpoint of a user.
pub struct PushDispatcher {
    directory: Arc<dyn SubscriptionDirectory>,
    transport: Arc<dyn PushTransport>,
    retry: RetryConfig,
}

impl PushDispatcher {
    pub fn new(directory: Arc<dyn SubscriptionDirectory>, transport: Arc<dyn PushTransport>) -> Self {
        Self {
            directory,
            transport,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Send `payload` to every endpoint of `user`.
    ///
    /// Only the directory lookup and encoding can fail the whole call;
    /// endpoint errors land in the report.
    pub async fn notify_user(
        &self,
        user: &str,
        payload: &PushPayload,
    ) -> Result<DeliveryReport, SocError> {
        let subscriptions = self.directory.subscriptions_for(user).await?;
        let mut report = DeliveryReport::default();
        if subscriptions.is_empty() {
            debug!(user, "No push subscriptions");
            return Ok(report);
        }

        let body = Bytes::from(serde_json::to_vec(payload)?);

        for subscription in &subscriptions {
            let endpoint = subscription.endpoint.clone();
            let result = retry_with_backoff(&self.retry, SocError::is_retryable, || {
                self.transport.send(subscription, body.clone())
            })
            .await;

            match result {
                Ok(DeliveryStatus::Delivered) => report.delivered.push(endpoint),
                Ok(DeliveryStatus::Expired) => {
                    debug!(%endpoint, "Subscription expired");
                    report.expired.push(endpoint);
                }
                Err(e) => {
                    warn!(%endpoint, category = e.category(), error = %e, "Push delivery failed");
                    report.failed.push((endpoint, e.to_string()));
                }
            }
        }

        info!(
            user,
            delivered = report.delivered.len(),
            expired = report.expired.len(),
            failed = report.failed.len(),
            "Push fan-out finished"
        );
        Ok(report)
    }
}
