//! # Sóc de Poble Service Worker
//!
//! Offline caching and update lifecycle for the Sóc de Poble web app.
//!
//! ## Features
//!
//! - **Versioned caches**: one named cache per build, stale ones purged on activation
//! - **Lifecycle**: install → waiting → activate, with skip-waiting on request
//! - **Fetch interception**: network-first for same-origin GETs, cache and shell fallback
//! - **Push**: notification display, persona messages and remote cache repair
//! - **Click routing**: focus an open window or open a new one
//! - **Update bridge**: page-side prompt for a waiting version, plus full session reset
//!
//! ## Architecture
//!
//! ```text
//! Registration (scope)
//!     ├── installing / waiting / active (ServiceWorker)
//!     └── events ──► UpdateBridge ──► UpdatePrompt
//!
//! ServiceWorker
//!     └── WorkerContext
//!             ├── CacheStore   (name → RequestKey → CachedResponse)
//!             ├── Fetcher      (network)
//!             ├── Clients      (open windows)
//!             └── Notifications
//! ```

use soc_common::SocError;
use soc_net::NetError;
use thiserror::Error;

pub mod cache;
pub mod click;
pub mod clients;
pub mod config;
pub mod fetch;
pub mod lifecycle;
pub mod notification;
pub mod push;
pub mod subscription;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod update;
pub mod worker;

pub use cache::{purge_all, purge_except, CacheStore, CachedResponse, MemoryCacheStore, PurgeReport, RequestKey};
pub use click::{handle_click, resolve_target, ClickResolution, NotificationClickEvent};
pub use clients::{Client, ClientMatchOptions, ClientType, Clients};
pub use config::{HealthConfig, NotificationConfig, WorkerConfig, BUILD_CACHE_VERSION};
pub use fetch::{handle_fetch, FetchOutcome, ResponseSource};
pub use lifecycle::{
    InstallResult, PendingUpdate, Registration, RegistrationEvent, ServiceWorkerId,
    ServiceWorkerState, UpdateRequester, UpdateSignal,
};
pub use notification::{
    MessageKind, NotificationAction, NotificationData, NotificationDescriptor, NotificationId,
    Notifications,
};
pub use push::{handle_push, PushOutcome, PushPayload, REPAIR_INDICATOR, SYSTEM_REPAIR};
pub use subscription::{
    has_active_subscription, DeliveryReport, DeliveryStatus, PushDispatcher, PushSubscription,
    PushTransport, SubscriptionDirectory, SubscriptionKeys,
};
pub use update::{AppShell, ResetReport, UpdateBridge, UpdatePrompt};
pub use worker::{ControlMessage, EventOutcome, ServiceWorker, WorkerContext, WorkerEvent};

/// Errors that can occur in worker operations.
#[derive(Error, Debug)]
pub enum SwError {
    #[error("Install failed on {asset}: {reason}")]
    Install { asset: String, reason: String },

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Network error: {0}")]
    Network(#[from] NetError),

    #[error(transparent)]
    Common(#[from] SocError),

    #[error("Invalid state: {0}")]
    State(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),
}

impl SwError {
    pub fn install(asset: &str, reason: impl std::fmt::Display) -> Self {
        Self::Install {
            asset: asset.to_string(),
            reason: reason.to_string(),
        }
    }
}
