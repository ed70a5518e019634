//! # Sóc de Poble Common
//!
//! Shared error types, logging configuration and retry helpers for the
//! offline-caching worker and its tooling.
//!
//! ## Features
//!
//! - Error type with retryable/category classification
//! - Logging configuration and setup
//! - Retry and timeout utilities

pub mod error;
pub mod logging;
pub mod retry;

pub use error::SocError;
pub use logging::{init_logging, LogConfig, LogFormat};
pub use retry::{retry_with_backoff, with_timeout, RetryConfig};
