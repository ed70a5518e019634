//! Worker configuration.
//!
//! A single read-only value built at deploy time and handed to every
//! handler. The cache version defaults to the `SOC_CACHE_VERSION` variable
//! seen by the compiler, so each build gets its own cache name.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use soc_common::SocError;
use tracing::debug;
use url::Url;

/// Version tag baked in at build time.
pub const BUILD_CACHE_VERSION: &str = match option_env!("SOC_CACHE_VERSION") {
    Some(version) => version,
    None => "v1",
};

/// Worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Prefix of every cache store name owned by the worker
    pub cache_prefix: String,

    /// Version tag; `cache_prefix-cache_version` is the current cache
    pub cache_version: String,

    /// Application origin
    pub origin: Url,

    /// Root-relative assets pre-cached at install
    pub precache_manifest: Vec<String>,

    /// Document served to offline navigations that miss the cache
    pub shell_path: String,

    /// Body of the synthetic 503
    pub offline_body: String,

    /// Network timeout in seconds before falling back to the cache
    pub network_timeout_secs: u64,

    /// Skip the waiting phase once installed
    pub skip_waiting_on_install: bool,

    /// Notification defaults
    pub notifications: NotificationConfig,

    /// Health probe settings
    pub health: HealthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub default_title: String,
    pub default_body: String,
    pub icon: String,
    pub badge: String,
    pub tag: String,
    pub vibrate: Vec<u32>,

    /// Persona (IAIA) messages
    pub persona_title: String,
    pub persona_icon: String,
    pub persona_tag: String,
    pub persona_vibrate: Vec<u32>,

    /// Operator repair command
    pub repair_title: String,
    pub repair_body: String,
    pub repair_tag: String,
    pub repair_vibrate: Vec<u32>,

    /// In-app route opened by a click when the payload names none
    pub default_route: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Poll the health endpoint for version skew
    pub enabled: bool,

    /// Endpoint path, relative to the origin
    pub path: String,

    /// Poll interval in seconds
    pub interval_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            cache_prefix: "soc-de-poble".to_string(),
            cache_version: BUILD_CACHE_VERSION.to_string(),
            origin: Url::parse("http://localhost:5173/").expect("static origin is valid"),
            precache_manifest: vec![
                "/".to_string(),
                "/index.html".to_string(),
                "/manifest.json".to_string(),
                "/icon-192.png".to_string(),
                "/icon-512.png".to_string(),
            ],
            shell_path: "/index.html".to_string(),
            offline_body: "Offline".to_string(),
            network_timeout_secs: 10,
            skip_waiting_on_install: true,
            notifications: NotificationConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            default_title: "Sóc de Poble".to_string(),
            default_body: "Tens una notificació nova".to_string(),
            icon: "/icon-192.png".to_string(),
            badge: "/icon-192.png".to_string(),
            tag: "soc-general".to_string(),
            vibrate: vec![200, 100, 200],
            persona_title: "La IAIA".to_string(),
            persona_icon: "/icon-512.png".to_string(),
            persona_tag: "iaia-message".to_string(),
            persona_vibrate: vec![100, 50, 100, 50, 300],
            repair_title: "🔧 Reparació del sistema".to_string(),
            repair_body: "Estem netejant la memòria cau de l'aplicació.".to_string(),
            repair_tag: "system-repair".to_string(),
            repair_vibrate: vec![500, 200, 500],
            default_route: "/chats".to_string(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: "/api/health".to_string(),
            interval_secs: 300,
        }
    }
}

impl WorkerConfig {
    /// Name of the current cache store.
    pub fn cache_name(&self) -> String {
        format!("{}-{}", self.cache_prefix, self.cache_version)
    }

    pub fn network_timeout(&self) -> Duration {
        Duration::from_secs(self.network_timeout_secs)
    }

    /// Resolve a root-relative path against the origin.
    pub fn resolve(&self, path: &str) -> Result<Url, SocError> {
        self.origin
            .join(path)
            .map_err(|e| SocError::config_with_source(format!("cannot resolve {path}"), e))
    }

    /// Parse a JSON document; missing keys take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, SocError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SocError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading worker config");
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Apply `SOC_CACHE_VERSION` and `SOC_ORIGIN` from the environment.
    pub fn with_env_overrides(mut self) -> Result<Self, SocError> {
        if let Ok(version) = std::env::var("SOC_CACHE_VERSION") {
            self.cache_version = version;
        }
        if let Ok(origin) = std::env::var("SOC_ORIGIN") {
            self.origin = Url::parse(&origin)
                .map_err(|e| SocError::config_with_source("SOC_ORIGIN is not a URL", e))?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), SocError> {
        if self.cache_prefix.trim().is_empty() {
            return Err(SocError::config("cache_prefix must not be empty"));
        }
        if self.cache_version.trim().is_empty() {
            return Err(SocError::config("cache_version must not be empty"));
        }
        if !matches!(self.origin.scheme(), "http" | "https") {
            return Err(SocError::config(format!(
                "origin must be http(s), got {}",
                self.origin
            )));
        }
        if let Some(bad) = self
            .precache_manifest
            .iter()
            .chain(std::iter::once(&self.shell_path))
            .find(|p| !p.starts_with('/'))
        {
            return Err(SocError::config(format!(
                "asset path must be root-relative: {bad}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_cache_name_and_manifest() {
        let config = WorkerConfig::default();
        assert!(config.cache_name().starts_with("soc-de-poble-"));
        assert_eq!(config.precache_manifest.len(), 5);
        assert!(config.precache_manifest.contains(&"/index.html".to_string()));
        assert!(!config.health.enabled);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = WorkerConfig::from_json_str(
            r#"{ "cache_version": "2026-10-19", "origin": "https://socdepoble.cat/" }"#,
        )
        .unwrap();
        assert_eq!(config.cache_name(), "soc-de-poble-2026-10-19");
        assert_eq!(config.origin.host_str(), Some("socdepoble.cat"));
        assert_eq!(config.notifications.default_route, "/chats");
    }

    #[test]
    fn test_rejects_relative_manifest_entry() {
        let err = WorkerConfig::from_json_str(r#"{ "precache_manifest": ["index.html"] }"#)
            .unwrap_err();
        assert_eq!(err.category(), "config");
    }

    #[test]
    fn test_rejects_empty_version() {
        let err = WorkerConfig::from_json_str(r#"{ "cache_version": " " }"#).unwrap_err();
        assert!(err.to_string().contains("cache_version"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "cache_version": "v7", "network_timeout_secs": 3 }}"#).unwrap();

        let config = WorkerConfig::load(file.path()).unwrap();
        assert_eq!(config.cache_version, "v7");
        assert_eq!(config.network_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn test_resolve() {
        let config = WorkerConfig::default();
        let url = config.resolve("/manifest.json").unwrap();
        assert_eq!(url.path(), "/manifest.json");
        assert_eq!(url.origin(), config.origin.origin());
    }
}
