//! Tracing setup for the worker binaries.
//!
//! The worker crates log at `info` by default while everything else stays at
//! `warn`, so the event stream is readable without a `RUST_LOG`. With span
//! timing on, every `sw_event` span reports its busy/idle time when it closes.

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use crate::SocError;

/// Crates whose events are shown by default.
const WORKER_TARGETS: [&str; 3] = ["soc_sw", "soc_net", "sw_cli"];

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, for reading at a terminal.
    Pretty,
    /// One line per event.
    #[default]
    Compact,
    /// One JSON object per event, for log shipping.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    pub format: LogFormat,
    /// Worker crates at `debug` instead of `info`.
    pub verbose: bool,
    /// Emit a close event with timings for every span.
    pub span_timing: bool,
    /// Full filter directive; takes precedence over `RUST_LOG`.
    pub filter: Option<String>,
}

impl LogConfig {
    /// Debug output for the worker crates, with span timings.
    pub fn verbose() -> Self {
        Self {
            verbose: true,
            span_timing: true,
            ..Default::default()
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// `warn` globally, worker crates at `info` or `debug`.
    fn default_directives(&self) -> String {
        let level = if self.verbose { "debug" } else { "info" };
        let mut directives = vec!["warn".to_string()];
        directives.extend(WORKER_TARGETS.iter().map(|t| format!("{t}={level}")));
        directives.join(",")
    }

    fn env_filter(&self) -> EnvFilter {
        let fallback = || EnvFilter::new(self.default_directives());
        match self.filter {
            Some(ref custom) => EnvFilter::try_new(custom).unwrap_or_else(|_| fallback()),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback()),
        }
    }

    fn fmt_layer(&self) -> Box<dyn Layer<Registry> + Send + Sync> {
        let spans = if self.span_timing {
            FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };
        let layer = fmt::layer().with_target(true).with_span_events(spans);
        match self.format {
            LogFormat::Pretty => layer.pretty().boxed(),
            LogFormat::Compact => layer.compact().boxed(),
            LogFormat::Json => layer.json().with_current_span(true).boxed(),
        }
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: LogConfig) -> Result<(), SocError> {
    tracing_subscriber::registry()
        .with(config.fmt_layer())
        .with(config.env_filter())
        .try_init()
        .map_err(|e| SocError::config_with_source("logging already initialized", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_target_worker_crates() {
        let directives = LogConfig::default().default_directives();
        assert_eq!(directives, "warn,soc_sw=info,soc_net=info,sw_cli=info");
    }

    #[test]
    fn test_verbose_raises_worker_crates_only() {
        let config = LogConfig::verbose();
        assert!(config.span_timing);
        let directives = config.default_directives();
        assert!(directives.starts_with("warn,"));
        assert!(directives.contains("soc_sw=debug"));
        assert!(!directives.contains("info"));
    }

    #[test]
    fn test_builders() {
        let config = LogConfig::default()
            .with_format(LogFormat::Json)
            .with_filter("soc_sw=trace");
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.filter.as_deref(), Some("soc_sw=trace"));
        assert!(!config.verbose);
    }
}
