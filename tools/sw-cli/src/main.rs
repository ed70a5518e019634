//! Operator CLI for the Sóc de Poble offline worker.
//!
//! ## Usage
//!
//! ```bash
//! # Print the effective worker config
//! sw-cli config --config worker.json
//!
//! # Probe the backend and report version skew
//! sw-cli health
//!
//! # Show what a push payload would display, and where a click would land
//! sw-cli simulate-push payload.json
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use soc_common::{init_logging, LogConfig, LogFormat};
use soc_net::{FetcherConfig, HealthProbe, HttpFetcher};
use soc_sw::testing::ScriptedFetcher;
use soc_sw::{
    ClickResolution, Clients, EventOutcome, MemoryCacheStore, NotificationClickEvent,
    Notifications, Registration, ServiceWorker, WorkerConfig, WorkerContext, WorkerEvent,
};
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "sw-cli")]
#[command(about = "Inspect and exercise the Sóc de Poble offline worker")]
struct Cli {
    /// Log output format
    #[arg(long, value_enum, default_value = "compact", global = true)]
    log_format: FormatArg,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Pretty,
    Compact,
    Json,
}

impl From<FormatArg> for LogFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Pretty => LogFormat::Pretty,
            FormatArg::Compact => LogFormat::Compact,
            FormatArg::Json => LogFormat::Json,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective config as JSON
    Config {
        /// Worker config file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Query the health endpoint and report version skew
    Health {
        /// Worker config file
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Keep polling at the configured interval
        #[arg(short, long)]
        watch: bool,
    },

    /// Run a push payload through an in-memory worker
    SimulatePush {
        /// Worker config file
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// JSON push payload
        payload: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };
    init_logging(log.with_format(cli.log_format.into()))?;

    match cli.command {
        Commands::Config { config } => {
            let config = load_config(config.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Health { config, watch } => {
            let config = load_config(config.as_deref())?;
            if watch {
                watch_health(&config).await?;
            } else {
                health(&config).await?;
            }
        }
        Commands::SimulatePush { config, payload } => {
            let config = load_config(config.as_deref())?;
            let raw = std::fs::read(&payload)
                .with_context(|| format!("reading {}", payload.display()))?;
            let report = simulate_push(config, &raw).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<WorkerConfig> {
    let config = match path {
        Some(path) => WorkerConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => WorkerConfig::default(),
    };
    Ok(config.with_env_overrides()?)
}

fn probe(config: &WorkerConfig) -> anyhow::Result<HealthProbe> {
    let fetcher = HttpFetcher::new(FetcherConfig {
        app_origin: Some(config.origin.clone()),
        timeout: config.network_timeout(),
        ..FetcherConfig::default()
    })?;
    Ok(HealthProbe::new(Arc::new(fetcher), &config.origin, &config.health.path)?)
}

async fn health(config: &WorkerConfig) -> anyhow::Result<()> {
    let probe = probe(config)?;
    info!(endpoint = %probe.endpoint(), "Probing backend health");

    let status = probe.check().await?;
    println!("status:      {}", status.status);
    println!("deployed:    {}", status.version);
    println!("running:     {}", config.cache_version);
    if !status.environment.is_empty() {
        println!("environment: {}", status.environment);
    }

    if status.version != config.cache_version {
        println!(
            "version skew: running {} but {} is deployed",
            config.cache_version, status.version
        );
        std::process::exit(2);
    }
    if !status.is_ok() {
        bail!("backend reports {}: {}", status.status, status.message);
    }
    Ok(())
}

async fn watch_health(config: &WorkerConfig) -> anyhow::Result<()> {
    if !config.health.enabled {
        bail!("health polling is disabled; set health.enabled in the config");
    }
    let probe = Arc::new(probe(config)?);
    let interval = Duration::from_secs(config.health.interval_secs.max(1));
    info!(endpoint = %probe.endpoint(), ?interval, "Watching backend health");

    let (task, mut skews) = probe.spawn_polling(config.cache_version.clone(), interval);
    while let Some(skew) = skews.recv().await {
        println!(
            "version skew: running {} but {} is deployed",
            skew.running, skew.deployed
        );
    }
    task.await?;
    Ok(())
}

/// Activate a worker against a scripted network, deliver `raw` as a push,
/// then click the resulting notification.
async fn simulate_push(config: WorkerConfig, raw: &[u8]) -> anyhow::Result<serde_json::Value> {
    let fetcher = Arc::new(ScriptedFetcher::new());
    for path in &config.precache_manifest {
        fetcher.ok(&config.resolve(path)?, path);
    }

    let clients = Arc::new(Clients::new());
    let registration = Registration::new(config.origin.clone(), clients.clone());
    let context = WorkerContext {
        store: Arc::new(MemoryCacheStore::new()),
        fetcher,
        clients,
        notifications: Arc::new(Notifications::new()),
        updates: registration.updates(),
    };
    let worker = Arc::new(ServiceWorker::new(Arc::new(config), context));
    registration.install(worker).await?;

    let push = match registration
        .dispatch(WorkerEvent::Push(Some(raw.to_vec().into())))
        .await?
    {
        EventOutcome::Push(outcome) => outcome,
        other => bail!("unexpected outcome {other:?}"),
    };
    debug!(notification = ?push.notification, "Notification shown");

    let click = registration
        .dispatch(WorkerEvent::NotificationClick(NotificationClickEvent {
            notification: push.notification,
            descriptor: push.descriptor.clone(),
            action: None,
        }))
        .await?;
    let target = match click {
        EventOutcome::Click(
            ClickResolution::Opened { url, .. }
            | ClickResolution::Focused { url, .. }
            | ClickResolution::FocusedAndNavigated { url, .. },
        ) => Some(url.to_string()),
        _ => None,
    };

    Ok(serde_json::json!({
        "notification": push.descriptor,
        "repair": push.purge.is_some(),
        "updateRequested": push.update_requested,
        "clickTarget": target,
        "updateChecks": registration.update_checks(),
    }))
}
