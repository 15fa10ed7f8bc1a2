//! fermwatch - fermentation monitor
//!
//! # Usage
//!
//! ```bash
//! # Against InfluxDB and a hydrometer gateway, config from ./fermwatch.toml
//! fermwatch
//!
//! # Explicit config file and bind address
//! fermwatch --config /etc/fermwatch.toml --addr 0.0.0.0:9090
//!
//! # No external services: in-memory store, simulated hydrometer
//! fermwatch --demo
//! ```
//!
//! # Environment Variables
//!
//! - `FERMWATCH_CONFIG`: path to the TOML config file
//! - `INFLUX_TOKEN`, `TELEGRAM_BOT_TOKEN`, `TELEGRAM_CHAT_ID`: credentials
//! - `RUST_LOG`: logging level (default: info)

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use fermwatch::api::{create_app, ApiState};
use fermwatch::config::{defaults, settings::keys, StaticSettings, StoreSettings};
use fermwatch::ingest::Ingestor;
use fermwatch::jobs::{register_jobs, MonitorParts, MonitorState};
use fermwatch::notify::{BrewNotifier, DashboardHub, Notifier};
use fermwatch::sensor::{HttpGateway, SensorGateway, SimulatedGateway};
use fermwatch::storage::{ProcessLock, WatermarkStore};
use fermwatch::store::{InfluxStore, MemoryStore, SeriesStore};
use fermwatch::{AlertPolicy, MonitorConfig, Scheduler, SettingsProvider};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "fermwatch")]
#[command(about = "Fermentation monitor: calibration, prediction, anomaly alerts")]
#[command(version)]
struct CliArgs {
    /// Path to the TOML config file (takes precedence over $FERMWATCH_CONFIG)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override the server address (default: "0.0.0.0:8080")
    #[arg(short, long, value_name = "HOST:PORT")]
    addr: Option<String>,

    /// Run without external services: in-memory store, simulated hydrometer,
    /// test mode enabled
    #[arg(long)]
    demo: bool,

    /// Emit logs as JSON lines
    #[arg(long, env = "FERMWATCH_LOG_JSON")]
    log_json: bool,

    /// Forget the persisted ingestion watermark before starting; it is then
    /// re-derived from the calibrated series
    #[arg(long)]
    reset_watermark: bool,
}

#[derive(Debug, Clone, Copy)]
enum TaskName {
    HttpServer,
    Scheduler,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskName::HttpServer => write!(f, "HttpServer"),
            TaskName::Scheduler => write!(f, "Scheduler"),
        }
    }
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
    }
}

fn load_config(args: &CliArgs) -> Result<MonitorConfig> {
    let mut cfg = match &args.config {
        Some(path) => MonitorConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => MonitorConfig::load(),
    };
    if let Some(addr) = &args.addr {
        cfg.server.addr.clone_from(addr);
    }
    Ok(cfg)
}

// ============================================================================
// Tasks
// ============================================================================

fn spawn_http_server(
    task_set: &mut JoinSet<Result<TaskName>>,
    listener: tokio::net::TcpListener,
    app: axum::Router,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        info!("[HttpServer] Task starting");
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { cancel_token.cancelled().await })
            .await
            .context("HTTP server error")?;
        info!("[HttpServer] Graceful shutdown complete");
        Ok(TaskName::HttpServer)
    });
}

fn spawn_scheduler(
    task_set: &mut JoinSet<Result<TaskName>>,
    scheduler: Arc<Scheduler>,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        scheduler.run(cancel_token).await;
        Ok(TaskName::Scheduler)
    });
}

/// Monitor tasks; the first failure cancels everything.
async fn run_supervisor(
    task_set: &mut JoinSet<Result<TaskName>>,
    cancel_token: CancellationToken,
) -> Result<()> {
    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!("Supervisor: shutdown signal received");
                break;
            }
            result = task_set.join_next() => match result {
                Some(Ok(Ok(task))) => info!(%task, "Supervisor: task completed"),
                Some(Ok(Err(e))) => {
                    error!(error = %e, "Supervisor: task failed");
                    cancel_token.cancel();
                    return Err(e);
                }
                Some(Err(e)) => {
                    error!(error = %e, "Supervisor: task panicked");
                    cancel_token.cancel();
                    return Err(anyhow::anyhow!("Task panicked: {e}"));
                }
                None => break,
            }
        }
    }

    let drain = async { while task_set.join_next().await.is_some() {} };
    if tokio::time::timeout(std::time::Duration::from_secs(10), drain).await.is_err() {
        warn!("Supervisor: tasks still running after 10s, aborting");
        task_set.abort_all();
    }
    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_json);

    let cfg = load_config(&args)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(cfg.scheduler.worker_threads.max(1))
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    runtime.block_on(run(args, cfg))
}

async fn run(args: CliArgs, cfg: MonitorConfig) -> Result<()> {
    let _lock = ProcessLock::acquire(&cfg.data.data_dir)?;

    let mut static_settings = StaticSettings::from_toml(&cfg.settings);
    let (store, gateway, persistence): (Arc<dyn SeriesStore>, Arc<dyn SensorGateway>, Option<WatermarkStore>) =
        if args.demo {
            info!("Demo mode: in-memory store, simulated hydrometer, test mode on");
            static_settings = static_settings.with(keys::TEST_MODE, "true");
            (
                Arc::new(MemoryStore::new()),
                Arc::new(SimulatedGateway::new(defaults::TEST_SG_START, defaults::TEST_TEMP_BASE_C)),
                None,
            )
        } else {
            let watermarks = WatermarkStore::open(cfg.data.state_db_path())
                .context("Failed to open state database")?;
            if args.reset_watermark {
                watermarks.clear().context("Failed to reset watermark")?;
                warn!("Persisted watermark cleared");
            }
            (
                Arc::new(InfluxStore::new(&cfg.store).context("Failed to build series store client")?),
                Arc::new(HttpGateway::new(&cfg.sensor).context("Failed to build gateway client")?),
                Some(watermarks),
            )
        };

    let settings: Arc<dyn SettingsProvider> = Arc::new(StoreSettings::new(
        Arc::clone(&store),
        cfg.store.settings_measurement.clone(),
        static_settings,
    ));
    let hub = Arc::new(DashboardHub::default());
    let notifier: Arc<dyn Notifier> = Arc::new(BrewNotifier::from_config(&cfg.alerts, Arc::clone(&hub)));
    if cfg.alerts.resolved_telegram().is_none() {
        warn!("Telegram not configured, alerts go to the dashboard only");
    }

    let mut ingestor = Ingestor::new(Arc::clone(&store), &cfg, persistence);
    match ingestor.restore(Utc::now()).await {
        Ok(source) => info!(?source, watermark = ?ingestor.watermark().get(), "Ingestion watermark ready"),
        Err(e) => warn!(error = %e, "Watermark restore failed, retrying on the first cycle"),
    }

    let state = Arc::new(MonitorState::default());
    let mut scheduler = Scheduler::new();
    register_jobs(
        &mut scheduler,
        &cfg,
        MonitorParts {
            store,
            settings,
            gateway,
            hub: Arc::clone(&hub),
            policy: AlertPolicy::from_config(&cfg.alerts, notifier),
            ingestor,
        },
        &state,
    )?;
    let scheduler = Arc::new(scheduler);

    let listener = tokio::net::TcpListener::bind(&cfg.server.addr)
        .await
        .with_context(|| format!("Failed to bind {}", cfg.server.addr))?;
    info!(addr = %cfg.server.addr, "HTTP API listening");
    let app = create_app(ApiState::new(Arc::clone(&scheduler), state, hub));

    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();
    spawn_http_server(&mut task_set, listener, app, cancel_token.clone());
    spawn_scheduler(&mut task_set, scheduler, cancel_token.clone());
    run_supervisor(&mut task_set, cancel_token).await?;

    info!("fermwatch shutdown complete");
    Ok(())
}
