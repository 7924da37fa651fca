//! dbmon Binary Entry Point
//!
//! Runs the scheduler against real MySQL targets and the HTTP push agent.
//! Core functionality is provided by the `dbmon` library crate.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use dbmon::{
    collector::{InnodbDiagnostics, MySqlConnector, Pipeline},
    config::{AppConfig, parse_duration},
    publisher::HttpPublisher,
    scheduler::{BackpressurePolicy, Schedule, Scheduler, WorkerPool},
    server::{DiagState, create_router},
};
use tokio_util::sync::CancellationToken;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

/// Default log filter when neither `--log-level` nor `RUST_LOG` is set.
const DEFAULT_LOG_FILTER: &str = "info,dbmon=debug";

/// dbmon - Scheduled MySQL health collector
#[derive(Parser, Debug)]
#[command(name = "dbmon", version, about, long_about = None)]
struct Cli {
    /// Single target configuration file (takes precedence over --config-dir)
    #[arg(short = 'c', long, env = "DBMON_CONFIG_FILE")]
    config_file: Option<PathBuf>,

    /// Directory of target configuration files [default: etc]
    #[arg(short = 'd', long, env = "DBMON_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Worker pool size [default: CPU count]
    #[arg(short = 't', long, env = "DBMON_THREADS")]
    threads: Option<usize>,

    /// Tick interval, e.g. 60s or 5m [default: 60s]
    #[arg(long, env = "DBMON_STEP", value_parser = parse_duration)]
    step: Option<Duration>,

    /// Per-target deadline [default: 30s]
    #[arg(long, env = "DBMON_DEADLINE", value_parser = parse_duration)]
    deadline: Option<Duration>,

    /// Wait queue depth [default: threads]
    #[arg(long, env = "DBMON_QUEUE_DEPTH")]
    queue_depth: Option<usize>,

    /// Behaviour when the wait queue is full: drop or block
    #[arg(long, env = "DBMON_BACKPRESSURE")]
    backpressure: Option<BackpressurePolicy>,

    /// Push agent URL
    #[arg(long, env = "DBMON_AGENT_URL")]
    agent_url: Option<String>,

    /// Log filter, e.g. info or dbmon=trace (overrides RUST_LOG)
    #[arg(long, env = "DBMON_LOG_LEVEL")]
    log_level: Option<String>,

    /// Also write logs to this file
    #[arg(long, env = "DBMON_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Serve the diagnostic endpoint
    #[arg(long, env = "DBMON_DIAG")]
    diag: bool,

    /// Diagnostic endpoint bind address
    #[arg(long, env = "DBMON_DIAG_ADDR")]
    diag_addr: Option<String>,

    /// Optional application configuration file (YAML)
    #[arg(long, env = "DBMON_APP_CONFIG")]
    app_config: Option<PathBuf>,
}

impl Cli {
    /// Apply CLI/env overrides on top of the file configuration (CLI > ENV > file).
    fn apply(self, config: &mut AppConfig) {
        if let Some(file) = self.config_file {
            config.config_file = Some(file);
        }
        if let Some(dir) = self.config_dir {
            config.config_dir = Some(dir);
        }
        if let Some(threads) = self.threads {
            config.workers = threads;
        }
        if let Some(step) = self.step {
            config.interval = step;
        }
        if let Some(deadline) = self.deadline {
            config.deadline = deadline;
        }
        if let Some(depth) = self.queue_depth {
            config.queue_depth = Some(depth);
        }
        if let Some(policy) = self.backpressure {
            config.backpressure = policy;
        }
        if let Some(url) = self.agent_url {
            config.agent.url = url;
        }
        if self.diag {
            config.diag.enabled = true;
        }
        if let Some(addr) = self.diag_addr {
            config.diag.bind = addr;
        }
    }
}

/// Initialize tracing; the returned guard flushes the log file on drop.
fn init_tracing(
    log_level: Option<&str>,
    log_file: Option<&Path>,
) -> Result<Option<WorkerGuard>, Box<dyn std::error::Error>> {
    let filter = || match log_level {
        Some(level) => EnvFilter::try_new(level),
        None => Ok(EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))),
    };

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
            let dir = dir.unwrap_or_else(|| Path::new("."));
            std::fs::create_dir_all(dir)?;
            let name = path.file_name().ok_or("log file path has no file name")?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(filter()?);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(filter()?))
        .with(file_layer)
        .init();

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse CLI arguments (exits on --version / --help)
    let cli = Cli::parse();

    let _log_guard = init_tracing(cli.log_level.as_deref(), cli.log_file.as_deref())?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "dbmon - MySQL health collector");

    // Load configuration (CLI > ENV > config file > defaults)
    let mut config = match &cli.app_config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path.display());
            AppConfig::load(path)?
        }
        None => AppConfig::default(),
    };
    cli.apply(&mut config);
    config.validate()?;

    let source = config.target_source()?;
    tracing::info!(
        source = ?source,
        interval = %humantime::format_duration(config.interval),
        deadline = %humantime::format_duration(config.deadline),
        workers = config.workers,
        agent = %config.agent.url,
        "Configuration loaded"
    );

    // Build the engine
    let publisher = HttpPublisher::from_config(&config.agent)?;
    let pipeline = Pipeline::new(
        Arc::new(MySqlConnector::new()),
        Arc::new(publisher),
        Arc::new(InnodbDiagnostics),
        config.interval,
        config.deadline,
    );
    let pool = WorkerPool::new(config.pool_config());
    let scheduler = Scheduler::new(source, pipeline, pool).await?;
    let fatal = scheduler.fatal_signal();

    // Optional diagnostic endpoint
    let stop_diag = CancellationToken::new();
    if config.diag.enabled {
        let listener = tokio::net::TcpListener::bind(&config.diag.bind).await?;
        tracing::info!("Diagnostic endpoint listening on: http://{}", config.diag.bind);
        let app = create_router(DiagState::new(scheduler.pool()));
        let stop = stop_diag.clone();
        tokio::spawn(async move {
            let shutdown = async move { stop.cancelled().await };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                tracing::error!(error = %e, "Diagnostic endpoint failed");
            }
        });
    }

    let schedule = Schedule::aligned(config.interval);
    scheduler.start(schedule).await?;
    tracing::info!("Press Ctrl+C to shutdown");

    let fatal_hit = tokio::select! {
        _ = shutdown_signal() => false,
        _ = fatal.cancelled() => true,
    };

    stop_diag.cancel();
    scheduler.shutdown().await?;

    if fatal_hit {
        return Err("target configuration source disappeared".into());
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }
}
