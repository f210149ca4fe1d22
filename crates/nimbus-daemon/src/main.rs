//! Nimbus daemon - background synchronization service
//!
//! This binary runs as a user service and handles:
//! - Continuous two-way synchronization of the configured sync root
//! - Periodic remote polling through the change feed
//! - Graceful shutdown on SIGTERM/SIGINT
//!
//! # Architecture
//!
//! The daemon loads configuration, opens the metadata store, wires the
//! REST transport and filesystem adapters into a [`SyncOrchestrator`],
//! and then either runs one reconciliation pass (`--once`) or starts the
//! engine's event and polling loops and waits for a shutdown signal. The
//! signal handler triggers a `CancellationToken`; the engine drains its
//! in-flight transfers before the process exits.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use nimbus_core::config::Config;
use nimbus_core::ports::{ICloudTransport, ILocalFileSystem, IMetadataStore};
use nimbus_engine::{LocalFileSystemAdapter, ProbeNetworkMonitor, SyncOrchestrator};
use nimbus_store::SqliteMetadataStore;
use nimbus_transport::{HttpCloudTransport, RestClient};

/// How often the network monitor probes the file service
const NETWORK_PROBE_INTERVAL_SECS: u64 = 30;

// ============================================================================
// Command line
// ============================================================================

/// Background synchronization daemon for Nimbus
#[derive(Debug, Parser)]
#[command(name = "nimbusd", version, about)]
struct Cli {
    /// Configuration file (defaults to the per-user config location)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override the configured sync root for this run
    #[arg(long, value_name = "DIR")]
    sync_root: Option<PathBuf>,

    /// Run a single reconciliation pass and exit
    #[arg(long)]
    once: bool,

    /// Log at debug level (overrides the configured level)
    #[arg(short, long)]
    verbose: bool,
}

// ============================================================================
// DaemonService
// ============================================================================

/// Main daemon service that owns the sync engine
///
/// Holds the configuration, the wired orchestrator, and a cancellation
/// token for graceful shutdown.
struct DaemonService {
    config: Config,
    orchestrator: Arc<SyncOrchestrator>,
    monitor: Arc<ProbeNetworkMonitor>,
    /// Token for signalling graceful shutdown to all async tasks
    shutdown: CancellationToken,
}

impl DaemonService {
    /// Creates a new DaemonService
    ///
    /// Opens the database, builds the transport from the environment, and
    /// wires the orchestrator.
    async fn new(config: Config, shutdown: CancellationToken) -> Result<Self> {
        // Open database
        let db_path = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("nimbus")
            .join("nimbus.db");

        let store: Arc<dyn IMetadataStore> = Arc::new(
            SqliteMetadataStore::open(&db_path)
                .await
                .context("open metadata database")?,
        );

        // The service endpoint and credential come from the environment so
        // the token never lands in the config file or on the command line.
        let server_url = std::env::var("NIMBUS_SERVER_URL")
            .context("NIMBUS_SERVER_URL is not set; point it at the file service")?;
        let access_token = std::env::var("NIMBUS_ACCESS_TOKEN")
            .context("NIMBUS_ACCESS_TOKEN is not set; provide an API token")?;

        let client = RestClient::new(server_url, access_token)?;
        info!(server = client.base_url(), "Cloud transport configured");
        let transport: Arc<dyn ICloudTransport> = Arc::new(HttpCloudTransport::new(client));
        let filesystem: Arc<dyn ILocalFileSystem> = Arc::new(LocalFileSystemAdapter::new());
        let monitor = ProbeNetworkMonitor::spawn(
            transport.clone(),
            Duration::from_secs(NETWORK_PROBE_INTERVAL_SECS),
        );

        let orchestrator = Arc::new(SyncOrchestrator::new(
            config.clone(),
            store,
            transport,
            filesystem,
            monitor.clone(),
        )?);

        Ok(Self {
            config,
            orchestrator,
            monitor,
            shutdown,
        })
    }

    /// Runs the daemon until shutdown
    ///
    /// Starts the engine's loops, then waits on the cancellation token.
    /// The engine is stopped and drained before this returns.
    async fn run(&self) -> Result<()> {
        info!(
            sync_root = %self.config.sync.root.display(),
            interval_secs = self.config.sync.periodic_interval_secs,
            "Starting sync engine"
        );
        self.orchestrator.start_sync().await?;

        self.shutdown.cancelled().await;
        info!("Shutdown signal received, stopping sync engine");

        self.orchestrator.stop_sync().await;
        self.monitor.shutdown();
        info!("Sync engine stopped");
        Ok(())
    }

    /// Runs one reconciliation pass and returns
    async fn run_once(&self) -> Result<()> {
        info!(
            sync_root = %self.config.sync.root.display(),
            "Running a single reconciliation pass"
        );
        self.orchestrator.run_once().await?;

        let progress = self.orchestrator.status().progress().await;
        info!(
            uploaded = progress.files_uploaded,
            downloaded = progress.files_downloaded,
            deleted = progress.files_deleted,
            conflicts = progress.conflicts_detected,
            failed = progress.items_failed,
            "Reconciliation pass completed"
        );
        self.monitor.shutdown();
        Ok(())
    }
}

// ============================================================================
// Graceful shutdown signal handler
// ============================================================================

/// Waits for SIGTERM or SIGINT and triggers the cancellation token
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }

    token.cancel();
}

// ============================================================================
// Configuration and logging setup
// ============================================================================

/// Loads the config, applies CLI overrides, and rejects invalid settings
fn load_config(cli: &Cli) -> Result<Config> {
    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::load_or_default(&config_path);

    if let Some(root) = &cli.sync_root {
        config.sync.root = root.clone();
    }

    let problems = config.validate();
    if !problems.is_empty() {
        for problem in &problems {
            error!(field = %problem.field, "Invalid configuration: {}", problem.message);
        }
        anyhow::bail!(
            "configuration at {} has {} invalid field(s)",
            config_path.display(),
            problems.len()
        );
    }

    info!(config_path = %config_path.display(), "Loaded configuration");
    Ok(config)
}

/// Initializes tracing from `RUST_LOG`, the CLI, or the config file
fn init_tracing(cli: &Cli, config: &Config) {
    let default_level = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}

// ============================================================================
// Main entry point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Tracing is initialized from the file's logging section before
    // validation runs, so validation failures are logged properly.
    let config = {
        let peek_path = cli.config.clone().unwrap_or_else(Config::default_path);
        let peek = Config::load_or_default(&peek_path);
        init_tracing(&cli, &peek);
        load_config(&cli)?
    };

    info!("Nimbus daemon starting (nimbusd)");

    // Cancellation token propagated to all tasks
    let shutdown_token = CancellationToken::new();

    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        shutdown_signal(signal_token).await;
    });

    let service = DaemonService::new(config, shutdown_token.clone())
        .await
        .context("initialize daemon")?;

    let result = if cli.once {
        service.run_once().await
    } else {
        service.run().await
    };

    match &result {
        Ok(()) => info!("Nimbus daemon shut down gracefully"),
        Err(e) => error!(error = %e, "Nimbus daemon exiting with error"),
    }

    result
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_once_and_overrides() {
        let cli = Cli::parse_from([
            "nimbusd",
            "--once",
            "--sync-root",
            "/tmp/sync",
            "--config",
            "/tmp/config.yaml",
        ]);
        assert!(cli.once);
        assert_eq!(cli.sync_root.as_deref(), Some(std::path::Path::new("/tmp/sync")));
        assert_eq!(
            cli.config.as_deref(),
            Some(std::path::Path::new("/tmp/config.yaml"))
        );
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["nimbusd"]);
        assert!(!cli.once);
        assert!(!cli.verbose);
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_sync_root_override_applies() {
        let cli = Cli::parse_from(["nimbusd", "--sync-root", "/tmp/elsewhere"]);
        let mut config = Config::default();
        config.sync.root = PathBuf::from("/original");
        if let Some(root) = &cli.sync_root {
            config.sync.root = root.clone();
        }
        assert_eq!(config.sync.root, PathBuf::from("/tmp/elsewhere"));
    }
}
