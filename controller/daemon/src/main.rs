//! Frame Daemon - Keeps a Display Frame on Its Assigned Artwork
//!
//! Connects the frame to its coordination service, starts the viewer for the
//! assigned artwork and keeps it current.
//!
//! # Usage
//!
//! ```bash
//! # Start with the default config file
//! frame-daemon
//!
//! # With config file
//! frame-daemon --config /etc/frame-controller/controller.toml
//!
//! # Separate state directory
//! frame-daemon --state-dir /var/lib/frame-controller
//!
//! # Verbose logging
//! RUST_LOG=debug frame-daemon
//! ```
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: Graceful shutdown; the current artwork is ended
//!   unless `keep_viewer_on_exit` is set

mod runtime;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info};

use controller_core::config::{self, ConfigOverrides};

use runtime::FrameDaemon;

/// Frame Daemon - keeps a display frame on its assigned artwork
#[derive(Parser, Debug)]
#[command(name = "frame-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "FRAME_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory for the persisted device record
    #[arg(short = 's', long, value_name = "DIR")]
    state_dir: Option<PathBuf>,

    /// Coordination service URL
    #[arg(long, value_name = "URL")]
    api_url: Option<String>,

    /// Name used when registering the frame
    ///
    /// Only applies to first registration; a persisted record keeps its name.
    #[arg(short = 'n', long, value_name = "NAME")]
    name: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "FRAME_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if let Some(ref dir) = self.state_dir {
            overrides = overrides.with_state_dir(dir.clone());
        }
        if let Some(ref url) = self.api_url {
            overrides = overrides.with_api_url(url.clone());
        }
        if let Some(ref name) = self.name {
            overrides = overrides.with_device_name(name.clone());
        }
        overrides
    }
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "frame_daemon={level},controller_core={level}"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging first
    init_logging(&args.log_level);

    info!("Frame daemon starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("PID: {}", std::process::id());

    let config_path = args.config.clone().or_else(config::default_config_path);
    let mut config =
        config::load_config_from_path(config_path).context("Failed to load configuration")?;
    args.overrides().apply(&mut config);
    config.validate().context("Invalid configuration")?;

    info!(
        source = %config.source(),
        api_url = %config.api_url,
        state_dir = %config.state_dir.display(),
        "Configuration loaded"
    );

    // Setup signal handlers
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, initiating shutdown"),
            _ = sigint.recv() => info!("Received SIGINT, initiating shutdown"),
        }
        let _ = shutdown_tx.send(true);
    });

    let result = FrameDaemon::new(config).run(shutdown_rx).await;

    match result {
        Ok(()) => {
            info!("Frame daemon stopped cleanly");
            Ok(())
        }
        Err(e) => {
            error!(error = %format!("{e:#}"), "Daemon stopped with error");
            Err(e)
        }
    }
}
