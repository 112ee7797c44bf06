//! Daemon runtime
//!
//! Wires the core components together: connects the device, hands the
//! resolved record to the switcher task, refreshes it periodically and shuts
//! everything down on request.

use anyhow::{Context, Result};
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Duration, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use controller_core::events::{self, EventReceiver};
use controller_core::switcher::{self, SwitcherHandle};
use controller_core::{
    ArtworkSwitcher, CommandPluginSync, ControllerConfig, ControllerEvent, DeviceConnection,
    DeviceRecord, DeviceStore, HttpAssetFetcher, JsonDeviceStore, NoopPluginSync, PluginSync,
    ProcessEvent, ProcessSupervisor, RestClient,
};

/// Capacity of the controller event channel
const EVENT_BUFFER: usize = 64;

/// The running controller
pub struct FrameDaemon {
    config: ControllerConfig,
}

impl FrameDaemon {
    /// Create a daemon from validated configuration
    pub fn new(config: ControllerConfig) -> Self {
        Self { config }
    }

    /// Run until `shutdown` flips to `true`
    ///
    /// Returns an error if the device cannot be connected.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let config = self.config;
        let (event_tx, event_rx) = events::channel(EVENT_BUFFER);
        let (process_tx, process_rx) = mpsc::unbounded_channel();

        tokio::spawn(log_controller_events(event_rx));
        tokio::spawn(log_process_events(process_rx));

        // Viewer side
        let supervisor = ProcessSupervisor::new()
            .with_kill_signal(config.kill_signal)
            .with_events(process_tx);
        let fetcher = HttpAssetFetcher::new(config.asset_dir(), config.download_timeout)
            .context("Failed to create asset fetcher")?;
        let (switcher, switcher_task) =
            switcher::spawn(ArtworkSwitcher::new(supervisor, fetcher, event_tx.clone()));

        // Service side
        let store = JsonDeviceStore::in_dir(&config.state_dir);
        let device = initial_device(&store, &config.device_name).await;

        let plugin_sync: Box<dyn PluginSync> = match config.plugin_install_command {
            Some(ref template) => Box::new(CommandPluginSync::new(template.clone())),
            None => Box::new(NoopPluginSync),
        };

        let api = RestClient::new(config.api_url.clone(), config.request_timeout)
            .context("Failed to create service client")?;
        let mut connection = DeviceConnection::new(
            api,
            config.credentials()?,
            device,
            Box::new(store),
            plugin_sync,
            event_tx,
        )
        .with_default_plugins(config.default_plugins.clone());

        let resolution = match connection.connect().await {
            Ok(resolution) => resolution,
            Err(e) => {
                error!(stage = %e.stage(), error = %e, "Device connection failed");
                let _ = switcher.shutdown(false).await;
                let _ = switcher_task.await;
                return Err(e).context("Device connection failed");
            }
        };
        switcher.assign(resolution.device).await?;

        let mut refresh = config.refresh_interval.map(refresh_timer);
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                () = next_tick(&mut refresh) => {
                    refresh_device(&mut connection, &switcher).await?;
                }
            }
        }

        let end_current = !config.keep_viewer_on_exit;
        info!(end_current = end_current, "Stopping artwork switcher");
        switcher.shutdown(end_current).await?;
        switcher_task.await.context("Switcher task panicked")?;

        Ok(())
    }
}

/// Stored device record, or a fresh one named `name`
///
/// A stored record keeps its own name; `name` only applies to a frame that
/// has never been persisted.
async fn initial_device(store: &JsonDeviceStore, name: &str) -> DeviceRecord {
    match store.load().await {
        Ok(Some(device)) => {
            info!(device_id = ?device.id, path = %store.path().display(), "Loaded device record");
            if device.name != name {
                debug!(stored = %device.name, configured = %name, "Keeping stored device name");
            }
            device
        }
        Ok(None) => DeviceRecord::new(name),
        Err(e) => {
            warn!(error = %e, "Stored device record unreadable, starting fresh");
            DeviceRecord::new(name)
        }
    }
}

/// Interval whose first tick is one period from now
fn refresh_timer(period: Duration) -> Interval {
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Next refresh tick, or never when refreshing is disabled
async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Re-fetch the record and pass it on; a failed fetch keeps the current state
async fn refresh_device(
    connection: &mut DeviceConnection<RestClient>,
    switcher: &SwitcherHandle,
) -> Result<()> {
    match connection.refresh().await {
        Ok(resolution) => {
            debug!(artwork_id = ?resolution.device.artwork_id(), "Device record refreshed");
            switcher.assign(resolution.device).await?;
        }
        Err(e) => warn!(error = %e, "Device refresh failed"),
    }
    Ok(())
}

async fn log_controller_events(mut rx: EventReceiver) {
    while let Some(event) = rx.recv().await {
        match event {
            ControllerEvent::Connected { device } => {
                info!(device_id = ?device.id, name = %device.name, "Frame connected");
            }
            ControllerEvent::DeviceUpdated { device } => {
                debug!(device_id = ?device.id, "Frame record updated");
            }
            ControllerEvent::SideEffectFailed { stage, error } => {
                warn!(stage = %stage, error = %error, "Post-connection step failed");
            }
            ControllerEvent::ConnectionFailed { stage, error } => {
                error!(stage = %stage, error = %error, "Connection failed");
            }
            ControllerEvent::ArtworkChanged { artwork_id, pid } => {
                info!(artwork_id = %artwork_id, pid = pid, "Now showing");
            }
            ControllerEvent::ArtworkCleared { artwork_id } => {
                info!(artwork_id = %artwork_id, "Frame cleared");
            }
            ControllerEvent::SwitchFailed { artwork_id, error } => {
                error!(artwork_id = %artwork_id, error = %error, "Could not show artwork");
            }
        }
    }
}

async fn log_process_events(mut rx: mpsc::UnboundedReceiver<ProcessEvent>) {
    while let Some(event) = rx.recv().await {
        if let ProcessEvent::Exited {
            pid,
            exit_code: Some(code),
        } = event
        {
            if code != 0 {
                warn!(pid = pid, exit_code = code, "Viewer exited with failure");
            }
        }
    }
}
