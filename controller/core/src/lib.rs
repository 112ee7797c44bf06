//! Controller Core - Headless Frame Controller
//!
//! This crate keeps a display device ("frame") showing the artwork its
//! coordination service assigns to it. It launches and tears down external
//! viewer processes and keeps the local device record in sync with the
//! remote one.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                  Coordination Service (REST)                  │
//! └───────────────────────────────┬───────────────────────────────┘
//!                                 │ FrameApi
//! ┌───────────────────────────────┼───────────────────────────────┐
//! │                        CONTROLLER CORE                        │
//! │  ┌────────────────────────────┴────────────────────────────┐  │
//! │  │                    DeviceConnection                     │  │
//! │  │  authenticate ─> resolve ─┬─> Connected                 │  │
//! │  │                           └─> register ─> Connected     │  │
//! │  │  ┌─────────────┐  ┌─────────────┐                       │  │
//! │  │  │ DeviceStore │  │ PluginSync  │   (side effects)      │  │
//! │  │  └─────────────┘  └─────────────┘                       │  │
//! │  └────────────────────────────┬────────────────────────────┘  │
//! │                      DeviceRecord                             │
//! │  ┌────────────────────────────┴────────────────────────────┐  │
//! │  │                    ArtworkSwitcher                      │  │
//! │  │  ┌──────────────┐            ┌───────────────────────┐  │  │
//! │  │  │ AssetFetcher │            │ ProcessSupervisor     │  │  │
//! │  │  │ (download)   │            │ (process groups)      │  │  │
//! │  │  └──────────────┘            └───────────────────────┘  │  │
//! │  └─────────────────────────────────────────────────────────┘  │
//! │                ControllerEvent ──> mpsc channel               │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`DeviceConnection`]: Authentication and record resolution state machine
//! - [`ArtworkSwitcher`]: Hand-off from one artwork to the next
//! - [`ProcessSupervisor`]: Tracks viewer processes and kills their groups
//! - [`ControllerEvent`]: Notifications for whoever owns the event channel
//!
//! # Quick Start
//!
//! ```ignore
//! use std::time::Duration;
//! use controller_core::{
//!     events, switcher, ArtworkSwitcher, Credentials, DeviceConnection, DeviceRecord,
//!     HttpAssetFetcher, JsonDeviceStore, NoopPluginSync, ProcessSupervisor, RestClient,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let (tx, mut rx) = events::channel(64);
//!
//!     let api = RestClient::new("http://localhost:8888/api", Duration::from_secs(30))?;
//!     let mut connection = DeviceConnection::new(
//!         api,
//!         Credentials::new("alice", "secret"),
//!         DeviceRecord::new("Living Room"),
//!         Box::new(JsonDeviceStore::in_dir("/var/lib/frame")),
//!         Box::new(NoopPluginSync),
//!         tx.clone(),
//!     );
//!
//!     let fetcher = HttpAssetFetcher::new("/var/cache/frame", Duration::from_secs(300))?;
//!     let (handle, _task) =
//!         switcher::spawn(ArtworkSwitcher::new(ProcessSupervisor::new(), fetcher, tx));
//!
//!     let resolution = connection.connect().await?;
//!     handle.assign(resolution.device).await?;
//!
//!     while let Some(event) = rx.recv().await {
//!         println!("{event:?}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`device`]: Device, artwork and credential records
//! - [`process`]: Viewer process supervision
//! - [`assets`]: Asset download and content-addressed naming
//! - [`api`]: Coordination service client
//! - [`store`]: Local persistence of the device record
//! - [`plugins`]: Plugin installation
//! - [`events`]: Controller events
//! - [`connection`]: Device connection state machine
//! - [`switcher`]: Artwork switching
//! - [`config`]: TOML and environment configuration

#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod api;
pub mod assets;
pub mod config;
pub mod connection;
pub mod device;
pub mod events;
pub mod plugins;
pub mod process;
pub mod store;
pub mod switcher;

// Re-exports for convenience
pub use api::{ApiError, FrameApi, NewFrame, RestClient};
pub use assets::{content_addressed_name, url_basename, AssetFetcher, FetchError, HttpAssetFetcher};
pub use config::{ConfigError, ConfigOverrides, ConfigSource, ControllerConfig};
pub use connection::{
    ConnectionError, ConnectionState, DeviceConnection, Resolution, ResolvePath, SideEffectFailure,
};
pub use device::{ArtworkFormat, ArtworkRecord, Credentials, DeviceRecord, PluginMap, Session};
pub use events::{ConnectionStage, ControllerEvent, EventReceiver, EventSender};
pub use plugins::{CommandPluginSync, NoopPluginSync, PluginSync};
pub use process::{ProcessControl, ProcessError, ProcessEvent, ProcessRecord, ProcessSupervisor};
pub use store::{DeviceStore, JsonDeviceStore, MemoryDeviceStore, StoreError};
pub use switcher::{ArtworkSwitcher, SwitchCommand, SwitchError, SwitcherHandle, SwitcherStopped};
