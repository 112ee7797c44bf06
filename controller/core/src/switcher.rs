//! Artwork Switcher
//!
//! Takes the artwork assigned to the device and puts it on the frame.
//!
//! # Hand-off Pipeline
//!
//! ```text
//! new artwork ──> [download?] ──> fetch asset ──┐
//!                      │                        v
//!                      └──────────────> viewer command
//!                                               │
//!   outgoing artwork: end command ──> kill ─────┤
//!                                               v
//!                                         start viewer ──> current = new
//! ```
//!
//! The asset is prepared before the outgoing viewer is touched, so a failed
//! download leaves the frame as it was. The end command is dispatched
//! without waiting for it.
//!
//! # Single Flight
//!
//! [`ArtworkSwitcher`] takes `&mut self` for every switch. The daemon moves it
//! into one task with [`spawn`] and talks to it through a [`SwitcherHandle`].
//! Assignments that arrive while a switch is in flight are coalesced: only
//! the newest is applied once the running switch finishes.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::assets::{content_addressed_name, url_basename, AssetFetcher, FetchError};
use crate::device::{ArtworkRecord, DeviceRecord};
use crate::events::{emit, ControllerEvent, EventSender};
use crate::process::{ProcessControl, ProcessError};

/// Queue depth of the switcher task
const COMMAND_BUFFER: usize = 32;

/// Errors switching artwork
#[derive(Debug, thiserror::Error)]
pub enum SwitchError {
    /// The asset could not be downloaded; nothing was changed
    #[error("failed to fetch asset for artwork {artwork_id}: {source}")]
    Fetch {
        /// Artwork being switched to
        artwork_id: String,
        /// Underlying fetch error
        #[source]
        source: FetchError,
    },

    /// The viewer could not be started
    #[error("failed to start viewer for artwork {artwork_id}: {source}")]
    Start {
        /// Artwork being switched to
        artwork_id: String,
        /// Underlying process error
        #[source]
        source: ProcessError,
    },
}

impl SwitchError {
    /// Artwork the failed switch was aiming for
    #[must_use]
    pub fn artwork_id(&self) -> &str {
        match self {
            Self::Fetch { artwork_id, .. } | Self::Start { artwork_id, .. } => artwork_id,
        }
    }
}

/// Puts artworks on the frame
pub struct ArtworkSwitcher<P: ProcessControl, F: AssetFetcher> {
    /// Viewer process control
    processes: P,
    /// Asset downloader
    fetcher: F,
    /// Artwork currently displayed
    current: Option<ArtworkRecord>,
    /// Event channel
    event_tx: EventSender,
}

impl<P: ProcessControl, F: AssetFetcher> ArtworkSwitcher<P, F> {
    /// Create a switcher with nothing displayed
    pub fn new(processes: P, fetcher: F, event_tx: EventSender) -> Self {
        Self {
            processes,
            fetcher,
            current: None,
            event_tx,
        }
    }

    /// Artwork currently displayed
    pub fn current(&self) -> Option<&ArtworkRecord> {
        self.current.as_ref()
    }

    /// Process control in use
    pub fn processes(&self) -> &P {
        &self.processes
    }

    /// Replace the displayed artwork with `artwork`
    ///
    /// Returns the pid of the new viewer.
    ///
    /// # Errors
    ///
    /// [`SwitchError::Fetch`] leaves everything untouched.
    /// [`SwitchError::Start`] comes after the outgoing viewer was ended, so
    /// the frame is left empty and `current` is `None`.
    pub async fn switch_to(&mut self, artwork: ArtworkRecord) -> Result<u32, SwitchError> {
        match self.hand_off(&artwork).await {
            Ok(pid) => {
                info!(artwork_id = %artwork.id, pid = pid, "Artwork switched");
                emit(
                    &self.event_tx,
                    ControllerEvent::ArtworkChanged {
                        artwork_id: artwork.id.clone(),
                        pid,
                    },
                )
                .await;
                self.current = Some(artwork);
                Ok(pid)
            }
            Err(e) => {
                warn!(artwork_id = %artwork.id, error = %e, "Artwork switch failed");
                emit(
                    &self.event_tx,
                    ControllerEvent::SwitchFailed {
                        artwork_id: artwork.id.clone(),
                        error: e.to_string(),
                    },
                )
                .await;
                Err(e)
            }
        }
    }

    /// Bring the frame in line with `device`
    ///
    /// Switches only when the assigned artwork differs from the displayed
    /// one; an unassigned record clears the frame.
    ///
    /// # Errors
    ///
    /// Propagates [`SwitchError`] from [`switch_to`](Self::switch_to).
    pub async fn apply_device(&mut self, device: &DeviceRecord) -> Result<(), SwitchError> {
        let displayed = self.current.as_ref().map(|a| a.id.clone());

        match (&device.current_artwork, displayed) {
            (Some(assigned), Some(displayed)) if assigned.id == displayed => {
                debug!(artwork_id = %displayed, "Artwork unchanged");
                Ok(())
            }
            (Some(assigned), _) => self.switch_to(assigned.clone()).await.map(|_| ()),
            (None, Some(_)) => {
                self.clear().await;
                Ok(())
            }
            (None, None) => Ok(()),
        }
    }

    /// End the displayed artwork and leave the frame empty
    pub async fn clear(&mut self) {
        let Some(outgoing) = self.current.take() else {
            return;
        };

        self.end(&outgoing);
        info!(artwork_id = %outgoing.id, "Artwork cleared");
        emit(
            &self.event_tx,
            ControllerEvent::ArtworkCleared {
                artwork_id: outgoing.id,
            },
        )
        .await;
    }

    /// Prepare the viewer command, retire the outgoing artwork, start the new one
    async fn hand_off(&mut self, artwork: &ArtworkRecord) -> Result<u32, SwitchError> {
        let command = Self::viewer_command(&self.fetcher, artwork).await?;

        if let Some(outgoing) = self.current.take() {
            self.end(&outgoing);
        }

        self.processes
            .start(&command)
            .map_err(|source| SwitchError::Start {
                artwork_id: artwork.id.clone(),
                source,
            })
    }

    /// Viewer command line, downloading the asset first if required
    async fn viewer_command(fetcher: &F, artwork: &ArtworkRecord) -> Result<String, SwitchError> {
        let format = &artwork.format;

        if !format.download {
            return Ok(format!("{} {}", format.start_command, artwork.url));
        }

        let name = content_addressed_name(&artwork.id, &url_basename(&artwork.url));
        debug!(artwork_id = %artwork.id, url = %artwork.url, name = %name, "Fetching asset");

        let path = fetcher
            .fetch(&artwork.url, &name)
            .await
            .map_err(|source| SwitchError::Fetch {
                artwork_id: artwork.id.clone(),
                source,
            })?;

        Ok(format!("{} {}", format.start_command, path.display()))
    }

    /// Dispatch the end command of `outgoing` and kill its viewer
    fn end(&mut self, outgoing: &ArtworkRecord) {
        if let Some(ref end_command) = outgoing.format.end_command {
            if let Err(e) = self.processes.exec_detached(end_command) {
                warn!(
                    artwork_id = %outgoing.id,
                    command = %end_command,
                    error = %e,
                    "End command failed to start"
                );
            }
        }
        self.processes.kill_current();
    }

    /// Serve commands until shutdown or until every handle is dropped
    pub async fn run(mut self, mut rx: mpsc::Receiver<SwitchCommand>) {
        while let Some(first) = rx.recv().await {
            match coalesce(first, &mut rx) {
                SwitchCommand::Assign(device) => {
                    // Failures were already reported as events
                    let _ = self.apply_device(&device).await;
                }
                SwitchCommand::Shutdown { end_current } => {
                    if end_current {
                        self.clear().await;
                    }
                    info!(end_current = end_current, "Artwork switcher stopped");
                    return;
                }
            }
        }
        debug!("All switcher handles dropped");
    }
}

/// Request to the switcher task
#[derive(Clone, Debug)]
pub enum SwitchCommand {
    /// Apply the artwork assignment of this record
    Assign(DeviceRecord),
    /// Stop serving, optionally ending the displayed artwork
    Shutdown {
        /// Whether to end the displayed artwork first
        end_current: bool,
    },
}

/// Keep only the newest queued command; a shutdown supersedes assignments
fn coalesce(first: SwitchCommand, rx: &mut mpsc::Receiver<SwitchCommand>) -> SwitchCommand {
    let mut latest = first;
    let mut dropped = 0usize;

    while !matches!(latest, SwitchCommand::Shutdown { .. }) {
        match rx.try_recv() {
            Ok(next) => {
                latest = next;
                dropped += 1;
            }
            Err(_) => break,
        }
    }

    if dropped > 0 {
        debug!(dropped = dropped, "Superseded pending assignments");
    }
    latest
}

/// The switcher task is gone
#[derive(Debug, thiserror::Error)]
#[error("artwork switcher has stopped")]
pub struct SwitcherStopped;

/// Sends commands to a switcher running in its own task
#[derive(Clone, Debug)]
pub struct SwitcherHandle {
    tx: mpsc::Sender<SwitchCommand>,
}

impl SwitcherHandle {
    /// Queue the artwork assignment of `device`
    ///
    /// # Errors
    ///
    /// Returns [`SwitcherStopped`] if the task has exited.
    pub async fn assign(&self, device: DeviceRecord) -> Result<(), SwitcherStopped> {
        self.tx
            .send(SwitchCommand::Assign(device))
            .await
            .map_err(|_| SwitcherStopped)
    }

    /// Ask the task to stop
    ///
    /// # Errors
    ///
    /// Returns [`SwitcherStopped`] if the task has already exited.
    pub async fn shutdown(&self, end_current: bool) -> Result<(), SwitcherStopped> {
        self.tx
            .send(SwitchCommand::Shutdown { end_current })
            .await
            .map_err(|_| SwitcherStopped)
    }
}

/// Move `switcher` into its own task
pub fn spawn<P, F>(switcher: ArtworkSwitcher<P, F>) -> (SwitcherHandle, JoinHandle<()>)
where
    P: ProcessControl + 'static,
    F: AssetFetcher + 'static,
{
    let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
    let task = tokio::spawn(switcher.run(rx));
    (SwitcherHandle { tx }, task)
}
