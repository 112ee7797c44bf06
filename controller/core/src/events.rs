//! Controller Events
//!
//! Typed notifications emitted by the core. Whoever owns the receiving end
//! (the daemon, a pub/sub bridge, a test) decides what to do with them; the
//! core only sends and never waits for a reply.
//!
//! # Design Philosophy
//!
//! Components don't inherit emitter behaviour. Each one is handed an
//! [`EventSender`] and reports what happened through it. A closed channel is
//! not an error for the sender.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::device::DeviceRecord;

/// Stage of the connection pipeline a failure belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionStage {
    /// Exchanging credentials for a token
    Authenticate,
    /// Looking up the existing remote record
    Resolve,
    /// Creating a new remote record
    Register,
    /// Re-fetching the record after connecting
    Refresh,
    /// Writing the device record locally
    Persist,
    /// Installing the device's plugins
    PluginSync,
}

impl std::fmt::Display for ConnectionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Authenticate => "authenticate",
            Self::Resolve => "resolve",
            Self::Register => "register",
            Self::Refresh => "refresh",
            Self::Persist => "persist",
            Self::PluginSync => "plugin-sync",
        };
        f.write_str(label)
    }
}

/// Events from the controller core
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ControllerEvent {
    // ============================================
    // Connection Events
    // ============================================
    /// The device record was resolved or registered
    Connected {
        /// The authoritative record
        device: DeviceRecord,
    },

    /// A refresh delivered a new version of the record
    DeviceUpdated {
        /// The refreshed record
        device: DeviceRecord,
    },

    /// A side effect after resolve/register failed; the connection stands
    SideEffectFailed {
        /// Which side effect
        stage: ConnectionStage,
        /// Error description
        error: String,
    },

    /// The connection attempt failed and cannot continue
    ConnectionFailed {
        /// Stage that failed
        stage: ConnectionStage,
        /// Error description
        error: String,
    },

    // ============================================
    // Artwork Events
    // ============================================
    /// A new artwork is on the frame
    ArtworkChanged {
        /// Id of the artwork now displayed
        artwork_id: String,
        /// Pid of its viewer
        pid: u32,
    },

    /// The frame no longer displays anything
    ArtworkCleared {
        /// Id of the artwork that was taken down
        artwork_id: String,
    },

    /// A switch did not complete; the previous artwork is still current
    SwitchFailed {
        /// Artwork that could not be shown
        artwork_id: String,
        /// Error description
        error: String,
    },
}

/// Sending half of the event channel
pub type EventSender = mpsc::Sender<ControllerEvent>;

/// Receiving half of the event channel
pub type EventReceiver = mpsc::Receiver<ControllerEvent>;

/// Create an event channel with the given capacity
#[must_use]
pub fn channel(capacity: usize) -> (EventSender, EventReceiver) {
    mpsc::channel(capacity)
}

/// Send an event, ignoring a closed receiver
pub(crate) async fn emit(tx: &EventSender, event: ControllerEvent) {
    if tx.send(event).await.is_err() {
        tracing::trace!("Event receiver dropped");
    }
}
