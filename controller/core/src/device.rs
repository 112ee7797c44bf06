//! Device and Artwork Records
//!
//! Types describing the frame as the coordination service knows it. These are
//! the shapes exchanged over the wire and persisted locally, so field names
//! follow the remote JSON exactly.
//!
//! # Ownership
//!
//! - [`DeviceRecord`] and [`Credentials`] are owned by the
//!   [`DeviceConnection`](crate::connection::DeviceConnection) and mutated in
//!   place as registration and sync proceed.
//! - [`ArtworkRecord`] values are replaced wholesale whenever the device
//!   record is refreshed; they are never edited.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Free-form device settings as delivered by the service
pub type Settings = serde_json::Map<String, serde_json::Value>;

/// Plugin name to version requirement
pub type PluginMap = BTreeMap<String, String>;

/// How an artwork is rendered
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtworkFormat {
    /// Viewer command; the asset location is appended as the last argument
    pub start_command: String,
    /// Shell command run when the artwork is taken off the frame
    #[serde(default)]
    pub end_command: Option<String>,
    /// Whether the asset must be downloaded before the viewer starts
    #[serde(default)]
    pub download: bool,
}

/// A piece of content assigned to the frame
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtworkRecord {
    /// Remote identifier, used to detect a change of assignment
    pub id: String,
    /// Location of the asset
    pub url: String,
    /// Rendering instructions
    pub format: ArtworkFormat,
}

impl ArtworkRecord {
    /// Create an artwork record
    pub fn new(id: impl Into<String>, url: impl Into<String>, format: ArtworkFormat) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            format,
        }
    }

    /// Whether `other` names the same artwork
    #[must_use]
    pub fn same_as(&self, other: &ArtworkRecord) -> bool {
        self.id == other.id
    }
}

/// The frame's record on the coordination service
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Remote identifier; `None` until the frame is registered
    #[serde(default)]
    pub id: Option<String>,
    /// Human readable frame name
    pub name: String,
    /// Service-managed settings
    #[serde(default)]
    pub settings: Settings,
    /// Extensions the frame should have installed
    #[serde(default)]
    pub plugins: PluginMap,
    /// Artwork currently assigned to the frame
    #[serde(default)]
    pub current_artwork: Option<ArtworkRecord>,
}

impl DeviceRecord {
    /// Create an unregistered record with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Whether the frame has a remote record
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.id.is_some()
    }

    /// Id of the assigned artwork, if any
    #[must_use]
    pub fn artwork_id(&self) -> Option<&str> {
        self.current_artwork.as_ref().map(|a| a.id.as_str())
    }
}

/// Login material for the coordination service
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Account name
    pub username: String,
    /// Account password
    pub password: String,
    /// Token issued by a successful login
    #[serde(default)]
    pub access_token: Option<String>,
}

impl Credentials {
    /// Create credentials without a token
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            access_token: None,
        }
    }
}

// Keep secrets out of logs.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// An authenticated session
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    /// Token attached to every request
    pub access_token: String,
    /// Account that owns newly registered frames
    pub user_id: String,
}
