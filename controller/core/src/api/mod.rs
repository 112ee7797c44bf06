//! Coordination Service API
//!
//! Access to the remote service that owns frame records. The
//! [`DeviceConnection`](crate::connection::DeviceConnection) only talks to
//! the service through the [`FrameApi`] trait; [`RestClient`] is the HTTP
//! implementation.
//!
//! # Endpoints
//!
//! - `POST /users/login` - exchange credentials for an access token
//! - `GET /frames/{id}` - fetch a frame with its current artwork
//! - `POST /users/{user_id}/owned_frames` - register a new frame

mod rest;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::device::{DeviceRecord, PluginMap, Session};

pub use rest::RestClient;

/// Errors talking to the coordination service
#[derive(Debug, Error)]
pub enum ApiError {
    /// Transport-level failure
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The requested record does not exist
    #[error("{resource} not found")]
    NotFound {
        /// What was looked up
        resource: String,
    },

    /// The service answered with a non-success status
    #[error("service returned HTTP {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body, for diagnostics
        body: String,
    },

    /// The response body did not have the expected shape
    #[error("unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ApiError {
    /// Whether this error means the record is missing
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Body of a frame registration request
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewFrame {
    /// Frame name
    pub name: String,
    /// Plugins the new frame starts with
    pub plugins: PluginMap,
}

/// Operations the controller needs from the coordination service
#[async_trait]
pub trait FrameApi: Send + Sync {
    /// Exchange username and password for a session
    async fn login(&self, username: &str, password: &str) -> Result<Session, ApiError>;

    /// Attach `token` to every subsequent request
    fn set_access_token(&mut self, token: Option<String>);

    /// Fetch the frame record with the given id
    async fn get_frame(&self, id: &str) -> Result<DeviceRecord, ApiError>;

    /// Register a new frame owned by `user_id`
    async fn create_frame(&self, user_id: &str, frame: &NewFrame)
        -> Result<DeviceRecord, ApiError>;
}
