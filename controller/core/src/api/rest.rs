//! HTTP client for the coordination service

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{ApiError, FrameApi, NewFrame};
use crate::device::{DeviceRecord, Session};

/// Relation expanded when fetching a frame
const FRAME_INCLUDE_FILTER: &str = r#"{"include":"current_artwork"}"#;

/// Response of `POST /users/login`
#[derive(Debug, Deserialize)]
struct LoginResponse {
    /// The access token
    id: String,
    /// Owner id; the service may send it as a number
    #[serde(rename = "userId")]
    user_id: serde_json::Value,
}

impl LoginResponse {
    fn into_session(self) -> Session {
        let user_id = match self.user_id {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        Session {
            access_token: self.id,
            user_id,
        }
    }
}

/// REST client for the coordination service
#[derive(Clone)]
pub struct RestClient {
    /// Service root, e.g. `http://localhost:8888/api`
    base_url: String,
    /// Token attached as the `access_token` query parameter
    access_token: Option<String>,
    /// HTTP client
    http_client: reqwest::Client,
}

impl RestClient {
    /// Create a client for the service at `base_url`
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into(),
            access_token: None,
            http_client,
        })
    }

    /// The service root
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Whether a token is attached
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.access_token.is_some()
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.access_token {
            Some(ref token) => request.query(&[("access_token", token)]),
            None => request,
        }
    }

    async fn decode<T: DeserializeOwned>(
        response: reqwest::Response,
        resource: &str,
    ) -> Result<T, ApiError> {
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound {
                resource: resource.to_string(),
            });
        }

        let body = response.text().await?;
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl FrameApi for RestClient {
    async fn login(&self, username: &str, password: &str) -> Result<Session, ApiError> {
        let body = serde_json::json!({
            "username": username,
            "password": password,
        });

        let response = self
            .http_client
            .post(self.url("users/login"))
            .json(&body)
            .send()
            .await?;

        let login: LoginResponse = Self::decode(response, "user").await?;
        tracing::debug!(user_id = %login.user_id, "Login accepted");
        Ok(login.into_session())
    }

    fn set_access_token(&mut self, token: Option<String>) {
        self.access_token = token;
    }

    async fn get_frame(&self, id: &str) -> Result<DeviceRecord, ApiError> {
        let request = self
            .http_client
            .get(self.url(&format!("frames/{id}")))
            .query(&[("filter", FRAME_INCLUDE_FILTER)]);

        let response = self.authorize(request).send().await?;
        Self::decode(response, &format!("frame {id}")).await
    }

    async fn create_frame(
        &self,
        user_id: &str,
        frame: &NewFrame,
    ) -> Result<DeviceRecord, ApiError> {
        let request = self
            .http_client
            .post(self.url(&format!("users/{user_id}/owned_frames")))
            .json(frame);

        let response = self.authorize(request).send().await?;
        Self::decode(response, &format!("user {user_id}")).await
    }
}
