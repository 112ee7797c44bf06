//! Device Connection
//!
//! Establishes a session with the coordination service and brings the local
//! device record to parity with the remote one.
//!
//! # State Machine
//!
//! ```text
//! Disconnected ──> Authenticating ──> Resolving ──────────────> Connected
//!                        │                │                        ^
//!                        │                └──> Registering ────────┘
//!                        │                          │
//!                        └──────────> Failed <──────┘
//! ```
//!
//! `Resolving` looks the frame up by id when it has one. Any lookup failure,
//! "not found" included, falls through to `Registering`, which creates a new
//! record. Authentication and registration failures are terminal for the
//! attempt; there is no retry loop.
//!
//! After a record is resolved or registered it is persisted and its plugins
//! are synced. Those side effects don't roll back the transition, but their
//! failures are reported in the [`Resolution`] and as events.

use tracing::{debug, info, warn};

use crate::api::{ApiError, FrameApi, NewFrame};
use crate::device::{Credentials, DeviceRecord, PluginMap, Session};
use crate::events::{emit, ConnectionStage, ControllerEvent, EventSender};
use crate::plugins::PluginSync;
use crate::store::DeviceStore;

/// Connection lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Nothing attempted yet
    Disconnected,
    /// Logging in
    Authenticating,
    /// Looking up the existing record
    Resolving,
    /// Creating a new record
    Registering,
    /// Record resolved; the device is in sync
    Connected,
    /// The last attempt failed
    Failed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::Authenticating => "authenticating",
            Self::Resolving => "resolving",
            Self::Registering => "registering",
            Self::Connected => "connected",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Fatal connection errors
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Credentials were rejected or the service was unreachable
    #[error("authenticate stage failed: {source}")]
    Authentication {
        /// Underlying API error
        #[source]
        source: ApiError,
    },

    /// A new record could not be created
    #[error("register stage failed: {source}")]
    Registration {
        /// Underlying API error
        #[source]
        source: ApiError,
    },

    /// Re-fetching the record failed
    #[error("refresh stage failed: {source}")]
    Refresh {
        /// Underlying API error
        #[source]
        source: ApiError,
    },

    /// The operation needs a state the connection is not in
    #[error("cannot {operation} while {state}")]
    InvalidState {
        /// What was attempted
        operation: &'static str,
        /// Current state
        state: ConnectionState,
    },
}

impl ConnectionError {
    /// Stage the error belongs to
    #[must_use]
    pub fn stage(&self) -> ConnectionStage {
        match self {
            Self::Authentication { .. } => ConnectionStage::Authenticate,
            Self::Registration { .. } => ConnectionStage::Register,
            Self::Refresh { .. } | Self::InvalidState { .. } => ConnectionStage::Refresh,
        }
    }
}

/// How the record was obtained
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResolvePath {
    /// Existing record fetched by id
    Fetched,
    /// New record created
    Registered,
}

/// A side effect that failed after the record was resolved
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SideEffectFailure {
    /// Which side effect
    pub stage: ConnectionStage,
    /// Error description
    pub error: String,
}

/// Outcome of a successful resolve or register
#[derive(Clone, Debug)]
pub struct Resolution {
    /// The authoritative record
    pub device: DeviceRecord,
    /// How it was obtained
    pub path: ResolvePath,
    /// Side effects that did not succeed
    pub side_effect_failures: Vec<SideEffectFailure>,
}

/// Keeps the local device record in sync with the service
pub struct DeviceConnection<A: FrameApi> {
    /// Service client
    api: A,
    /// Login material; the token is filled in by `authenticate`
    credentials: Credentials,
    /// Local copy of the device record
    device: DeviceRecord,
    /// Plugins a newly registered frame starts with
    default_plugins: PluginMap,
    /// Persistence for the record
    store: Box<dyn DeviceStore>,
    /// Plugin installer
    plugin_sync: Box<dyn PluginSync>,
    /// Event channel
    event_tx: EventSender,
    /// Current state
    state: ConnectionState,
    /// Session from the last successful login
    session: Option<Session>,
}

impl<A: FrameApi> DeviceConnection<A> {
    /// Create a connection for `device`
    pub fn new(
        api: A,
        credentials: Credentials,
        device: DeviceRecord,
        store: Box<dyn DeviceStore>,
        plugin_sync: Box<dyn PluginSync>,
        event_tx: EventSender,
    ) -> Self {
        Self {
            api,
            credentials,
            device,
            default_plugins: PluginMap::new(),
            store,
            plugin_sync,
            event_tx,
            state: ConnectionState::Disconnected,
            session: None,
        }
    }

    /// Plugins a newly registered frame starts with
    #[must_use]
    pub fn with_default_plugins(mut self, plugins: PluginMap) -> Self {
        self.default_plugins = plugins;
        self
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Local device record
    pub fn device(&self) -> &DeviceRecord {
        &self.device
    }

    /// Credentials, including the token once authenticated
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Session from the last successful login
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Service client
    pub fn api(&self) -> &A {
        &self.api
    }

    /// Authenticate, then resolve or register the device
    ///
    /// On success the connection is `Connected` and a
    /// [`ControllerEvent::Connected`] event carries the record.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error; the connection is then `Failed`.
    pub async fn connect(&mut self) -> Result<Resolution, ConnectionError> {
        let result = match self.authenticate().await {
            Ok(session) => self.resolve(&session).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(resolution) => {
                self.state = ConnectionState::Connected;
                info!(
                    device_id = ?resolution.device.id,
                    path = ?resolution.path,
                    "Device connected"
                );
                emit(
                    &self.event_tx,
                    ControllerEvent::Connected {
                        device: resolution.device.clone(),
                    },
                )
                .await;
                Ok(resolution)
            }
            Err(e) => {
                self.state = ConnectionState::Failed;
                emit(
                    &self.event_tx,
                    ControllerEvent::ConnectionFailed {
                        stage: e.stage(),
                        error: e.to_string(),
                    },
                )
                .await;
                Err(e)
            }
        }
    }

    /// Exchange credentials for a session
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Authentication`]; the state becomes `Failed`.
    pub async fn authenticate(&mut self) -> Result<Session, ConnectionError> {
        self.state = ConnectionState::Authenticating;
        debug!(username = %self.credentials.username, "Authenticating");

        let session = match self
            .api
            .login(&self.credentials.username, &self.credentials.password)
            .await
        {
            Ok(session) => session,
            Err(source) => {
                self.state = ConnectionState::Failed;
                return Err(ConnectionError::Authentication { source });
            }
        };

        self.credentials.access_token = Some(session.access_token.clone());
        self.api.set_access_token(Some(session.access_token.clone()));
        self.session = Some(session.clone());

        info!(user_id = %session.user_id, "Authenticated");
        Ok(session)
    }

    /// Fetch the record by id, registering a new one if that is impossible
    ///
    /// Without an id no lookup is attempted.
    ///
    /// # Errors
    ///
    /// Only registration failures are returned.
    pub async fn resolve(&mut self, session: &Session) -> Result<Resolution, ConnectionError> {
        self.state = ConnectionState::Resolving;

        let Some(id) = self.device.id.clone() else {
            info!("Device has no id, registering");
            return self.register(session).await;
        };

        match self.api.get_frame(&id).await {
            Ok(record) => {
                info!(device_id = %id, "Device record fetched");
                Ok(self.adopt(record, ResolvePath::Fetched).await)
            }
            Err(e) => {
                if e.is_not_found() {
                    info!(device_id = %id, "Device record not found, registering");
                } else {
                    warn!(device_id = %id, error = %e, "Device lookup failed, registering");
                }
                self.register(session).await
            }
        }
    }

    /// Create a new remote record from the local name and default plugins
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Registration`]; the state becomes `Failed`.
    pub async fn register(&mut self, session: &Session) -> Result<Resolution, ConnectionError> {
        self.state = ConnectionState::Registering;

        let new_frame = NewFrame {
            name: self.device.name.clone(),
            plugins: self.default_plugins.clone(),
        };

        match self.api.create_frame(&session.user_id, &new_frame).await {
            Ok(record) => {
                info!(device_id = ?record.id, name = %record.name, "Device registered");
                Ok(self.adopt(record, ResolvePath::Registered).await)
            }
            Err(source) => {
                self.state = ConnectionState::Failed;
                Err(ConnectionError::Registration { source })
            }
        }
    }

    /// Re-fetch the record of a connected device
    ///
    /// # Errors
    ///
    /// Fails when not connected or when the lookup fails. A failed refresh
    /// leaves the connection `Connected` with the previous record.
    pub async fn refresh(&mut self) -> Result<Resolution, ConnectionError> {
        let id = match (self.state, self.device.id.clone()) {
            (ConnectionState::Connected, Some(id)) => id,
            (state, _) => {
                return Err(ConnectionError::InvalidState {
                    operation: "refresh",
                    state,
                })
            }
        };

        let record = self
            .api
            .get_frame(&id)
            .await
            .map_err(|source| ConnectionError::Refresh { source })?;

        let resolution = self.adopt(record, ResolvePath::Fetched).await;
        emit(
            &self.event_tx,
            ControllerEvent::DeviceUpdated {
                device: resolution.device.clone(),
            },
        )
        .await;
        Ok(resolution)
    }

    /// Replace the local record and run the side effects
    async fn adopt(&mut self, record: DeviceRecord, path: ResolvePath) -> Resolution {
        self.device = record;
        let mut failures = Vec::new();

        if let Err(e) = self.store.save(&self.device).await {
            failures.push(SideEffectFailure {
                stage: ConnectionStage::Persist,
                error: e.to_string(),
            });
        }

        if let Err(e) = self.plugin_sync.sync(&self.device.plugins).await {
            failures.push(SideEffectFailure {
                stage: ConnectionStage::PluginSync,
                error: format!("{e:#}"),
            });
        }

        for failure in &failures {
            warn!(stage = %failure.stage, error = %failure.error, "Side effect failed");
            emit(
                &self.event_tx,
                ControllerEvent::SideEffectFailed {
                    stage: failure.stage,
                    error: failure.error.clone(),
                },
            )
            .await;
        }

        Resolution {
            device: self.device.clone(),
            path,
            side_effect_failures: failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::*;
    use crate::device::{ArtworkFormat, ArtworkRecord};
    use crate::events::{self, EventReceiver};
    use crate::plugins::NoopPluginSync;
    use crate::store::{MemoryDeviceStore, StoreError};

    /// Scripted service: records calls, answers from queues
    #[derive(Clone, Default)]
    struct ScriptedApi {
        calls: Arc<Mutex<Vec<String>>>,
        login: Arc<Mutex<VecDeque<Result<Session, ApiError>>>>,
        get: Arc<Mutex<VecDeque<Result<DeviceRecord, ApiError>>>>,
        create: Arc<Mutex<VecDeque<Result<DeviceRecord, ApiError>>>>,
        registered: Arc<Mutex<Vec<NewFrame>>>,
        token: Arc<Mutex<Option<String>>>,
    }

    impl ScriptedApi {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl FrameApi for ScriptedApi {
        async fn login(&self, username: &str, _password: &str) -> Result<Session, ApiError> {
            self.calls.lock().unwrap().push(format!("login {username}"));
            self.login.lock().unwrap().pop_front().unwrap()
        }

        fn set_access_token(&mut self, token: Option<String>) {
            *self.token.lock().unwrap() = token;
        }

        async fn get_frame(&self, id: &str) -> Result<DeviceRecord, ApiError> {
            self.calls.lock().unwrap().push(format!("get {id}"));
            self.get.lock().unwrap().pop_front().unwrap()
        }

        async fn create_frame(
            &self,
            user_id: &str,
            frame: &NewFrame,
        ) -> Result<DeviceRecord, ApiError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("create {user_id} {}", frame.name));
            self.registered.lock().unwrap().push(frame.clone());
            self.create.lock().unwrap().pop_front().unwrap()
        }
    }

    struct FailingStore;

    #[async_trait]
    impl DeviceStore for FailingStore {
        async fn load(&self) -> Result<Option<DeviceRecord>, StoreError> {
            Ok(None)
        }

        async fn save(&self, _device: &DeviceRecord) -> Result<(), StoreError> {
            Err(StoreError::Io {
                path: "/read-only/device.json".into(),
                source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            })
        }
    }

    fn session() -> Session {
        Session {
            access_token: "tok".to_string(),
            user_id: "user-1".to_string(),
        }
    }

    fn remote(id: &str, artwork: Option<&str>) -> DeviceRecord {
        DeviceRecord {
            id: Some(id.to_string()),
            name: "Hallway".to_string(),
            current_artwork: artwork.map(|a| {
                ArtworkRecord::new(a, "http://example.com/a.png", ArtworkFormat::default())
            }),
            ..Default::default()
        }
    }

    fn connection(
        api: ScriptedApi,
        device: DeviceRecord,
    ) -> (DeviceConnection<ScriptedApi>, EventReceiver) {
        let (tx, rx) = events::channel(16);
        let conn = DeviceConnection::new(
            api,
            Credentials::new("alice", "secret"),
            device,
            Box::new(MemoryDeviceStore::new()),
            Box::new(NoopPluginSync),
            tx,
        );
        (conn, rx)
    }

    #[tokio::test]
    async fn test_connect_with_known_id_fetches_record() {
        let api = ScriptedApi::default();
        api.login.lock().unwrap().push_back(Ok(session()));
        api.get
            .lock()
            .unwrap()
            .push_back(Ok(remote("frame-1", Some("art-1"))));

        let mut device = DeviceRecord::new("Hallway");
        device.id = Some("frame-1".to_string());
        let (mut conn, mut rx) = connection(api.clone(), device);

        let resolution = conn.connect().await.unwrap();
        assert_eq!(resolution.path, ResolvePath::Fetched);
        assert!(resolution.side_effect_failures.is_empty());
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert_eq!(conn.device().artwork_id(), Some("art-1"));
        assert_eq!(api.calls(), vec!["login alice", "get frame-1"]);

        // Token is stored and armed on the client
        assert_eq!(conn.credentials().access_token.as_deref(), Some("tok"));
        assert_eq!(api.token.lock().unwrap().as_deref(), Some("tok"));

        match rx.recv().await.unwrap() {
            ControllerEvent::Connected { device } => {
                assert_eq!(device.id.as_deref(), Some("frame-1"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_resolve_without_id_registers_without_lookup() {
        let api = ScriptedApi::default();
        api.create
            .lock()
            .unwrap()
            .push_back(Ok(remote("frame-new", None)));

        let (mut conn, _rx) = connection(api.clone(), DeviceRecord::new("Hallway"));
        let resolution = conn.resolve(&session()).await.unwrap();

        assert_eq!(resolution.path, ResolvePath::Registered);
        assert_eq!(api.calls(), vec!["create user-1 Hallway"]);
        assert_eq!(conn.device().id.as_deref(), Some("frame-new"));
    }

    #[tokio::test]
    async fn test_resolve_not_found_falls_through_to_register() {
        let api = ScriptedApi::default();
        api.get.lock().unwrap().push_back(Err(ApiError::NotFound {
            resource: "frame stale".to_string(),
        }));
        api.create
            .lock()
            .unwrap()
            .push_back(Ok(remote("frame-2", None)));

        let mut device = DeviceRecord::new("Hallway");
        device.id = Some("stale".to_string());
        let (mut conn, _rx) = connection(api.clone(), device);

        let resolution = conn.resolve(&session()).await.unwrap();
        assert_eq!(resolution.path, ResolvePath::Registered);
        assert_eq!(api.calls(), vec!["get stale", "create user-1 Hallway"]);
    }

    #[tokio::test]
    async fn test_resolve_error_falls_through_to_register() {
        let api = ScriptedApi::default();
        api.get.lock().unwrap().push_back(Err(ApiError::Status {
            status: 500,
            body: "boom".to_string(),
        }));
        api.create
            .lock()
            .unwrap()
            .push_back(Ok(remote("frame-3", None)));

        let mut device = DeviceRecord::new("Hallway");
        device.id = Some("frame-1".to_string());
        let (mut conn, _rx) = connection(api.clone(), device);

        let resolution = conn.resolve(&session()).await.unwrap();
        assert_eq!(resolution.path, ResolvePath::Registered);
        assert_eq!(api.calls().last().unwrap(), "create user-1 Hallway");
    }

    #[tokio::test]
    async fn test_authentication_failure_is_fatal() {
        let api = ScriptedApi::default();
        api.login.lock().unwrap().push_back(Err(ApiError::Status {
            status: 401,
            body: "login failed".to_string(),
        }));

        let (mut conn, mut rx) = connection(api.clone(), DeviceRecord::new("Hallway"));
        let err = conn.connect().await.unwrap_err();

        assert!(matches!(err, ConnectionError::Authentication { .. }));
        assert_eq!(err.stage(), ConnectionStage::Authenticate);
        assert!(err.to_string().contains("authenticate"));
        assert_eq!(conn.state(), ConnectionState::Failed);
        assert!(conn.credentials().access_token.is_none());
        assert_eq!(api.calls(), vec!["login alice"]);

        match rx.recv().await.unwrap() {
            ControllerEvent::ConnectionFailed { stage, .. } => {
                assert_eq!(stage, ConnectionStage::Authenticate);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_registration_failure_is_fatal() {
        let api = ScriptedApi::default();
        api.login.lock().unwrap().push_back(Ok(session()));
        api.create.lock().unwrap().push_back(Err(ApiError::Status {
            status: 422,
            body: "invalid".to_string(),
        }));

        let (mut conn, _rx) = connection(api, DeviceRecord::new("Hallway"));
        let err = conn.connect().await.unwrap_err();

        assert!(matches!(err, ConnectionError::Registration { .. }));
        assert_eq!(conn.state(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn test_register_sends_default_plugins() {
        let api = ScriptedApi::default();
        api.create
            .lock()
            .unwrap()
            .push_back(Ok(remote("frame-9", None)));

        let mut seed = PluginMap::new();
        seed.insert("frame-image".to_string(), "^0.1.0".to_string());
        let (conn, _rx) = connection(api.clone(), DeviceRecord::new("Hallway"));
        let mut conn = conn.with_default_plugins(seed.clone());

        conn.register(&session()).await.unwrap();

        let registered = api.registered.lock().unwrap().clone();
        assert_eq!(
            registered,
            vec![NewFrame {
                name: "Hallway".to_string(),
                plugins: seed,
            }]
        );
    }

    #[tokio::test]
    async fn test_side_effect_failure_does_not_roll_back() {
        let api = ScriptedApi::default();
        api.login.lock().unwrap().push_back(Ok(session()));
        api.create
            .lock()
            .unwrap()
            .push_back(Ok(remote("frame-5", None)));

        let (tx, mut rx) = events::channel(16);
        let mut conn = DeviceConnection::new(
            api,
            Credentials::new("alice", "secret"),
            DeviceRecord::new("Hallway"),
            Box::new(FailingStore),
            Box::new(NoopPluginSync),
            tx,
        );

        let resolution = conn.connect().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert_eq!(resolution.side_effect_failures.len(), 1);
        assert_eq!(
            resolution.side_effect_failures[0].stage,
            ConnectionStage::Persist
        );

        match rx.recv().await.unwrap() {
            ControllerEvent::SideEffectFailed { stage, .. } => {
                assert_eq!(stage, ConnectionStage::Persist);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(matches!(
            rx.recv().await.unwrap(),
            ControllerEvent::Connected { .. }
        ));
    }

    #[tokio::test]
    async fn test_refresh_requires_connection() {
        let (mut conn, _rx) = connection(ScriptedApi::default(), DeviceRecord::new("Hallway"));
        let err = conn.refresh().await.unwrap_err();
        assert!(matches!(
            err,
            ConnectionError::InvalidState {
                state: ConnectionState::Disconnected,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_refresh_replaces_record() {
        let api = ScriptedApi::default();
        api.login.lock().unwrap().push_back(Ok(session()));
        {
            let mut get = api.get.lock().unwrap();
            get.push_back(Ok(remote("frame-1", Some("art-1"))));
            get.push_back(Ok(remote("frame-1", Some("art-2"))));
        }

        let mut device = DeviceRecord::new("Hallway");
        device.id = Some("frame-1".to_string());
        let (mut conn, mut rx) = connection(api, device);

        conn.connect().await.unwrap();
        let _connected = rx.recv().await.unwrap();

        let resolution = conn.refresh().await.unwrap();
        assert_eq!(resolution.device.artwork_id(), Some("art-2"));
        assert_eq!(conn.device().artwork_id(), Some("art-2"));
        assert!(matches!(
            rx.recv().await.unwrap(),
            ControllerEvent::DeviceUpdated { .. }
        ));
    }
}
