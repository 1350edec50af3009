//! Extended Matrix client
//!
//! Talks to the homeserver over plain HTTP with reqwest, raising
//! [`RequestError`] on every non-success response.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use super::rooms::{RoomCache, RoomSummary};
use super::secret::{login_token, registration_mac};
use super::sync::{
    ClientState, ErrorBody, EventIdResponse, HierarchyPage, HierarchyRoom, LoginResponse,
    NonceResponse, RoomIdResponse, SyncResponse,
};
use super::{MatrixError, RequestError};

/// File, inside the store path, holding the persisted [`ClientState`]
pub const STATE_FILE: &str = "state.json";

const CLIENT_V3: &str = "/_matrix/client/v3";
const CLIENT_V1: &str = "/_matrix/client/v1";
const SYNAPSE_ADMIN: &str = "/_synapse/admin";

/// Extra time granted to a long-polling sync on top of its server timeout
const SYNC_GRACE: Duration = Duration::from_secs(30);

/// Settings of an [`ExtendedClient`]
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base url, such as `https://matrix.example.org`
    pub homeserver: String,
    /// Full user id, such as `@loki:example.org`
    pub user_id: String,
    pub device_id: String,
    /// Directory for the persisted client state
    pub store_path: PathBuf,
    /// Period of the state checkpoint task
    pub state_dump_interval: Duration,
    /// Long-polling timeout sent to `/sync`
    pub sync_timeout: Duration,
}

impl ClientConfig {
    pub fn new(homeserver: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            homeserver: homeserver.into(),
            user_id: user_id.into(),
            device_id: "LOKI".to_string(),
            store_path: PathBuf::from("./data/matrix"),
            state_dump_interval: Duration::from_secs(300),
            sync_timeout: Duration::from_secs(30),
        }
    }
}

/// Receives every sync response processed by [`ExtendedClient::sync_forever`]
#[async_trait]
pub trait SyncHandler: Send + Sync {
    /// `initial` is set when the response is a full sync without a stored
    /// cursor, i.e. it replays history the bot has possibly already seen.
    async fn on_sync(
        &self,
        client: &ExtendedClient,
        response: &SyncResponse,
        initial: bool,
    ) -> anyhow::Result<()>;
}

/// Options of `POST /createRoom`
#[derive(Debug, Clone, Default, Serialize)]
pub struct CreateRoom {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub invite: Vec<String>,
    pub is_direct: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preset: Option<String>,
}

/// Matrix client with the features the bot needs and common SDKs lack
pub struct ExtendedClient {
    homeserver: Url,
    user_id: String,
    device_id: RwLock<String>,
    store_path: PathBuf,
    state_dump_interval: Duration,
    sync_timeout: Duration,
    access_token: RwLock<Option<String>>,
    next_batch: Arc<RwLock<Option<String>>>,
    rooms: RwLock<RoomCache>,
    http: reqwest::Client,
}

impl ExtendedClient {
    pub fn new(config: ClientConfig) -> Result<Self, MatrixError> {
        Ok(Self {
            homeserver: Url::parse(&config.homeserver)?,
            user_id: config.user_id,
            device_id: RwLock::new(config.device_id),
            store_path: config.store_path,
            state_dump_interval: config.state_dump_interval,
            sync_timeout: config.sync_timeout,
            access_token: RwLock::new(None),
            next_batch: Arc::new(RwLock::new(None)),
            rooms: RwLock::new(RoomCache::new()),
            http: reqwest::Client::new(),
        })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub async fn device_id(&self) -> String {
        self.device_id.read().await.clone()
    }

    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    pub fn state_path(&self) -> PathBuf {
        self.store_path.join(STATE_FILE)
    }

    pub async fn access_token(&self) -> Option<String> {
        self.access_token.read().await.clone()
    }

    /// Reuse an access token obtained elsewhere
    pub async fn restore_login(&self, access_token: impl Into<String>) {
        *self.access_token.write().await = Some(access_token.into());
    }

    pub async fn next_batch(&self) -> Option<String> {
        self.next_batch.read().await.clone()
    }

    /// Snapshot of the known room with the given id
    pub async fn room(&self, room_id: &str) -> Option<RoomSummary> {
        self.rooms.read().await.get(room_id).cloned()
    }

    // ==================== Plumbing ====================

    fn endpoint(
        &self,
        base_path: &str,
        segments: &[&str],
        query: &[(&str, String)],
    ) -> Result<Url, MatrixError> {
        let mut url = self.homeserver.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| MatrixError::Url(url::ParseError::RelativeUrlWithCannotBeABaseBase))?;
            path.pop_if_empty();
            path.extend(base_path.split('/').filter(|s| !s.is_empty()));
            path.extend(segments);
        }
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    async fn authed(&self, method: Method, url: Url) -> Result<reqwest::RequestBuilder, MatrixError> {
        let token = self.access_token().await.ok_or(MatrixError::NotLoggedIn)?;
        Ok(self.http.request(method, url).bearer_auth(token))
    }

    /// Send a request and decode its JSON body, turning error responses
    /// into [`RequestError`]s
    async fn send<T: DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<T, MatrixError> {
        let request = builder.build()?;
        let method = request.method().to_string();
        let path = request.url().path().to_string();

        let response = self.http.execute(request).await?;
        let status = response.status();
        if !status.is_success() {
            let body: ErrorBody = response.json().await.unwrap_or_default();
            let err = RequestError {
                method,
                path,
                status: status.as_u16(),
                errcode: body.errcode,
                error: body.error,
            };
            warn!("{} {} errored: {:?}", err.method, err.path, err);
            return Err(err.into());
        }

        Ok(response.json().await?)
    }

    // ==================== Authentication ====================

    /// Perform a Synapse shared-secret registration
    ///
    /// The registration secret is not the secret used by
    /// [`login_with_shared_secret`](Self::login_with_shared_secret).
    pub async fn register_with_shared_secret(
        &self,
        shared_secret: &str,
        username: &str,
        displayname: &str,
        password: &str,
    ) -> Result<(), MatrixError> {
        debug!("Registering {} with a shared secret...", username);

        let url = self.endpoint(SYNAPSE_ADMIN, &["v1", "register"], &[])?;

        let nonce: NonceResponse = self.send(self.http.get(url.clone())).await?;
        let mac = registration_mac(shared_secret, &nonce.nonce, username, password, false)?;

        let body = json!({
            "nonce": nonce.nonce,
            "username": username,
            "displayname": displayname,
            "password": password,
            "admin": false,
            "mac": mac,
        });
        let _: Value = self.send(self.http.post(url).json(&body)).await?;

        debug!("Registered {} successfully!", username);
        Ok(())
    }

    /// Log in through `com.devture.shared_secret_auth`
    pub async fn login_with_shared_secret(&self, shared_secret: &str) -> Result<(), MatrixError> {
        debug!("Logging in as {} with a shared secret...", self.user_id);

        let token = login_token(shared_secret, &self.user_id)?;
        let device_id = self.device_id().await;

        let url = self.endpoint(CLIENT_V3, &["login"], &[])?;
        let body = json!({
            "type": "com.devture.shared_secret_auth",
            "identifier": {
                "type": "m.id.user",
                "user": self.user_id,
            },
            "token": token,
            "initial_device_display_name": device_id,
        });
        let login: LoginResponse = self.send(self.http.post(url).json(&body)).await?;

        if let Some(user_id) = login.user_id.as_deref() {
            if user_id != self.user_id {
                warn!("Homeserver logged us in as {} instead of {}", user_id, self.user_id);
            }
        }
        if let Some(device_id) = login.device_id {
            *self.device_id.write().await = device_id;
        }
        *self.access_token.write().await = Some(login.access_token);

        debug!("Login successful!");
        Ok(())
    }

    // ==================== Rooms ====================

    /// Every room of a space, following `next_batch` until exhausted
    pub async fn room_hierarchy(
        &self,
        room_id: &str,
        max_depth: u32,
        suggested_only: bool,
    ) -> Result<Vec<HierarchyRoom>, MatrixError> {
        debug!("Getting room hierarchy for: {:?}", room_id);

        let mut rooms = Vec::new();
        let mut from: Option<String> = None;

        loop {
            let mut query = vec![
                ("max_depth", max_depth.to_string()),
                ("suggested_only", suggested_only.to_string()),
            ];
            if let Some(cursor) = &from {
                query.push(("from", cursor.clone()));
            }

            let url = self.endpoint(CLIENT_V1, &["rooms", room_id, "hierarchy"], &query)?;
            let page: HierarchyPage = self.send(self.authed(Method::GET, url).await?).await?;
            rooms.extend(page.rooms);

            match page.next_batch.filter(|batch| !batch.is_empty()) {
                Some(batch) => from = Some(batch),
                None => break,
            }
        }

        debug!("Successfully retrieved a hierarchy of {} rooms!", rooms.len());
        Ok(rooms)
    }

    pub async fn room_create(&self, options: &CreateRoom) -> Result<String, MatrixError> {
        let url = self.endpoint(CLIENT_V3, &["createRoom"], &[])?;
        let created: RoomIdResponse = self
            .send(self.authed(Method::POST, url).await?.json(options))
            .await?;
        Ok(created.room_id)
    }

    /// Join a room by id or alias, returning the room id
    pub async fn join(&self, room_id_or_alias: &str) -> Result<String, MatrixError> {
        let url = self.endpoint(CLIENT_V3, &["join", room_id_or_alias], &[])?;
        let joined: RoomIdResponse = self
            .send(self.authed(Method::POST, url).await?.json(&json!({})))
            .await?;
        info!("Joined {}", joined.room_id);
        Ok(joined.room_id)
    }

    pub async fn invite(&self, room_id: &str, user_id: &str) -> Result<(), MatrixError> {
        let url = self.endpoint(CLIENT_V3, &["rooms", room_id, "invite"], &[])?;
        let _: Value = self
            .send(
                self.authed(Method::POST, url)
                    .await?
                    .json(&json!({ "user_id": user_id })),
            )
            .await?;
        info!("Invited {} to {}", user_id, room_id);
        Ok(())
    }

    /// Send an `m.text` message, returning the event id
    pub async fn send_text(&self, room_id: &str, body: &str) -> Result<String, MatrixError> {
        let txn_id = uuid::Uuid::new_v4().to_string();
        let url = self.endpoint(
            CLIENT_V3,
            &["rooms", room_id, "send", "m.room.message", &txn_id],
            &[],
        )?;
        let sent: EventIdResponse = self
            .send(self.authed(Method::PUT, url).await?.json(&json!({
                "msgtype": "m.text",
                "body": body,
            })))
            .await?;
        Ok(sent.event_id)
    }

    /// Find the first private room shared with `user_id`, or create one
    pub async fn pm_slide(&self, user_id: &str) -> Result<String, MatrixError> {
        debug!("Sliding into {}'s PMs...", user_id);

        if let Some(room) = self.rooms.read().await.find_pm(user_id) {
            debug!("Found PM room for: {}", user_id);
            return Ok(room.room_id.clone());
        }

        debug!("Creating new PM room for: {}", user_id);
        let room_id = self
            .room_create(&CreateRoom {
                invite: vec![user_id.to_string()],
                is_direct: true,
                preset: Some("trusted_private_chat".to_string()),
                ..Default::default()
            })
            .await?;

        // Remember the room right away, the next sync may be minutes away
        let mut summary = RoomSummary::new(room_id.clone());
        summary.joined.insert(self.user_id.clone());
        summary.invited.insert(user_id.to_string());
        self.rooms.write().await.insert(summary);

        info!("Created new PM room for: {}", user_id);
        Ok(room_id)
    }

    // ==================== State ====================

    /// Store what the homeserver cannot give back to us in `path`
    pub async fn dump_state(&self, path: &Path) -> Result<(), MatrixError> {
        debug!("Dumping state to {}...", path.display());
        let next_batch = self.next_batch().await;
        debug!("Next time, will resume syncing from batch {:?}", next_batch);
        write_state(path, next_batch).await
    }

    /// Restore the state written by [`dump_state`](Self::dump_state)
    pub async fn load_state(&self, path: &Path) -> Result<(), MatrixError> {
        debug!("Loading state from {}...", path.display());
        let raw = tokio::fs::read(path).await?;
        let state: ClientState = serde_json::from_slice(&raw)?;
        debug!("Will start syncing from stored batch {:?}", state.next_batch);
        *self.next_batch.write().await = state.next_batch;
        Ok(())
    }

    fn spawn_state_dumper(&self, path: PathBuf) -> JoinHandle<()> {
        let next_batch = self.next_batch.clone();
        let period = self.state_dump_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let batch = next_batch.read().await.clone();
                if let Err(e) = write_state(&path, batch).await {
                    warn!("Periodic state dump failed: {}", e);
                }
            }
        })
    }

    // ==================== Sync ====================

    /// One `/sync` request, applied to the local room cache and cursor
    pub async fn sync_once(&self, since: Option<&str>) -> Result<SyncResponse, MatrixError> {
        self.sync_request(since, false).await
    }

    /// `full_state` returns the whole state of every room, not only what
    /// changed since `since`
    async fn sync_request(
        &self,
        since: Option<&str>,
        full_state: bool,
    ) -> Result<SyncResponse, MatrixError> {
        let mut query = vec![("timeout", self.sync_timeout.as_millis().to_string())];
        if let Some(since) = since {
            query.push(("since", since.to_string()));
        }
        if full_state {
            query.push(("full_state", "true".to_string()));
        }

        let url = self.endpoint(CLIENT_V3, &["sync"], &query)?;
        let response: SyncResponse = self
            .send(
                self.authed(Method::GET, url)
                    .await?
                    .timeout(self.sync_timeout + SYNC_GRACE),
            )
            .await?;

        self.rooms.write().await.apply_sync(&response);
        *self.next_batch.write().await = Some(response.next_batch.clone());
        Ok(response)
    }

    /// Sync until `shutdown` flips to `true` or a request fails
    ///
    /// Resumes from the stored cursor, checkpoints it periodically and
    /// writes it one last time on the way out. The first resumed request
    /// asks for the full state, so the room cache knows the DMs created
    /// before a restart.
    pub async fn sync_forever(
        &self,
        handler: &dyn SyncHandler,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), MatrixError> {
        let state_path = self.state_path();

        debug!("Ensuring {} exists...", self.store_path.display());
        tokio::fs::create_dir_all(&self.store_path).await?;

        match self.load_state(&state_path).await {
            Ok(()) => {}
            Err(MatrixError::State(e)) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        let dump_task = self.spawn_state_dumper(state_path.clone());

        debug!("Starting to sync...");
        let mut rebuild_cache = self.next_batch().await.is_some();
        let result = loop {
            if *shutdown.borrow() {
                break Ok(());
            }

            let since = self.next_batch().await;
            let response = tokio::select! {
                changed = shutdown.changed() => {
                    // a dropped sender means nobody can stop us anymore
                    if changed.is_err() {
                        break Ok(());
                    }
                    continue;
                }
                response = self.sync_request(since.as_deref(), rebuild_cache) => response,
            };
            rebuild_cache = false;

            let response = match response {
                Ok(response) => response,
                Err(e) => break Err(e),
            };

            if let Err(e) = handler.on_sync(self, &response, since.is_none()).await {
                warn!("Sync handler failed: {}", e);
            }
        };

        debug!("Stopping to sync...");
        dump_task.abort();
        if let Err(e) = self.dump_state(&state_path).await {
            warn!("Final state dump failed: {}", e);
        }

        result
    }
}

async fn write_state(path: &Path, next_batch: Option<String>) -> Result<(), MatrixError> {
    let data = serde_json::to_vec(&ClientState { next_batch })?;
    tokio::fs::write(path, data).await?;
    Ok(())
}
