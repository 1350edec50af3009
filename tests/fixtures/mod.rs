//! Shared test fixtures
//!
//! An in-process fake homeserver speaking the subset of the Matrix
//! client-server and Synapse admin APIs the client uses.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha1::Sha1;
use sha2::Sha512;
use tokio::net::TcpListener;

use lokiunimore::infrastructure::matrix::{ClientConfig, ExtendedClient};

pub const REGISTRATION_SECRET: &str = "registration-secret";
pub const LOGIN_SECRET: &str = "login-secret";
pub const BOT_ID: &str = "@loki:example.org";
pub const ACCESS_TOKEN: &str = "syt_fake_access_token";
pub const NONCE: &str = "fake-nonce";

/// Everything the fake homeserver received, plus what it will answer
#[derive(Default)]
pub struct Homeserver {
    /// `username`s registered so far
    pub registered: Mutex<Vec<String>>,
    /// Bodies posted to `/createRoom`
    pub created: Mutex<Vec<Value>>,
    pub joined: Mutex<Vec<String>>,
    /// `(room_id, user_id)` of every accepted invite
    pub invites: Mutex<Vec<(String, String)>>,
    /// `(room_id, body)` of every sent message
    pub messages: Mutex<Vec<(String, String)>>,
    /// `since` parameter of every `/sync`
    pub syncs: Mutex<Vec<Option<String>>>,
    /// Whether each `/sync` asked for `full_state`
    pub full_state: Mutex<Vec<bool>>,
    /// Query strings received by the hierarchy endpoint
    pub hierarchy_queries: Mutex<Vec<HashMap<String, String>>>,
    /// Responses handed out by `/sync`, in order
    pub sync_queue: Mutex<VecDeque<Value>>,
    /// Hierarchy pages keyed by their `from` cursor, `""` for the first
    pub hierarchy: Mutex<HashMap<String, Value>>,
    /// Rooms where invites are refused
    pub forbidden_rooms: Mutex<Vec<String>>,
}

impl Homeserver {
    pub fn queue_sync(&self, response: Value) {
        self.sync_queue.lock().unwrap().push_back(response);
    }

    pub fn set_hierarchy_page(&self, from: &str, page: Value) {
        self.hierarchy.lock().unwrap().insert(from.to_string(), page);
    }

    pub fn forbid_invites_to(&self, room_id: &str) {
        self.forbidden_rooms.lock().unwrap().push(room_id.to_string());
    }
}

pub struct FakeHomeserver {
    pub url: String,
    pub state: Arc<Homeserver>,
}

fn matrix_error(status: StatusCode, errcode: &str, error: &str) -> Response {
    (status, Json(json!({ "errcode": errcode, "error": error }))).into_response()
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .map(|value| value == format!("Bearer {}", ACCESS_TOKEN))
        .unwrap_or(false)
}

async fn register_nonce() -> Json<Value> {
    Json(json!({ "nonce": NONCE }))
}

async fn register(State(hs): State<Arc<Homeserver>>, Json(body): Json<Value>) -> Response {
    let field = |name: &str| body[name].as_str().unwrap_or_default().to_string();
    let username = field("username");
    let password = field("password");

    let mut mac = Hmac::<Sha1>::new_from_slice(REGISTRATION_SECRET.as_bytes()).unwrap();
    mac.update(field("nonce").as_bytes());
    mac.update(b"\x00");
    mac.update(username.as_bytes());
    mac.update(b"\x00");
    mac.update(password.as_bytes());
    mac.update(b"\x00");
    mac.update(b"notadmin");
    let expected = hex::encode(mac.finalize().into_bytes());

    if field("mac") != expected {
        return matrix_error(StatusCode::FORBIDDEN, "M_FORBIDDEN", "HMAC incorrect");
    }

    let mut registered = hs.registered.lock().unwrap();
    if registered.contains(&username) {
        return matrix_error(StatusCode::BAD_REQUEST, "M_USER_IN_USE", "User ID already taken.");
    }
    registered.push(username.clone());

    Json(json!({
        "user_id": format!("@{}:example.org", username),
        "access_token": "registration_token",
        "device_id": "REGDEVICE",
    }))
    .into_response()
}

async fn login(Json(body): Json<Value>) -> Response {
    if body["type"] != "com.devture.shared_secret_auth" {
        return matrix_error(StatusCode::BAD_REQUEST, "M_UNKNOWN", "Unknown login type");
    }
    let user = body["identifier"]["user"].as_str().unwrap_or_default();

    let mut mac = Hmac::<Sha512>::new_from_slice(LOGIN_SECRET.as_bytes()).unwrap();
    mac.update(user.as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());

    if body["token"].as_str() != Some(expected.as_str()) {
        return matrix_error(StatusCode::FORBIDDEN, "M_FORBIDDEN", "Invalid token");
    }

    Json(json!({
        "user_id": user,
        "access_token": ACCESS_TOKEN,
        "device_id": "FAKEDEVICE",
    }))
    .into_response()
}

async fn hierarchy(
    State(hs): State<Arc<Homeserver>>,
    Path(room_id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if !authorized(&headers) {
        return matrix_error(StatusCode::UNAUTHORIZED, "M_UNKNOWN_TOKEN", "Invalid access token");
    }
    hs.hierarchy_queries.lock().unwrap().push(query.clone());

    let from = query.get("from").cloned().unwrap_or_default();
    match hs.hierarchy.lock().unwrap().get(&from) {
        Some(page) => Json(page.clone()).into_response(),
        None => matrix_error(
            StatusCode::NOT_FOUND,
            "M_NOT_FOUND",
            &format!("Unknown room {} or cursor {:?}", room_id, from),
        ),
    }
}

async fn create_room(
    State(hs): State<Arc<Homeserver>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return matrix_error(StatusCode::UNAUTHORIZED, "M_UNKNOWN_TOKEN", "Invalid access token");
    }
    let mut created = hs.created.lock().unwrap();
    created.push(body);
    Json(json!({ "room_id": format!("!created{}:example.org", created.len()) })).into_response()
}

async fn join(
    State(hs): State<Arc<Homeserver>>,
    Path(room_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !authorized(&headers) {
        return matrix_error(StatusCode::UNAUTHORIZED, "M_UNKNOWN_TOKEN", "Invalid access token");
    }
    hs.joined.lock().unwrap().push(room_id.clone());
    Json(json!({ "room_id": room_id })).into_response()
}

async fn invite(
    State(hs): State<Arc<Homeserver>>,
    Path(room_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return matrix_error(StatusCode::UNAUTHORIZED, "M_UNKNOWN_TOKEN", "Invalid access token");
    }
    if hs.forbidden_rooms.lock().unwrap().contains(&room_id) {
        return matrix_error(StatusCode::FORBIDDEN, "M_FORBIDDEN", "You are not in this room");
    }
    let user_id = body["user_id"].as_str().unwrap_or_default().to_string();
    hs.invites.lock().unwrap().push((room_id, user_id));
    Json(json!({})).into_response()
}

async fn send_message(
    State(hs): State<Arc<Homeserver>>,
    Path((room_id, _txn_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return matrix_error(StatusCode::UNAUTHORIZED, "M_UNKNOWN_TOKEN", "Invalid access token");
    }
    let text = body["body"].as_str().unwrap_or_default().to_string();
    let mut messages = hs.messages.lock().unwrap();
    messages.push((room_id, text));
    Json(json!({ "event_id": format!("$event{}", messages.len()) })).into_response()
}

async fn sync(
    State(hs): State<Arc<Homeserver>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if !authorized(&headers) {
        return matrix_error(StatusCode::UNAUTHORIZED, "M_UNKNOWN_TOKEN", "Invalid access token");
    }
    let since = query.get("since").cloned();
    hs.syncs.lock().unwrap().push(since.clone());
    hs.full_state
        .lock()
        .unwrap()
        .push(query.get("full_state").map(String::as_str) == Some("true"));

    let queued = hs.sync_queue.lock().unwrap().pop_front();
    match queued {
        Some(response) => Json(response).into_response(),
        None => {
            // nothing new: behave like a short long-poll
            tokio::time::sleep(Duration::from_millis(20)).await;
            let next_batch = since.unwrap_or_else(|| "s_empty".to_string());
            Json(json!({ "next_batch": next_batch })).into_response()
        }
    }
}

impl FakeHomeserver {
    pub async fn start() -> Self {
        let state = Arc::new(Homeserver::default());

        let app = Router::new()
            .route("/_synapse/admin/v1/register", get(register_nonce).post(register))
            .route("/_matrix/client/v3/login", post(login))
            .route("/_matrix/client/v1/rooms/{room_id}/hierarchy", get(hierarchy))
            .route("/_matrix/client/v3/createRoom", post(create_room))
            .route("/_matrix/client/v3/join/{room_id}", post(join))
            .route("/_matrix/client/v3/rooms/{room_id}/invite", post(invite))
            .route(
                "/_matrix/client/v3/rooms/{room_id}/send/m.room.message/{txn_id}",
                put(send_message),
            )
            .route("/_matrix/client/v3/sync", get(sync))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("http://{}", addr),
            state,
        }
    }

    /// Client settings pointing at this server, storing state in `store_path`
    pub fn client_config(&self, store_path: &std::path::Path) -> ClientConfig {
        let mut config = ClientConfig::new(self.url.clone(), BOT_ID);
        config.store_path = store_path.to_path_buf();
        config.sync_timeout = Duration::from_millis(10);
        config.state_dump_interval = Duration::from_secs(3600);
        config
    }

    /// A client already logged in with the fake access token
    pub async fn logged_in_client(&self, store_path: &std::path::Path) -> ExtendedClient {
        let client = ExtendedClient::new(self.client_config(store_path)).unwrap();
        client.restore_login(ACCESS_TOKEN).await;
        client
    }
}

/// A joined room section of a sync response
pub fn joined_room(state: Vec<Value>, timeline: Vec<Value>, account_data: Vec<Value>) -> Value {
    json!({
        "state": { "events": state },
        "timeline": { "events": timeline },
        "account_data": { "events": account_data },
    })
}

pub fn member_event(user_id: &str, membership: &str) -> Value {
    json!({
        "type": "m.room.member",
        "sender": user_id,
        "state_key": user_id,
        "event_id": format!("$member_{}_{}", membership, user_id),
        "content": { "membership": membership },
    })
}

pub fn direct_tag_event() -> Value {
    json!({
        "type": "m.tag",
        "content": { "tags": { "m.direct": {} } },
    })
}

/// Poll `check` until it holds or a second has passed
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
