//! Web server
//!
//! Pages of the account linking flow

pub mod pages;

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use regex::Regex;
use serde::Deserialize;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::application::SpaceAccess;
use crate::core::store::Store;
use crate::domain::Account;
use crate::errors::LokiError;
use crate::infrastructure::auth::google::IdentityProvider;
use crate::infrastructure::auth::{session_cookie_value, Session, SessionService};

// ==================== State ====================

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub sessions: SessionService,
    pub provider: Arc<dyn IdentityProvider>,
    /// Emails allowed to link
    pub email_pattern: Regex,
    /// Overrides the base url derived from the request
    pub public_url: Option<String>,
    /// Set when linked users should be let into the community space
    pub space: Option<SpaceAccess>,
}

impl AppState {
    /// Base url the browser sees, honouring reverse proxy headers
    pub fn external_base(&self, headers: &HeaderMap) -> String {
        if let Some(url) = &self.public_url {
            return url.trim_end_matches('/').to_string();
        }

        let first_value = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.split(',').next())
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let proto = first_value("x-forwarded-proto").unwrap_or_else(|| "http".to_string());
        let host = first_value("x-forwarded-host")
            .or_else(|| first_value(header::HOST.as_str()))
            .unwrap_or_else(|| "localhost".to_string());

        format!("{}://{}", proto, host)
    }
}

fn page(status: StatusCode, body: String) -> Response {
    (status, Html(body)).into_response()
}

impl IntoResponse for LokiError {
    fn into_response(self) -> Response {
        match self {
            LokiError::NotFound(what) => {
                info!("Not found: {}", what);
                page(StatusCode::NOT_FOUND, pages::not_found())
            }
            LokiError::SessionError(reason) | LokiError::ValidationError(reason) => {
                info!("Rejected request: {}", reason);
                page(StatusCode::BAD_REQUEST, pages::missing_parameters())
            }
            LokiError::OAuthError(err) => {
                warn!("OAuth2 flow failed: {}", err);
                page(StatusCode::BAD_GATEWAY, pages::oauth_failed())
            }
            other => {
                error!("Request failed: {}", other);
                page(StatusCode::INTERNAL_SERVER_ERROR, pages::internal_error())
            }
        }
    }
}

// ==================== Handlers ====================

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn page_root() -> impl IntoResponse {
    Html(pages::root())
}

/// Profile page of the Matrix user owning `token`
async fn page_matrix_profile(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<Response, LokiError> {
    let user = state
        .store
        .get_matrix_user_by_token(&token)
        .await?
        .ok_or_else(|| LokiError::NotFound("matrix user token".to_string()))?;

    let account = match user.account_email.as_deref() {
        Some(email) => state.store.get_account(email).await?,
        None => None,
    };

    Ok(Html(pages::profile(&user, account.as_ref(), &token)).into_response())
}

/// Start the OAuth2 flow for the Matrix user owning `token`
async fn page_matrix_link(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    headers: HeaderMap,
) -> Result<Response, LokiError> {
    state
        .store
        .get_matrix_user_by_token(&token)
        .await?
        .ok_or_else(|| LokiError::NotFound("matrix user token".to_string()))?;

    let base = state.external_base(&headers);
    let redirect_uri = format!("{}/authorize", base);
    let session = Session::start(Some(token));

    let location = state
        .provider
        .authorization_url(&redirect_uri, &session.oauth_state, &session.nonce)
        .await?;
    let cookie = state
        .sessions
        .cookie(&session, base.starts_with("https://"))?;

    Ok(([(header::SET_COOKIE, cookie)], Redirect::to(&location)).into_response())
}

#[derive(Debug, Deserialize)]
pub struct AuthorizeQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// OAuth2 redirect target: verify the Google account and link it
async fn page_oauth_authorize(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AuthorizeQuery>,
    headers: HeaderMap,
) -> Result<Response, LokiError> {
    let session = headers
        .get(header::COOKIE)
        .and_then(|value| value.to_str().ok())
        .and_then(session_cookie_value)
        .ok_or_else(|| LokiError::SessionError("no session cookie".to_string()))?;
    let session = state
        .sessions
        .decode(session)
        .map_err(|e| LokiError::SessionError(e.to_string()))?;

    if let Some(error) = query.error {
        warn!("Provider returned an error: {}", error);
        return Ok(page(StatusCode::BAD_GATEWAY, pages::oauth_failed()));
    }
    let (Some(code), Some(oauth_state)) = (query.code, query.state) else {
        return Err(LokiError::ValidationError("missing code or state".to_string()));
    };
    if oauth_state != session.oauth_state {
        warn!("OAuth2 state mismatch");
        return Ok(page(StatusCode::BAD_REQUEST, pages::oauth_failed()));
    }

    let base = state.external_base(&headers);
    let redirect_uri = format!("{}/authorize", base);
    let identity = state
        .provider
        .authenticate(&code, &redirect_uri, &session.nonce)
        .await?;

    if !identity.email_verified {
        info!("Rejected unverified email {}", identity.email);
        return Ok(page(StatusCode::FORBIDDEN, pages::email_not_verified()));
    }
    if !state.email_pattern.is_match(&identity.email) {
        info!("Rejected email outside the organization: {}", identity.email);
        return Ok(page(StatusCode::FORBIDDEN, pages::wrong_organization()));
    }

    let account = state
        .store
        .merge_account(&Account::new(
            identity.email,
            identity.given_name,
            identity.family_name,
        ))
        .await?;

    let Some(matrix_token) = session.matrix_token else {
        return Ok(page(StatusCode::BAD_REQUEST, pages::no_matrix_user()));
    };
    if state.store.get_matrix_user_by_token(&matrix_token).await?.is_none() {
        return Err(LokiError::NotFound("matrix user token".to_string()));
    }

    let user = state
        .store
        .link_matrix_user(&matrix_token, &account.email)
        .await?;
    info!("Linked {} to {}", user.id, account.email);

    if let Some(space) = &state.space {
        if let Err(e) = space.grant(&user.id).await {
            warn!("Could not let {} into {}: {}", user.id, space.space_id(), e);
        }
    }

    let clear = SessionService::clear_cookie(base.starts_with("https://"));
    let location = format!("/matrix/{}/", urlencoding::encode(&matrix_token));
    Ok(([(header::SET_COOKIE, clear)], Redirect::to(&location)).into_response())
}

async fn fallback() -> Response {
    page(StatusCode::NOT_FOUND, pages::not_found())
}

// ==================== Router ====================

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(page_root))
        .route("/api/health", get(health_check))
        .route("/matrix/{token}/", get(page_matrix_profile))
        .route("/matrix/{token}/link", get(page_matrix_link))
        .route("/authorize", get(page_oauth_authorize))
        .fallback(fallback)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ==================== Server ====================

/// Serve until `shutdown` flips to `true`
pub async fn start_web_server(
    bind_addr: &str,
    state: Arc<AppState>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!("Web server started on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stopped| *stopped).await;
        })
        .await?;

    info!("Web server stopped");
    Ok(())
}
