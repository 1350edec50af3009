//! Google OpenID Connect
//!
//! Authorization-code flow driven with reqwest: discovery document,
//! code exchange at the token endpoint, ID token verification against the
//! provider's JWKS.

use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, warn};
use url::Url;

pub const GOOGLE_DISCOVERY_URL: &str = "https://accounts.google.com/.well-known/openid-configuration";

/// Scopes requested from the provider
pub const SCOPES: &str = "openid email profile";

/// Issuer Google puts in older tokens, besides the https one
const LEGACY_ISSUER: &str = "accounts.google.com";

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("Discovery failed: {0}")]
    Discovery(String),

    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid provider url: {0}")]
    Url(#[from] url::ParseError),

    #[error("Token exchange failed with status {status}: {body}")]
    TokenExchange { status: u16, body: String },

    #[error("Token response carries no id_token")]
    MissingIdToken,

    #[error("Invalid ID token: {0}")]
    InvalidIdToken(#[from] jsonwebtoken::errors::Error),

    #[error("No signing key matches kid {0:?}")]
    UnknownKey(Option<String>),

    #[error("ID token nonce does not match the session")]
    NonceMismatch,

    #[error("ID token carries no email")]
    MissingEmail,
}

/// The verified identity returned by the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoogleIdentity {
    pub email: String,
    pub email_verified: bool,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
}

/// OpenID Connect provider used by the web flow
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Where to send the browser to start the login
    async fn authorization_url(
        &self,
        redirect_uri: &str,
        state: &str,
        nonce: &str,
    ) -> Result<String, OAuthError>;

    /// Exchange the authorization code and verify the resulting ID token
    async fn authenticate(
        &self,
        code: &str,
        redirect_uri: &str,
        nonce: &str,
    ) -> Result<GoogleIdentity, OAuthError>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    id_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    email: Option<String>,
    #[serde(default)]
    email_verified: bool,
    given_name: Option<String>,
    family_name: Option<String>,
    nonce: Option<String>,
}

/// Google as an [`IdentityProvider`]
pub struct GoogleOidc {
    client_id: String,
    client_secret: String,
    discovery_url: String,
    /// Google Workspace domain hint (`hd`)
    hosted_domain: Option<String>,
    metadata: OnceCell<ProviderMetadata>,
    http: reqwest::Client,
}

impl GoogleOidc {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            discovery_url: GOOGLE_DISCOVERY_URL.to_string(),
            hosted_domain: None,
            metadata: OnceCell::new(),
            http: reqwest::Client::new(),
        }
    }

    pub fn with_discovery_url(mut self, url: impl Into<String>) -> Self {
        self.discovery_url = url.into();
        self
    }

    pub fn with_hosted_domain(mut self, domain: Option<String>) -> Self {
        self.hosted_domain = domain;
        self
    }

    /// Provider metadata, fetched once
    pub async fn metadata(&self) -> Result<&ProviderMetadata, OAuthError> {
        self.metadata
            .get_or_try_init(|| async {
                debug!("Fetching OpenID configuration from {}", self.discovery_url);
                let response = self.http.get(&self.discovery_url).send().await?;
                if !response.status().is_success() {
                    return Err(OAuthError::Discovery(format!(
                        "{} answered {}",
                        self.discovery_url,
                        response.status()
                    )));
                }
                Ok::<_, OAuthError>(response.json::<ProviderMetadata>().await?)
            })
            .await
    }

    async fn verify_id_token(
        &self,
        metadata: &ProviderMetadata,
        id_token: &str,
        nonce: &str,
    ) -> Result<GoogleIdentity, OAuthError> {
        let header = decode_header(id_token)?;

        let jwks: JwkSet = self
            .http
            .get(&metadata.jwks_uri)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let jwk = match header.kid.as_deref() {
            Some(kid) => jwks.find(kid),
            None => jwks.keys.first(),
        }
        .ok_or_else(|| OAuthError::UnknownKey(header.kid.clone()))?;

        let key = DecodingKey::from_jwk(jwk)?;
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[self.client_id.as_str()]);
        validation.set_issuer(&[metadata.issuer.as_str(), LEGACY_ISSUER]);

        let claims = decode::<IdTokenClaims>(id_token, &key, &validation)?.claims;
        identity_from_claims(claims, nonce)
    }
}

#[async_trait]
impl IdentityProvider for GoogleOidc {
    async fn authorization_url(
        &self,
        redirect_uri: &str,
        state: &str,
        nonce: &str,
    ) -> Result<String, OAuthError> {
        let metadata = self.metadata().await?;
        let url = build_authorization_url(
            &metadata.authorization_endpoint,
            &self.client_id,
            redirect_uri,
            state,
            nonce,
            self.hosted_domain.as_deref(),
        )?;
        Ok(url.into())
    }

    async fn authenticate(
        &self,
        code: &str,
        redirect_uri: &str,
        nonce: &str,
    ) -> Result<GoogleIdentity, OAuthError> {
        let metadata = self.metadata().await?;

        let response = self
            .http
            .post(&metadata.token_endpoint)
            .form(&[
                ("code", code),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("redirect_uri", redirect_uri),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            warn!("Token exchange failed with status {}", status);
            return Err(OAuthError::TokenExchange { status, body });
        }

        let tokens: TokenResponse = response.json().await?;
        let id_token = tokens.id_token.ok_or(OAuthError::MissingIdToken)?;
        self.verify_id_token(metadata, &id_token, nonce).await
    }
}

pub fn build_authorization_url(
    authorization_endpoint: &str,
    client_id: &str,
    redirect_uri: &str,
    state: &str,
    nonce: &str,
    hosted_domain: Option<&str>,
) -> Result<Url, OAuthError> {
    let mut url = Url::parse(authorization_endpoint)?;
    {
        let mut pairs = url.query_pairs_mut();
        pairs
            .append_pair("response_type", "code")
            .append_pair("client_id", client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("scope", SCOPES)
            .append_pair("state", state)
            .append_pair("nonce", nonce);
        if let Some(domain) = hosted_domain {
            pairs.append_pair("hd", domain);
        }
    }
    Ok(url)
}

fn identity_from_claims(claims: IdTokenClaims, nonce: &str) -> Result<GoogleIdentity, OAuthError> {
    if claims.nonce.as_deref() != Some(nonce) {
        return Err(OAuthError::NonceMismatch);
    }

    Ok(GoogleIdentity {
        email: claims.email.ok_or(OAuthError::MissingEmail)?,
        email_verified: claims.email_verified,
        given_name: claims.given_name,
        family_name: claims.family_name,
    })
}
