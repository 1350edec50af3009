//! Authentication
//!
//! Signed browser sessions and the Google OpenID Connect provider

pub mod google;

use anyhow::Result;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Name of the session cookie
pub const SESSION_COOKIE: &str = "loki_session";

/// How long a login attempt may take, in seconds
const SESSION_TTL_SECS: u64 = 3600;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub matrix_token: Option<String>,
    pub oauth_state: String,
    pub nonce: String,
    pub exp: usize,
}

/// What the browser carries between `/matrix/{token}/link` and `/authorize`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Token of the Matrix user being linked
    pub matrix_token: Option<String>,
    /// Anti-CSRF value echoed back by the provider
    pub oauth_state: String,
    /// Value the ID token must carry
    pub nonce: String,
}

impl Session {
    /// Fresh session with random state and nonce
    pub fn start(matrix_token: Option<String>) -> Self {
        Self {
            matrix_token,
            oauth_state: uuid::Uuid::new_v4().simple().to_string(),
            nonce: uuid::Uuid::new_v4().simple().to_string(),
        }
    }
}

/// Encodes sessions as HS256 JWTs stored in a cookie
#[derive(Clone)]
pub struct SessionService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    algorithm: Algorithm,
}

impl SessionService {
    pub fn new(secret: &str) -> Self {
        let secret = secret.as_bytes();
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            algorithm: Algorithm::HS256,
        }
    }

    pub fn encode(&self, session: &Session) -> Result<String> {
        let expiration = (std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)?
            .as_secs()
            + SESSION_TTL_SECS) as usize;

        let claims = Claims {
            matrix_token: session.matrix_token.clone(),
            oauth_state: session.oauth_state.clone(),
            nonce: session.nonce.clone(),
            exp: expiration,
        };

        let token = encode(&Header::new(self.algorithm), &claims, &self.encoding_key)?;
        Ok(token)
    }

    pub fn decode(&self, token: &str) -> Result<Session> {
        let mut validation = Validation::new(self.algorithm);
        validation.validate_exp = true;
        validation.required_spec_claims = ["exp".to_string()].into_iter().collect();

        let token_data = decode::<Claims>(token, &self.decoding_key, &validation)?;
        let claims = token_data.claims;

        Ok(Session {
            matrix_token: claims.matrix_token,
            oauth_state: claims.oauth_state,
            nonce: claims.nonce,
        })
    }

    /// `Set-Cookie` value storing the session
    pub fn cookie(&self, session: &Session, secure: bool) -> Result<String> {
        let value = self.encode(session)?;
        Ok(format!(
            "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax{}",
            SESSION_COOKIE,
            value,
            SESSION_TTL_SECS,
            if secure { "; Secure" } else { "" }
        ))
    }

    /// `Set-Cookie` value deleting the session
    pub fn clear_cookie(secure: bool) -> String {
        format!(
            "{}=; Path=/; Max-Age=0; HttpOnly; SameSite=Lax{}",
            SESSION_COOKIE,
            if secure { "; Secure" } else { "" }
        )
    }
}

/// Extract the session cookie value from a `Cookie` header
pub fn session_cookie_value(cookie_header: &str) -> Option<&str> {
    cookie_header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value)
}
