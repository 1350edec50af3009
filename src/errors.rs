//! Standardised error handling
//!
//! Crate-wide error type shared by the web and bot layers

use thiserror::Error;

use crate::infrastructure::auth::google::OAuthError;

/// Main error type of the crate
#[derive(Error, Debug)]
pub enum LokiError {
    /// Storage related error
    #[error("Storage error: {0}")]
    StorageError(String),

    /// The OAuth2 / OpenID Connect flow failed
    #[error("OAuth error: {0}")]
    OAuthError(#[from] OAuthError),

    /// Session cookie missing, expired or tampered with
    #[error("Session error: {0}")]
    SessionError(String),

    /// A looked up entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Input validation error
    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl From<anyhow::Error> for LokiError {
    fn from(err: anyhow::Error) -> Self {
        LokiError::StorageError(err.to_string())
    }
}

/// Crate result alias
pub type Result<T> = std::result::Result<T, LokiError>;
