//! Matrix user model

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Random bytes behind every access token
const TOKEN_BYTES: usize = 32;

/// A Matrix user, which may or may not be linked to an account.
///
/// The token lets the user reach their page on the web frontend without
/// any other authentication.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatrixUser {
    /// Matrix id, such as `@steffo:ryg.one`
    pub id: String,
    pub token: String,
    /// Email of the linked account, if any
    pub account_email: Option<String>,
}

impl MatrixUser {
    /// Create an unlinked user with a fresh token
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            token: generate_token(),
            account_email: None,
        }
    }

    pub fn is_linked(&self) -> bool {
        self.account_email.is_some()
    }
}

/// Url-safe random token
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
