//! HMACs for Synapse shared-secret registration and the
//! `com.devture.shared_secret_auth` login type.
//!
//! The two features use two different secrets.

use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha512;

use super::MatrixError;

type HmacSha1 = Hmac<Sha1>;
type HmacSha512 = Hmac<Sha512>;

/// MAC for `POST /_synapse/admin/v1/register`
///
/// HMAC-SHA1 over `nonce \0 username \0 password \0 admin|notadmin`, hex.
pub fn registration_mac(
    shared_secret: &str,
    nonce: &str,
    username: &str,
    password: &str,
    admin: bool,
) -> Result<String, MatrixError> {
    let mut mac = HmacSha1::new_from_slice(shared_secret.as_bytes())
        .map_err(|_| MatrixError::InvalidSecret)?;
    mac.update(nonce.as_bytes());
    mac.update(b"\0");
    mac.update(username.as_bytes());
    mac.update(b"\0");
    mac.update(password.as_bytes());
    mac.update(b"\0");
    mac.update(if admin { b"admin".as_slice() } else { b"notadmin".as_slice() });
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Login token: HMAC-SHA512 of the full user id, hex
pub fn login_token(shared_secret: &str, user_id: &str) -> Result<String, MatrixError> {
    let mut mac = HmacSha512::new_from_slice(shared_secret.as_bytes())
        .map_err(|_| MatrixError::InvalidSecret)?;
    mac.update(user_id.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}
