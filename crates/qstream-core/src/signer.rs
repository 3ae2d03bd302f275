//! Request signing for the auth handshake.
//!
//! The prehash string is `timestamp + method + path + body`. The method is
//! always `GET` and the body digest segment is always empty for this client.
//! The MAC key is the base64-decoded secret and the tag is returned base64-encoded.

use crate::credentials::decode_secret;
use crate::error::{CoreError, CoreResult};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Fixed method token in the prehash string.
pub const SIGN_METHOD: &str = "GET";

/// Compute the request signature.
///
/// # Errors
///
/// Returns `CoreError::InvalidSecret` if `secret` is not valid base64.
pub fn sign(timestamp_secs: i64, secret: &str, path: &str) -> CoreResult<String> {
    let key = decode_secret(secret)?;
    let prehash = format!("{timestamp_secs}{SIGN_METHOD}{path}");

    let mut mac = HmacSha256::new_from_slice(&key)
        .map_err(|e| CoreError::InvalidSecret(format!("Failed to create HMAC: {e}")))?;
    mac.update(prehash.as_bytes());

    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Current Unix time in whole seconds.
pub fn unix_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}
