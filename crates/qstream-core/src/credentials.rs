//! API credentials for the auth handshake.

use crate::error::{CoreError, CoreResult};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use zeroize::Zeroizing;

/// API credentials.
///
/// The secret is the base64 text issued by the venue. It is kept in
/// zeroizing storage and never appears in `Debug` output.
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    secret: Zeroizing<String>,
    passphrase: Zeroizing<String>,
}

impl Credentials {
    /// Create new credentials.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidCredentials` if the API key or secret is empty.
    /// The secret encoding is checked separately by [`Credentials::validate`].
    pub fn new(
        api_key: impl Into<String>,
        secret: impl Into<String>,
        passphrase: impl Into<String>,
    ) -> CoreResult<Self> {
        let api_key = api_key.into();
        let secret = secret.into();

        if api_key.is_empty() {
            return Err(CoreError::InvalidCredentials(
                "API key cannot be empty".to_string(),
            ));
        }
        if secret.is_empty() {
            return Err(CoreError::InvalidCredentials(
                "API secret cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            api_key,
            secret: Zeroizing::new(secret),
            passphrase: Zeroizing::new(passphrase.into()),
        })
    }

    /// Get the API key.
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Get the base64-encoded secret.
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Get the passphrase.
    pub fn passphrase(&self) -> &str {
        &self.passphrase
    }

    /// Decode the secret into raw HMAC key bytes.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidSecret` if the secret is not valid base64.
    pub fn decoded_secret(&self) -> CoreResult<Zeroizing<Vec<u8>>> {
        decode_secret(&self.secret)
    }

    /// Check that the credentials can be used for signing.
    pub fn validate(&self) -> CoreResult<()> {
        if self.api_key.is_empty() {
            return Err(CoreError::InvalidCredentials(
                "API key cannot be empty".to_string(),
            ));
        }
        self.decoded_secret().map(|_| ())
    }
}

pub(crate) fn decode_secret(secret: &str) -> CoreResult<Zeroizing<Vec<u8>>> {
    STANDARD
        .decode(secret.trim())
        .map(Zeroizing::new)
        .map_err(|e| CoreError::InvalidSecret(e.to_string()))
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("secret", &"[REDACTED]")
            .field("passphrase", &"[REDACTED]")
            .finish()
    }
}
