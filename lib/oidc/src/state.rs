//! Signed, single-use authorization state tokens.
//!
//! A state token is handed to the identity provider in the authorization
//! request and comes back verbatim on the callback:
//!
//! ```text
//! {providerId}:{nonce}.{timestamp}.{signature}
//! ```
//!
//! `nonce` is 16 random bytes in hex, `timestamp` is issuance time in epoch
//! milliseconds, and `signature` is hex HMAC-SHA256 over `"{nonce}.{timestamp}"`.
//! Every character is URL-safe, so the token survives the round trip through
//! the provider's query string unchanged.
//!
//! Expiry is enforced by the [`StateStore`] TTL alone; validation performs no
//! timestamp arithmetic.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use tracing::{debug, instrument, warn};

use crate::config::SsoConfig;
use crate::error::{OidcError, StateError};
use crate::store::{StateRecord, StateStore};

type HmacSha256 = Hmac<Sha256>;

/// Prefix of the store key under which a nonce's record lives.
pub const STATE_KEY_PREFIX: &str = "oidc_state:";

/// Default lifetime of an issued state token.
pub const DEFAULT_STATE_TTL: Duration = Duration::from_secs(600);

const NONCE_BYTES: usize = 16;
const SECRET_BYTES: usize = 32;

/// The payload recovered from a successfully validated state token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedState {
    /// The caller-supplied state given at issuance.
    pub client_state: String,
    /// The redirect URI recorded at issuance, if any.
    pub redirect_uri: Option<String>,
}

/// Result of interpreting a token in the pre-signing `"{providerId}:{clientState}"` format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyState {
    /// The provider prefix, or empty if the token is not legacy.
    pub provider_id: String,
    /// The client state, or the whole token if it is not legacy.
    pub original_state: String,
}

/// Issues and validates signed state tokens.
pub struct StateTokenService {
    signer: HmacSha256,
    store: Arc<dyn StateStore>,
    ttl: Duration,
}

impl std::fmt::Debug for StateTokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateTokenService")
            .field("signer", &"<redacted>")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl StateTokenService {
    /// Creates a service signing with the given secret.
    ///
    /// # Errors
    ///
    /// Returns an error if the secret is empty or rejected by the MAC.
    pub fn new(secret: &[u8], store: Arc<dyn StateStore>) -> Result<Self, OidcError> {
        if secret.is_empty() {
            return Err(OidcError::Configuration(
                "state signing secret must not be empty".to_string(),
            ));
        }
        let signer = HmacSha256::new_from_slice(secret).map_err(|e| {
            OidcError::Configuration(format!("HMAC initialization failed: {e}"))
        })?;
        Ok(Self {
            signer,
            store,
            ttl: DEFAULT_STATE_TTL,
        })
    }

    /// Creates a service with a freshly generated random secret.
    ///
    /// Tokens issued before a restart will fail signature validation after it.
    ///
    /// # Errors
    ///
    /// Returns an error if the MAC cannot be initialized.
    pub fn with_random_secret(store: Arc<dyn StateStore>) -> Result<Self, OidcError> {
        let secret: [u8; SECRET_BYTES] = rand::random();
        Self::new(&secret, store)
    }

    /// Creates a service from configuration, generating a secret if none is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured secret is invalid.
    pub fn from_config(config: &SsoConfig, store: Arc<dyn StateStore>) -> Result<Self, OidcError> {
        let service = match config.state_secret()? {
            Some(secret) => Self::new(&secret, store)?,
            None => {
                warn!("no state_secret configured; generated a random one for this process");
                Self::with_random_secret(store)?
            }
        };
        Ok(service.with_ttl(config.state_ttl()))
    }

    /// Overrides the state lifetime.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Returns the state lifetime.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issues a new state token and records its nonce.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Format`] if the provider ID contains `:` and
    /// [`StateError::Store`] if the record cannot be stored.
    #[instrument(skip(self, client_state, redirect_uri))]
    pub async fn generate_secure_state(
        &self,
        provider_id: &str,
        client_state: &str,
        redirect_uri: Option<&str>,
    ) -> Result<String, StateError> {
        if provider_id.is_empty() || provider_id.contains(':') {
            return Err(StateError::Format {
                reason: "provider ID must be non-empty and must not contain ':'",
            });
        }

        let nonce = hex::encode(rand::random::<[u8; NONCE_BYTES]>());
        let timestamp = chrono::Utc::now().timestamp_millis();
        let signature = self.sign(&nonce, &timestamp.to_string());

        let record = StateRecord {
            nonce: nonce.clone(),
            client_state: client_state.to_string(),
            provider_id: provider_id.to_string(),
            redirect_uri: redirect_uri.map(str::to_string),
            timestamp,
        };
        self.store
            .put(&state_key(&nonce), record, self.ttl)
            .await?;

        debug!("issued state token");
        Ok(format!("{provider_id}:{nonce}.{timestamp}.{signature}"))
    }

    /// Validates a state token and consumes its nonce.
    ///
    /// Checks run in a fixed order: structure, provider prefix, signature,
    /// then the single-use store lookup. A provider mismatch is reported even
    /// when the signature is also wrong.
    ///
    /// # Errors
    ///
    /// Returns the first [`StateError`] encountered.
    #[instrument(skip(self, token))]
    pub async fn validate_secure_state(
        &self,
        token: &str,
        expected_provider_id: &str,
    ) -> Result<ValidatedState, StateError> {
        let (provider_id, signed) = token.split_once(':').ok_or(StateError::Format {
            reason: "missing provider prefix",
        })?;

        if provider_id != expected_provider_id {
            warn!(token_provider = provider_id, "state token issued for another provider");
            return Err(StateError::ProviderMismatch);
        }

        let parts: Vec<&str> = signed.split('.').collect();
        let [nonce, timestamp, signature] = parts.as_slice() else {
            return Err(StateError::Format {
                reason: "expected nonce.timestamp.signature",
            });
        };

        if nonce.len() != NONCE_BYTES * 2 || !nonce.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(StateError::Format {
                reason: "malformed nonce",
            });
        }
        if timestamp.is_empty() || !timestamp.bytes().all(|b| b.is_ascii_digit()) {
            return Err(StateError::Format {
                reason: "malformed timestamp",
            });
        }

        let expected = self.sign(nonce, timestamp);
        if !bool::from(expected.as_bytes().ct_eq(signature.as_bytes())) {
            warn!("state token signature mismatch");
            return Err(StateError::InvalidSignature);
        }

        let record = self
            .store
            .take(&state_key(nonce))
            .await?
            .ok_or(StateError::NotFound)?;

        if record.provider_id != expected_provider_id {
            warn!(
                record_provider = %record.provider_id,
                "stored state belongs to another provider"
            );
            return Err(StateError::ProviderMismatch);
        }

        debug!("state token validated and consumed");
        Ok(ValidatedState {
            client_state: record.client_state,
            redirect_uri: record.redirect_uri,
        })
    }

    fn sign(&self, nonce: &str, timestamp: &str) -> String {
        let mut mac = self.signer.clone();
        mac.update(nonce.as_bytes());
        mac.update(b".");
        mac.update(timestamp.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

fn state_key(nonce: &str) -> String {
    format!("{STATE_KEY_PREFIX}{nonce}")
}

/// Returns the provider prefix of a state token.
#[must_use]
pub fn extract_provider_from_state(token: &str) -> Option<&str> {
    token.split_once(':').map(|(provider_id, _)| provider_id)
}

/// Interprets a token in the legacy `"{providerId}:{clientState}"` format.
///
/// A token whose remainder looks signed (exactly three dot-separated parts)
/// is never reinterpreted as legacy; it comes back with an empty provider ID
/// and the whole token as the state.
#[must_use]
pub fn extract_provider_from_legacy_state(token: &str) -> LegacyState {
    let not_legacy = || LegacyState {
        provider_id: String::new(),
        original_state: token.to_string(),
    };

    let Some((provider_id, remainder)) = token.split_once(':') else {
        return not_legacy();
    };
    if remainder.split('.').count() == 3 {
        return not_legacy();
    }
    LegacyState {
        provider_id: provider_id.to_string(),
        original_state: remainder.to_string(),
    }
}
