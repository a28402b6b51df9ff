//! ID token verification.
//!
//! The token's signature is checked against the issuer's published keys
//! before any claim is trusted. Custom claims (such as `groups`) are then
//! read from the verified payload for the authorization rules.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use nas_sso_core::{IdTokenClaims, Provider};
use openidconnect::core::{
    CoreIdToken, CoreIdTokenVerifier, CoreJsonWebKeySet, CoreJwsSigningAlgorithm,
};
use openidconnect::{
    ClaimsVerificationError, ClientId, ClientSecret, IssuerUrl, Nonce, SignatureVerificationError,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, instrument};

use crate::client_config::ClientConfiguration;
use crate::error::OidcError;
use crate::jwks::KeySource;

/// Allowed clock skew when checking `exp`, in seconds.
const EXPIRY_LEEWAY_SECONDS: i64 = 60;

/// Asymmetric algorithms accepted from any issuer.
const ASYMMETRIC_ALGS: [CoreJwsSigningAlgorithm; 8] = [
    CoreJwsSigningAlgorithm::RsaSsaPkcs1V15Sha256,
    CoreJwsSigningAlgorithm::RsaSsaPkcs1V15Sha384,
    CoreJwsSigningAlgorithm::RsaSsaPkcs1V15Sha512,
    CoreJwsSigningAlgorithm::RsaSsaPssSha256,
    CoreJwsSigningAlgorithm::RsaSsaPssSha384,
    CoreJwsSigningAlgorithm::RsaSsaPssSha512,
    CoreJwsSigningAlgorithm::EcdsaP256Sha256,
    CoreJwsSigningAlgorithm::EcdsaP384Sha384,
];

/// HMAC algorithms; keyed by the client secret, so confidential clients only.
const HMAC_ALGS: [CoreJwsSigningAlgorithm; 3] = [
    CoreJwsSigningAlgorithm::HmacSha256,
    CoreJwsSigningAlgorithm::HmacSha384,
    CoreJwsSigningAlgorithm::HmacSha512,
];

/// An ID token whose signature and standard claims have been checked.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedIdToken {
    /// The `sub` claim.
    pub subject: String,
    /// Every claim in the token, for authorization rules.
    pub claims: IdTokenClaims,
}

/// Verifies ID tokens returned by the token endpoint.
#[async_trait]
pub trait ClaimsValidator: Send + Sync {
    /// Verifies the token and returns its subject and claims.
    ///
    /// # Errors
    ///
    /// Returns [`OidcError::TokenValidation`] if the token is malformed,
    /// unsigned, signed by an unknown key, expired, or issued for another
    /// client, and [`OidcError::Configuration`] if the provider publishes
    /// no signing keys.
    async fn verify_id_token(
        &self,
        provider: &Provider,
        config: &ClientConfiguration,
        id_token: &str,
    ) -> Result<VerifiedIdToken, OidcError>;
}

/// [`ClaimsValidator`] checking signatures against the provider's JWKS.
///
/// Key sets are cached per `jwks_uri`. A token signed by a key missing from
/// the cached set triggers one refetch, which picks up key rotation.
pub struct JwksClaimsValidator {
    source: Arc<dyn KeySource>,
    cache: RwLock<HashMap<String, CoreJsonWebKeySet>>,
}

impl std::fmt::Debug for JwksClaimsValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cached = self.cache.read().unwrap_or_else(PoisonError::into_inner).len();
        f.debug_struct("JwksClaimsValidator")
            .field("cached_key_sets", &cached)
            .finish_non_exhaustive()
    }
}

impl JwksClaimsValidator {
    /// Creates a validator fetching keys from `source`.
    #[must_use]
    pub fn new(source: Arc<dyn KeySource>) -> Self {
        Self {
            source,
            cache: RwLock::new(HashMap::new()),
        }
    }

    async fn keys(
        &self,
        jwks_uri: &str,
        config: &ClientConfiguration,
        refresh: bool,
    ) -> Result<CoreJsonWebKeySet, OidcError> {
        if !refresh {
            let cached = self
                .cache
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(jwks_uri)
                .cloned();
            if let Some(keys) = cached {
                return Ok(keys);
            }
        }

        let keys = self
            .source
            .fetch_keys(jwks_uri, config.allows_insecure_requests())
            .await?;
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(jwks_uri.to_string(), keys.clone());
        Ok(keys)
    }
}

#[async_trait]
impl ClaimsValidator for JwksClaimsValidator {
    #[instrument(skip(self, provider, config, id_token), fields(provider_id = %provider.id))]
    async fn verify_id_token(
        &self,
        provider: &Provider,
        config: &ClientConfiguration,
        id_token: &str,
    ) -> Result<VerifiedIdToken, OidcError> {
        let jwks_uri = config.jwks_uri().ok_or_else(|| {
            OidcError::Configuration(format!(
                "provider {} has no jwks_uri; ID tokens cannot be verified",
                provider.id
            ))
        })?;

        let token: CoreIdToken = id_token
            .parse()
            .map_err(|e| OidcError::TokenValidation(format!("Malformed ID token: {e}")))?;

        let keys = self.keys(jwks_uri, config, false).await?;
        let subject = match verify(&token, config, keys, jwks_uri)? {
            Err(ClaimsVerificationError::SignatureVerification(
                SignatureVerificationError::NoMatchingKey,
            )) => {
                debug!("no cached key matches the ID token; refetching JWKS");
                let keys = self.keys(jwks_uri, config, true).await?;
                verify(&token, config, keys, jwks_uri)?
            }
            result => result,
        }
        .map_err(|e| OidcError::TokenValidation(format!("ID token rejected: {e}")))?;

        if subject.is_empty() {
            return Err(OidcError::TokenValidation("ID token has no subject".to_string()));
        }

        let claims = decode_claims(id_token)?;
        debug!("ID token verified");
        Ok(VerifiedIdToken { subject, claims })
    }
}

/// Checks signature, audience, expiry and (for discovered issuers) issuer.
///
/// The outer error is a local configuration problem; the inner one is the
/// token's fault.
fn verify(
    token: &CoreIdToken,
    config: &ClientConfiguration,
    keys: CoreJsonWebKeySet,
    jwks_uri: &str,
) -> Result<Result<String, ClaimsVerificationError>, OidcError> {
    // Manual issuers may be a synthetic `manual-{id}`; the URL is unused then.
    let issuer = IssuerUrl::new(config.issuer().to_string())
        .or_else(|_| IssuerUrl::new(jwks_uri.to_string()))
        .map_err(|e| OidcError::Configuration(format!("invalid issuer URL: {e}")))?;
    let client_id = ClientId::new(config.client_id().to_string());

    let (verifier, algs) = match config.client_auth().client_secret() {
        Some(secret) => (
            CoreIdTokenVerifier::new_confidential_client(
                client_id,
                ClientSecret::new(secret.to_string()),
                issuer,
                keys,
            ),
            ASYMMETRIC_ALGS
                .iter()
                .chain(HMAC_ALGS.iter())
                .cloned()
                .collect::<Vec<_>>(),
        ),
        None => (
            CoreIdTokenVerifier::new_public_client(client_id, issuer, keys),
            ASYMMETRIC_ALGS.to_vec(),
        ),
    };
    let verifier = verifier
        .set_allowed_algs(algs)
        .require_issuer_match(config.is_discovered())
        .set_time_fn(|| Utc::now() - chrono::Duration::seconds(EXPIRY_LEEWAY_SECONDS));

    Ok(token
        .claims(&verifier, accept_any_nonce)
        .map(|claims| claims.subject().as_str().to_string()))
}

/// Logins carry no nonce; replay is prevented by the single-use state.
fn accept_any_nonce(_: Option<&Nonce>) -> Result<(), String> {
    Ok(())
}

/// Reads the full claim set from an already verified token.
fn decode_claims(id_token: &str) -> Result<IdTokenClaims, OidcError> {
    let payload = id_token
        .split('.')
        .nth(1)
        .ok_or_else(|| OidcError::TokenValidation("Invalid JWT format".to_string()))?;

    let payload_bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| OidcError::TokenValidation(format!("Failed to decode JWT payload: {e}")))?;

    match serde_json::from_slice::<Value>(&payload_bytes) {
        Ok(Value::Object(map)) => Ok(IdTokenClaims::new(map)),
        Ok(_) => Err(OidcError::TokenValidation(
            "JWT payload is not a JSON object".to_string(),
        )),
        Err(e) => Err(OidcError::TokenValidation(format!(
            "Failed to parse JWT payload: {e}"
        ))),
    }
}
