//! Signing keys and key sources for tests that need real ID tokens.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use openidconnect::core::{
    CoreIdToken, CoreIdTokenClaims, CoreJsonWebKeySet, CoreJwsSigningAlgorithm,
    CoreRsaPrivateSigningKey,
};
use openidconnect::{
    Audience, EmptyAdditionalClaims, EndUserEmail, IssuerUrl, JsonWebKeyId, PrivateSigningKey,
    StandardClaims, SubjectIdentifier,
};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::OidcError;
use crate::jwks::KeySource;

const SIGNING_KEY_PEM: &str = include_str!("../testdata/signing-key.pem");
const ROTATED_KEY_PEM: &str = include_str!("../testdata/rotated-key.pem");

/// Issues RS256-signed ID tokens.
pub struct TestSigner {
    key: CoreRsaPrivateSigningKey,
    issuer: String,
}

impl std::fmt::Debug for TestSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestSigner")
            .field("issuer", &self.issuer)
            .finish_non_exhaustive()
    }
}

impl TestSigner {
    /// A signer using the primary test key.
    #[must_use]
    pub fn new(issuer: &str) -> Self {
        Self::from_pem(SIGNING_KEY_PEM, "signing-key", issuer)
    }

    /// A signer using a second key, as after the issuer rotates its keys.
    #[must_use]
    pub fn rotated(issuer: &str) -> Self {
        Self::from_pem(ROTATED_KEY_PEM, "rotated-key", issuer)
    }

    fn from_pem(pem: &str, kid: &str, issuer: &str) -> Self {
        let key =
            CoreRsaPrivateSigningKey::from_pem(pem, Some(JsonWebKeyId::new(kid.to_string())))
                .expect("test signing key");
        Self {
            key,
            issuer: issuer.to_string(),
        }
    }

    /// The public half of the key, as an issuer would publish it.
    #[must_use]
    pub fn jwks(&self) -> CoreJsonWebKeySet {
        CoreJsonWebKeySet::new(vec![self.key.as_verification_key()])
    }

    /// Signs a token for `audience` valid for five minutes.
    #[must_use]
    pub fn sign(&self, audience: &str, subject: &str, email: Option<&str>) -> String {
        self.sign_expiring(
            audience,
            subject,
            email,
            Utc::now() + chrono::Duration::minutes(5),
        )
    }

    /// Signs a token for `audience` expiring at `expires_at`.
    #[must_use]
    pub fn sign_expiring(
        &self,
        audience: &str,
        subject: &str,
        email: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> String {
        let standard = StandardClaims::new(SubjectIdentifier::new(subject.to_string()))
            .set_email(email.map(|email| EndUserEmail::new(email.to_string())))
            .set_email_verified(email.map(|_| true));
        let claims = CoreIdTokenClaims::new(
            IssuerUrl::new(self.issuer.clone()).expect("test issuer URL"),
            vec![Audience::new(audience.to_string())],
            expires_at,
            Utc::now(),
            standard,
            EmptyAdditionalClaims {},
        );
        CoreIdToken::new(
            claims,
            &self.key,
            CoreJwsSigningAlgorithm::RsaSsaPkcs1V15Sha256,
            None,
            None,
        )
        .expect("signed ID token")
        .to_string()
    }
}

/// [`KeySource`] serving a fixed key set and counting fetches.
#[derive(Debug)]
pub struct StaticKeySource {
    keys: Mutex<CoreJsonWebKeySet>,
    fetches: AtomicUsize,
}

impl StaticKeySource {
    /// Serves `keys` until replaced.
    #[must_use]
    pub fn new(keys: CoreJsonWebKeySet) -> Self {
        Self {
            keys: Mutex::new(keys),
            fetches: AtomicUsize::new(0),
        }
    }

    /// Replaces the served key set.
    pub fn set_keys(&self, keys: CoreJsonWebKeySet) {
        *self.keys.lock().expect("keys lock") = keys;
    }

    /// Number of fetches so far.
    #[must_use]
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeySource for StaticKeySource {
    async fn fetch_keys(
        &self,
        _jwks_uri: &str,
        _allow_insecure: bool,
    ) -> Result<CoreJsonWebKeySet, OidcError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.keys.lock().expect("keys lock").clone())
    }
}
