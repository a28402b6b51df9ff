//! Sessions handed out after a successful callback.
//!
//! The callback produces an opaque, short-lived session token. The caller
//! redeems it once (typically to mint its own long-lived session) and it
//! is then gone.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nas_sso_core::ProviderId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, instrument};
use ulid::Ulid;

use crate::error::OidcError;

/// Unique identifier for a session; also the opaque token handed to the client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generates a new random session ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("sess_{}", Ulid::new()))
    }

    /// Returns the session ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// An authenticated identity awaiting redemption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    id: SessionId,
    provider_id: ProviderId,
    subject: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl Session {
    /// Creates a session valid for `ttl`.
    #[must_use]
    pub fn new(id: SessionId, provider_id: ProviderId, subject: String, ttl: Duration) -> Self {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        Self {
            id,
            provider_id,
            subject,
            created_at: now,
            expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    /// Returns the session ID.
    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Returns the provider the user signed in with.
    #[must_use]
    pub fn provider_id(&self) -> &ProviderId {
        &self.provider_id
    }

    /// Returns the subject identifier issued by the provider.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Returns when the session was created.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns when the session expires.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Returns true if the session has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Creates a session for an authenticated subject.
#[async_trait]
pub trait SessionIssuer: Send + Sync {
    /// Creates a session and returns its opaque token.
    async fn create_session(
        &self,
        provider_id: &ProviderId,
        subject: &str,
    ) -> Result<String, OidcError>;
}

/// In-memory [`SessionIssuer`] with single-use redemption.
#[derive(Debug)]
pub struct MemorySessionStore {
    ttl: Duration,
    sessions: Mutex<HashMap<SessionId, Session>>,
}

impl MemorySessionStore {
    /// Creates a store whose sessions live for `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Consumes a session token, returning the session if it is still valid.
    pub async fn redeem(&self, token: &str) -> Option<Session> {
        let session = self
            .sessions
            .lock()
            .await
            .remove(&SessionId::from(token))?;
        if session.is_expired() {
            debug!(session_id = %session.id(), "session expired before redemption");
            return None;
        }
        Some(session)
    }

    /// Removes expired sessions and returns how many were dropped.
    pub async fn purge_expired(&self) -> usize {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, session| !session.is_expired());
        before - sessions.len()
    }

    /// Returns the number of stored sessions.
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Returns true if no sessions are stored.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl SessionIssuer for MemorySessionStore {
    #[instrument(skip(self, subject))]
    async fn create_session(
        &self,
        provider_id: &ProviderId,
        subject: &str,
    ) -> Result<String, OidcError> {
        let session = Session::new(
            SessionId::generate(),
            provider_id.clone(),
            subject.to_string(),
            self.ttl,
        );
        let token = session.id().to_string();
        self.sessions
            .lock()
            .await
            .insert(session.id().clone(), session);
        debug!("session created");
        Ok(token)
    }
}
