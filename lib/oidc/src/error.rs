//! Error types for the OIDC crate.
//!
//! - `StateError`: typed outcomes of state-token issuance and validation.
//!   These are safe to report verbatim; they never contain secret material.
//! - `OidcError`: failures of the login and callback flows and of the
//!   collaborators behind them. Only `Unauthorized` carries a message meant
//!   for the client; everything else is logged and replaced by a generic
//!   message before it leaves the callback flow.

use std::fmt;

/// Message returned to the client for any callback failure that is not
/// already an explicit authorization decision.
pub const GENERIC_AUTH_FAILURE: &str = "Authentication failed";

/// Reasons a state token is rejected, or could not be issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// The token is structurally malformed.
    Format {
        /// Which part of the structure is wrong.
        reason: &'static str,
    },
    /// The token was issued for a different provider.
    ProviderMismatch,
    /// The signature does not match the nonce and timestamp.
    InvalidSignature,
    /// The nonce was never issued, was already consumed, or expired.
    NotFound,
    /// The backing store failed.
    Store {
        /// Error details.
        details: String,
    },
}

/// Errors from the OIDC login and callback flows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OidcError {
    /// Authentication or authorization was refused. The message is safe to
    /// show to the client.
    Unauthorized(String),
    /// Configuration error (invalid URLs, missing endpoints, etc.)
    Configuration(String),
    /// Failed to discover provider metadata.
    Discovery(String),
    /// Token exchange failed.
    TokenExchange(String),
    /// Token validation failed.
    TokenValidation(String),
    /// A backing store failed.
    Store(String),
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Format { reason } => write!(f, "Invalid state format: {reason}"),
            Self::ProviderMismatch => write!(f, "Provider ID mismatch"),
            Self::InvalidSignature => write!(f, "Invalid state signature"),
            Self::NotFound => write!(f, "State not found or already used"),
            Self::Store { details } => write!(f, "State store unavailable: {details}"),
        }
    }
}

impl std::error::Error for StateError {}

impl fmt::Display for OidcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthorized(msg) => write!(f, "{msg}"),
            Self::Configuration(msg) => write!(f, "OIDC configuration error: {msg}"),
            Self::Discovery(msg) => write!(f, "OIDC discovery error: {msg}"),
            Self::TokenExchange(msg) => write!(f, "OIDC token exchange error: {msg}"),
            Self::TokenValidation(msg) => write!(f, "OIDC token validation error: {msg}"),
            Self::Store(msg) => write!(f, "OIDC store error: {msg}"),
        }
    }
}

impl std::error::Error for OidcError {}

impl OidcError {
    /// Creates an `Unauthorized` error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    /// Returns true if this is an explicit authentication/authorization refusal.
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }

    /// Returns the message that may be shown to the client.
    #[must_use]
    pub fn client_message(&self) -> &str {
        match self {
            Self::Unauthorized(message) => message,
            _ => GENERIC_AUTH_FAILURE,
        }
    }
}

impl From<StateError> for OidcError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::Store { details } => Self::Store(details),
            other => Self::Unauthorized(format!("Invalid state: {other}")),
        }
    }
}
