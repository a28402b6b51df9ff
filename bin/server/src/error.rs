//! HTTP error responses for the authentication routes.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use nas_sso_oidc::OidcError;
use serde_json::json;
use std::fmt;

/// Authentication errors.
#[derive(Debug)]
pub enum AuthError {
    /// The login was refused; the message is safe to show the user.
    Unauthorized(String),
    /// No provider with this ID is configured.
    ProviderNotFound(String),
    /// The provider redirected back with an error instead of a code.
    ProviderRefused {
        error: String,
        description: Option<String>,
    },
    /// The callback carried no authorization code or state.
    MissingParameter(&'static str),
    /// No session cookie, or the session was already redeemed.
    MissingSession,
    /// Anything else; logged, never shown.
    Internal(String),
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthorized(msg) => write!(f, "{msg}"),
            Self::ProviderNotFound(id) => write!(f, "provider '{id}' not found"),
            Self::ProviderRefused { error, .. } => write!(f, "provider returned error '{error}'"),
            Self::MissingParameter(name) => write!(f, "missing callback parameter '{name}'"),
            Self::MissingSession => write!(f, "no active session"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for AuthError {}

impl From<OidcError> for AuthError {
    fn from(err: OidcError) -> Self {
        if err.is_unauthorized() {
            Self::Unauthorized(err.client_message().to_string())
        } else {
            Self::Internal(err.to_string())
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            Self::ProviderNotFound(_) => {
                (StatusCode::NOT_FOUND, "Provider not found".to_string())
            }
            Self::ProviderRefused { error, description } => {
                tracing::warn!(
                    error = %error,
                    description = description.as_deref().unwrap_or(""),
                    "Identity provider returned an error"
                );
                (StatusCode::UNAUTHORIZED, "Authentication failed".to_string())
            }
            Self::MissingParameter(name) => (
                StatusCode::BAD_REQUEST,
                format!("Missing callback parameter: {name}"),
            ),
            Self::MissingSession => (StatusCode::UNAUTHORIZED, "No active session".to_string()),
            Self::Internal(msg) => {
                tracing::error!("Request failed: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
