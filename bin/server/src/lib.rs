//! HTTP front for the NAS single-sign-on core.
//!
//! Wires [`nas_sso_oidc::OidcService`] into an axum router: provider
//! listing, the login redirect, the callback, session redemption and
//! provider validation.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;
