//! Core domain types for the NAS single-sign-on core.
//!
//! This crate provides the types shared by the authorization, OIDC, and
//! server crates: provider definitions, their authorization rules, and the
//! claims decoded from an ID token.

pub mod claims;
pub mod id;
pub mod provider;

pub use claims::IdTokenClaims;
pub use id::{ParseIdError, ProviderId};
pub use provider::{AuthorizationRule, Provider, RuleMode, RuleOperator};
