//! Claim-based authorization for single sign-on.
//!
//! An authenticated user only obtains a session if the claims in their ID
//! token satisfy the provider's authorization rules. Rules are operator
//! configuration, so failures are reported with enough detail for an
//! administrator to see which rule rejected the login.

mod error;
mod rules;

pub use error::AuthzError;
pub use rules::ClaimRuleEvaluator;
