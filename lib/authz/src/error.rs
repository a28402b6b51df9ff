//! Authorization error types.

use nas_sso_core::{ProviderId, RuleMode};
use std::fmt;

/// Authorization errors.
///
/// Messages are descriptive on purpose: they are shown to operators who
/// configure rules, and never contain token material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthzError {
    /// The provider has no rules, so nobody may sign in through it.
    NoRulesConfigured {
        /// The provider that has no rules.
        provider: ProviderId,
    },
    /// A rule is malformed.
    InvalidRule {
        /// The provider owning the rule.
        provider: ProviderId,
        /// One-based position of the rule.
        index: usize,
        /// What is wrong with it.
        reason: String,
    },
    /// The claims did not satisfy the rules.
    Denied {
        /// The provider whose rules rejected the login.
        provider: ProviderId,
        /// How the rules were combined.
        mode: RuleMode,
        /// Which rule failed, or that none matched.
        reason: String,
    },
}

impl fmt::Display for AuthzError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoRulesConfigured { provider } => write!(
                f,
                "login denied: no authorization rules configured for provider '{provider}'"
            ),
            Self::InvalidRule {
                provider,
                index,
                reason,
            } => write!(
                f,
                "invalid authorization rule #{index} on provider '{provider}': {reason}"
            ),
            Self::Denied {
                provider,
                mode,
                reason,
            } => write!(
                f,
                "login denied by provider '{provider}' ({mode} mode): {reason}"
            ),
        }
    }
}

impl std::error::Error for AuthzError {}
