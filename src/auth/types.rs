//! Core session types shared across the auth components

use serde::{Deserialize, Serialize};

/// Tokens issued by the backend for an authenticated session
///
/// The access/refresh pair is persisted and replaced as a unit; a session
/// never exists with only one half of the pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub device_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
}

/// Opaque identity-provider token, consumed once per exchange attempt and
/// never persisted
#[derive(Debug, Clone)]
pub struct IdentityAssertion(String);

impl IdentityAssertion {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Outcome of an identity exchange or token refresh call
#[derive(Debug, Clone)]
pub enum ExchangeResult {
    Authenticated(SessionTokens),
    Rejected(String),
    Cancelled,
    TransportError(String),
}

/// Result of the external identity negotiation step
#[derive(Debug)]
pub enum NegotiationOutcome {
    Assertion(IdentityAssertion),
    Cancelled,
    Failed(String),
}

/// Why a sign-in attempt ended in `SessionState::Failed`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignInFailure {
    /// The user dismissed the identity negotiation; retry is offered without
    /// alarming messaging
    Cancelled,
    /// The backend or provider declined the credential
    Rejected(String),
    /// Network-level failure; retrying may succeed
    Transport(String),
    /// Local persistence failed; treated as signed out
    Storage(String),
}

/// Observable sign-in state published by the session controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Exchanging,
    Authenticated { email: Option<String> },
    Failed { reason: SignInFailure },
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated { .. })
    }
}
