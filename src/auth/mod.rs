//! Authenticated-session management: token storage, identity exchange,
//! request authentication, and the sign-in state machine

pub mod authenticator;
pub mod controller;
pub mod exchange;
pub mod jwt;
pub mod store;
pub mod types;

#[cfg(test)]
pub mod testutil;

pub use authenticator::RequestAuthenticator;
pub use controller::{
    IdentityProvider, NoIdentityProvider, SessionController, StaticAssertionProvider,
};
pub use exchange::{ExchangeClient, TokenResponse};
pub use store::{StorageBackend, StorageError, TokenStore};
pub use types::{
    ExchangeResult, IdentityAssertion, NegotiationOutcome, SessionState, SessionTokens,
    SignInFailure,
};
