//! Sign-in session state machine
//!
//! Drives the flow an application surface observes: Idle → Exchanging →
//! Authenticated/Failed. Tokens are persisted before `Authenticated` is
//! published, so an observer reacting to it can rely on a stored session.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::auth::{
    ExchangeClient, ExchangeResult, IdentityAssertion, NegotiationOutcome, SessionState,
    SignInFailure, TokenStore,
};
use crate::error::AppError;

/// External identity negotiation step (e.g. a platform sign-in sheet)
pub trait IdentityProvider {
    async fn negotiate(&self) -> NegotiationOutcome;
}

/// Provider for assertions obtained out of band (CLI flags, tests)
pub struct StaticAssertionProvider {
    assertion: IdentityAssertion,
}

impl StaticAssertionProvider {
    pub fn new(assertion: IdentityAssertion) -> Self {
        Self { assertion }
    }
}

impl IdentityProvider for StaticAssertionProvider {
    async fn negotiate(&self) -> NegotiationOutcome {
        NegotiationOutcome::Assertion(self.assertion.clone())
    }
}

/// Provider used where no interactive negotiation exists (dev-login only
/// surfaces)
pub struct NoIdentityProvider;

impl IdentityProvider for NoIdentityProvider {
    async fn negotiate(&self) -> NegotiationOutcome {
        NegotiationOutcome::Failed("no identity provider configured".to_string())
    }
}

/// Owns and publishes the observable sign-in state
pub struct SessionController<P> {
    provider: P,
    store: Arc<TokenStore>,
    exchange: Arc<ExchangeClient>,
    state: watch::Sender<SessionState>,
}

impl<P: IdentityProvider> SessionController<P> {
    pub fn new(provider: P, store: Arc<TokenStore>, exchange: Arc<ExchangeClient>) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            provider,
            store,
            exchange,
            state,
        }
    }

    /// Read-only stream of session states
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Current state snapshot
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Run the full sign-in flow: negotiate an identity assertion, exchange
    /// it for session tokens, persist them, and publish the outcome
    pub async fn start(&self) -> SessionState {
        self.publish(SessionState::Exchanging);

        let device_id = match self.store.ensure_device_id() {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "device id unavailable");
                return self.publish(SessionState::Failed {
                    reason: SignInFailure::Storage(e.to_string()),
                });
            }
        };

        let result = match self.provider.negotiate().await {
            NegotiationOutcome::Assertion(assertion) => {
                self.exchange.exchange(&assertion, &device_id).await
            }
            NegotiationOutcome::Cancelled => ExchangeResult::Cancelled,
            NegotiationOutcome::Failed(reason) => {
                ExchangeResult::Rejected(format!("identity negotiation failed: {}", reason))
            }
        };

        self.settle(result)
    }

    /// Re-run the sign-in flow after a failure
    pub async fn retry(&self) -> SessionState {
        self.start().await
    }

    /// Sign in through the development credential path
    pub async fn dev_login(&self, email: &str) -> SessionState {
        self.publish(SessionState::Exchanging);

        let device_id = match self.store.ensure_device_id() {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "device id unavailable");
                return self.publish(SessionState::Failed {
                    reason: SignInFailure::Storage(e.to_string()),
                });
            }
        };

        let result = self.exchange.dev_login(email, &device_id).await;
        self.settle(result)
    }

    /// Delete the persisted session and return to Idle
    pub async fn sign_out(&self) -> Result<(), AppError> {
        self.store.clear()?;
        self.publish(SessionState::Idle);
        Ok(())
    }

    fn settle(&self, result: ExchangeResult) -> SessionState {
        let next = match result {
            ExchangeResult::Authenticated(tokens) => {
                // persist before publishing Authenticated
                match self.store.save(&tokens) {
                    Ok(()) => {
                        info!(
                            email = tokens.user_email.as_deref().unwrap_or("<unknown>"),
                            "signed in"
                        );
                        SessionState::Authenticated {
                            email: tokens.user_email,
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to persist session tokens");
                        SessionState::Failed {
                            reason: SignInFailure::Storage(e.to_string()),
                        }
                    }
                }
            }
            ExchangeResult::Rejected(reason) => SessionState::Failed {
                reason: SignInFailure::Rejected(reason),
            },
            ExchangeResult::Cancelled => SessionState::Failed {
                reason: SignInFailure::Cancelled,
            },
            ExchangeResult::TransportError(detail) => SessionState::Failed {
                reason: SignInFailure::Transport(detail),
            },
        };

        self.publish(next)
    }

    fn publish(&self, next: SessionState) -> SessionState {
        self.state.send_replace(next.clone());
        next
    }
}
