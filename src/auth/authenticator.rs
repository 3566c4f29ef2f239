//! Outbound request authentication and 401-triggered token refresh
//!
//! Every backend request goes out with the current access token attached. An
//! authorization failure blocks the request chain while a new token pair is
//! minted; concurrent failures coalesce onto one in-flight refresh and share
//! its outcome instead of issuing duplicate refresh calls.

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Request, Response, StatusCode};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::auth::{ExchangeClient, ExchangeResult, TokenStore};
use crate::error::AppError;

/// A request chain that has already seen this many responses is surfaced
/// as-is; caps retries at one refresh-and-reissue cycle.
const MAX_CHAIN_RESPONSES: usize = 2;

type RefreshFlight = Shared<BoxFuture<'static, Option<String>>>;

/// Attaches session tokens to outbound requests and refreshes them on
/// authorization failure
pub struct RequestAuthenticator {
    http: reqwest::Client,
    store: Arc<TokenStore>,
    exchange: Arc<ExchangeClient>,
    refresh_flight: Arc<Mutex<Option<RefreshFlight>>>,
}

impl RequestAuthenticator {
    pub fn new(http: reqwest::Client, store: Arc<TokenStore>, exchange: Arc<ExchangeClient>) -> Self {
        Self {
            http,
            store,
            exchange,
            refresh_flight: Arc::new(Mutex::new(None)),
        }
    }

    /// Build and execute an authenticated GET
    pub async fn get(&self, url: &str) -> Result<Response, AppError> {
        let request = self.http.get(url).build()?;
        self.execute(request).await
    }

    /// Send `request` with the current access token attached. On a 401 the
    /// chain suspends until a refresh settles, then the request is reissued
    /// once with the new token; any further 401 is returned to the caller.
    pub async fn execute(&self, request: Request) -> Result<Response, AppError> {
        let mut access = self.current_access_token();
        let mut pending = request;
        let mut responses = 0usize;

        loop {
            let retry = pending.try_clone();
            let mut outgoing = pending;
            if let Some(token) = access.as_deref() {
                set_bearer(&mut outgoing, token)?;
            }

            let response = self.http.execute(outgoing).await?;
            responses += 1;

            if response.status() != StatusCode::UNAUTHORIZED {
                return Ok(response);
            }

            if responses >= MAX_CHAIN_RESPONSES {
                debug!("authorization retries exhausted, surfacing response");
                return Ok(response);
            }

            let Some(retry_request) = retry else {
                debug!("request body cannot be replayed, surfacing response");
                return Ok(response);
            };

            match self.refreshed_access_token(access.take()).await {
                Some(token) => {
                    access = Some(token);
                    pending = retry_request;
                }
                None => return Ok(response),
            }
        }
    }

    /// Access token to attach, if any. An unreadable store behaves like a
    /// missing session.
    fn current_access_token(&self) -> Option<String> {
        match self.store.read() {
            Ok(Some(tokens)) => Some(tokens.access_token),
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "token store unreadable, sending unauthenticated");
                None
            }
        }
    }

    /// Resolve a usable access token after `failed_access` was rejected,
    /// joining the in-flight refresh if one exists. Returns None when the
    /// original authorization failure should be surfaced.
    async fn refreshed_access_token(&self, failed_access: Option<String>) -> Option<String> {
        let flight = {
            let mut slot = self.refresh_flight.lock().await;

            // A concurrent chain may have refreshed while this one was
            // failing; its tokens are already in the store.
            match self.store.read() {
                Ok(Some(tokens))
                    if failed_access.as_deref() != Some(tokens.access_token.as_str()) =>
                {
                    debug!("access token already replaced, retrying without refresh");
                    return Some(tokens.access_token);
                }
                Ok(Some(_)) => {}
                Ok(None) => return None,
                Err(e) => {
                    warn!(error = %e, "token store unreadable, aborting refresh");
                    return None;
                }
            }

            match slot.as_ref() {
                Some(flight) => flight.clone(),
                None => {
                    let flight = run_refresh(
                        self.store.clone(),
                        self.exchange.clone(),
                        self.refresh_flight.clone(),
                    )
                    .boxed()
                    .shared();
                    *slot = Some(flight.clone());
                    flight
                }
            }
        };

        flight.await
    }
}

/// Perform one refresh and clear the flight slot so later chains start a
/// fresh attempt
async fn run_refresh(
    store: Arc<TokenStore>,
    exchange: Arc<ExchangeClient>,
    slot: Arc<Mutex<Option<RefreshFlight>>>,
) -> Option<String> {
    let outcome = refresh_once(&store, &exchange).await;
    *slot.lock().await = None;
    outcome
}

async fn refresh_once(store: &TokenStore, exchange: &ExchangeClient) -> Option<String> {
    let current = match store.read() {
        Ok(Some(tokens)) => tokens,
        Ok(None) => return None,
        Err(e) => {
            warn!(error = %e, "token store unreadable, aborting refresh");
            return None;
        }
    };

    match exchange
        .refresh(&current.refresh_token, &current.device_id)
        .await
    {
        ExchangeResult::Authenticated(new_tokens) => {
            // the refresh response carries no profile fields; keep the old ones
            let mut merged = new_tokens;
            if merged.user_email.is_none() {
                merged.user_email = current.user_email;
            }
            if merged.user_name.is_none() {
                merged.user_name = current.user_name;
            }

            // persist before the blocked chain reissues its request
            if let Err(e) = store.save(&merged) {
                warn!(error = %e, "failed to persist refreshed tokens");
                return None;
            }
            info!("session tokens refreshed");
            Some(merged.access_token)
        }
        ExchangeResult::Rejected(reason) => {
            warn!(%reason, "token refresh rejected");
            None
        }
        ExchangeResult::TransportError(detail) => {
            warn!(%detail, "token refresh failed");
            None
        }
        ExchangeResult::Cancelled => None,
    }
}

fn set_bearer(request: &mut Request, token: &str) -> Result<(), AppError> {
    let value = HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|e| AppError::InvalidInput(format!("invalid access token: {}", e)))?;
    request.headers_mut().insert(AUTHORIZATION, value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::testutil::{ApiMode, FakeBackend};
    use crate::auth::SessionTokens;
    use crate::http;
    use std::time::Duration;

    fn seeded_store(access: &str, refresh: &str) -> Arc<TokenStore> {
        let store = TokenStore::in_memory();
        store
            .save(&SessionTokens {
                access_token: access.to_string(),
                refresh_token: refresh.to_string(),
                device_id: "device-1".to_string(),
                user_email: Some("alice@example.com".to_string()),
                user_name: None,
            })
            .unwrap();
        Arc::new(store)
    }

    fn authenticator(store: Arc<TokenStore>, base_url: &str) -> RequestAuthenticator {
        let exchange = Arc::new(ExchangeClient::new(base_url));
        RequestAuthenticator::new(http::default_client(), store, exchange)
    }

    #[tokio::test]
    async fn test_empty_store_sends_unauthenticated() {
        let backend = FakeBackend::spawn(ApiMode::AcceptAll, "{}").await;
        let store = Arc::new(TokenStore::in_memory());
        let auth = authenticator(store, &backend.base_url());

        let response = auth
            .get(&format!("{}/carts", backend.base_url()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(backend.bearers(), vec![None]);
        assert_eq!(backend.refresh_count(), 0);
    }

    #[tokio::test]
    async fn test_unreadable_store_behaves_like_a_miss() {
        let backend = FakeBackend::spawn(ApiMode::AcceptAll, "{}").await;
        // a directory path makes every read fail
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(TokenStore::file_backed(dir.path().to_path_buf()));
        assert!(store.read().is_err());

        let auth = authenticator(store, &backend.base_url());
        let response = auth
            .get(&format!("{}/carts", backend.base_url()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(backend.bearers(), vec![None]);
    }

    #[tokio::test]
    async fn test_refresh_and_reissue_on_401() {
        let backend = FakeBackend::spawn(
            ApiMode::RejectToken("a1".to_string()),
            r#"{"accessToken":"a2","refreshToken":"r2"}"#,
        )
        .await;
        let store = seeded_store("a1", "r1");
        let auth = authenticator(store.clone(), &backend.base_url());

        let response = auth
            .get(&format!("{}/carts", backend.base_url()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(backend.refresh_count(), 1);
        assert_eq!(
            backend.bearers(),
            vec![
                Some("Bearer a1".to_string()),
                Some("Bearer a2".to_string())
            ]
        );

        let tokens = store.read().unwrap().unwrap();
        assert_eq!(tokens.access_token, "a2");
        assert_eq!(tokens.refresh_token, "r2");
        // profile fields carry over from the previous session
        assert_eq!(tokens.user_email.as_deref(), Some("alice@example.com"));
    }

    #[tokio::test]
    async fn test_rejected_refresh_surfaces_original_401() {
        let backend = FakeBackend::spawn(
            ApiMode::AlwaysReject,
            r#"{"error":"invalid_grant"}"#,
        )
        .await;
        let store = seeded_store("a1", "r1");
        let auth = authenticator(store.clone(), &backend.base_url());

        let response = auth
            .get(&format!("{}/carts", backend.base_url()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(backend.refresh_count(), 1);
        // no retry after a failed refresh
        assert_eq!(backend.api_count(), 1);

        let tokens = store.read().unwrap().unwrap();
        assert_eq!(tokens.access_token, "a1");
        assert_eq!(tokens.refresh_token, "r1");
    }

    #[tokio::test]
    async fn test_refresh_cap_surfaces_second_401() {
        // refresh succeeds but the API keeps rejecting; the chain must stop
        // after one refresh-and-reissue cycle
        let backend = FakeBackend::spawn(
            ApiMode::AlwaysReject,
            r#"{"accessToken":"a2","refreshToken":"r2"}"#,
        )
        .await;
        let store = seeded_store("a1", "r1");
        let auth = authenticator(store, &backend.base_url());

        let response = auth
            .get(&format!("{}/carts", backend.base_url()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(backend.refresh_count(), 1);
        assert_eq!(backend.api_count(), 2);
    }

    #[tokio::test]
    async fn test_no_refresh_without_a_session() {
        let backend = FakeBackend::spawn(ApiMode::AlwaysReject, "{}").await;
        let store = Arc::new(TokenStore::in_memory());
        let auth = authenticator(store, &backend.base_url());

        let response = auth
            .get(&format!("{}/carts", backend.base_url()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(backend.refresh_count(), 0);
        assert_eq!(backend.api_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_401s_share_one_refresh() {
        let backend = FakeBackend::spawn_with_auth_delay(
            ApiMode::RejectToken("a1".to_string()),
            r#"{"accessToken":"a2","refreshToken":"r2"}"#,
            Duration::from_millis(100),
        )
        .await;
        let store = seeded_store("a1", "r1");
        let auth = Arc::new(authenticator(store, &backend.base_url()));

        let url = format!("{}/carts", backend.base_url());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let auth = auth.clone();
            let url = url.clone();
            handles.push(tokio::spawn(async move { auth.get(&url).await }));
        }

        for handle in handles {
            let response = handle.await.unwrap().unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        assert_eq!(backend.refresh_count(), 1);
    }
}
