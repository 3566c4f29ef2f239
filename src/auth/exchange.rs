//! Identity exchange and token refresh against the backend
//!
//! The three auth endpoints share one response shape, so a single mapping
//! function interprets every reply: success iff HTTP success, both tokens
//! present and non-empty, and no error field.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::auth::{jwt, ExchangeResult, IdentityAssertion, SessionTokens};
use crate::http;

/// Response body shared by /auth/google, /auth/dev-login and /auth/refresh
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TokenResponse {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub error: Option<String>,
}

/// Request body for the development login endpoint
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DevLoginRequest<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    device_id: Option<&'a str>,
}

/// Client for the backend's authentication endpoints
pub struct ExchangeClient {
    client: reqwest::Client,
    base_url: String,
}

impl ExchangeClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(http::default_client(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    /// Exchange a third-party identity assertion for session tokens
    pub async fn exchange(&self, assertion: &IdentityAssertion, device_id: &str) -> ExchangeResult {
        let url = format!("{}/auth/google", self.base_url);
        let request = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", assertion.as_str()))
            .header("X-Device-Id", device_id)
            .json(&serde_json::json!({}));

        self.send(request, device_id).await
    }

    /// Sign in through the development credential path
    pub async fn dev_login(&self, email: &str, device_id: &str) -> ExchangeResult {
        let url = format!("{}/auth/dev-login", self.base_url);
        let request = self.client.post(&url).json(&DevLoginRequest {
            email,
            device_id: Some(device_id),
        });

        self.send(request, device_id).await
    }

    /// Mint a new token pair from a refresh token
    pub async fn refresh(&self, refresh_token: &str, device_id: &str) -> ExchangeResult {
        let url = format!("{}/auth/refresh", self.base_url);
        let request = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", refresh_token))
            .header("X-Device-Id", device_id);

        self.send(request, device_id).await
    }

    async fn send(&self, request: reqwest::RequestBuilder, device_id: &str) -> ExchangeResult {
        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => return ExchangeResult::TransportError(e.to_string()),
        };

        let status = response.status();
        let body: TokenResponse = match response.json().await {
            Ok(b) => b,
            Err(e) => {
                debug!(error = %e, "unreadable auth response body");
                TokenResponse::default()
            }
        };

        map_response(status, body, device_id)
    }
}

/// The single interpretation of the token-response wire shape, used by all
/// three endpoints
pub fn map_response(status: StatusCode, body: TokenResponse, device_id: &str) -> ExchangeResult {
    let TokenResponse {
        access_token,
        refresh_token,
        error,
    } = body;

    if let Some(reason) = error.filter(|e| !e.is_empty()) {
        return ExchangeResult::Rejected(reason);
    }

    match (access_token, refresh_token) {
        (Some(access), Some(refresh))
            if status.is_success() && !access.is_empty() && !refresh.is_empty() =>
        {
            let user_email = jwt::email(&access);
            ExchangeResult::Authenticated(SessionTokens {
                access_token: access,
                refresh_token: refresh,
                device_id: device_id.to_string(),
                user_email,
                user_name: None,
            })
        }
        _ => ExchangeResult::Rejected(format!("authentication failed with status {}", status)),
    }
}
