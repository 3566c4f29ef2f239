//! HTTP client utilities
//!
//! Provides a reqwest::Client configured with timeouts and the crate user agent

use reqwest::Client;
use std::time::Duration;

/// Build a reqwest Client with the given timeout
pub fn client_with_timeout(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("shopcart/", env!("CARGO_PKG_VERSION")))
        .build()
        .expect("Failed to create HTTP client")
}

/// Default client used for backend calls
pub fn default_client() -> Client {
    client_with_timeout(Duration::from_secs(30))
}
