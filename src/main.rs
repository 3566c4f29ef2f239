//! shopcart CLI
//!
//! Command-line client for the SuperShopperCart backend: sign in, inspect
//! the stored session, and make authenticated requests.

mod cli;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{debug, info};

use shopcart::auth::{
    self, ExchangeClient, IdentityAssertion, NoIdentityProvider, RequestAuthenticator,
    SessionController, SessionState, SignInFailure, StaticAssertionProvider, StorageBackend,
    TokenStore,
};
use shopcart::error::AppError;
use shopcart::{config, http};

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity flags
    let log_level = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_writer(std::io::stderr) // Log to stderr to keep stdout clean
        .init();

    let result = match cli.command {
        Some(Commands::Login(args)) => execute_login(args).await,
        Some(Commands::Logout) => execute_logout().await,
        Some(Commands::Status) => execute_status().await,
        Some(Commands::Fetch(args)) => execute_fetch(args).await,
        None => {
            eprintln!("Error: No command specified. Use --help for usage information.");
            std::process::exit(1);
        }
    };

    match result {
        Ok(output) => {
            println!("{}", output);
            Ok(())
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(e.exit_code());
        }
    }
}

fn open_store() -> Result<Arc<TokenStore>, AppError> {
    Ok(Arc::new(TokenStore::open()?))
}

fn load_backend_config(server_override: Option<String>) -> Result<config::AppConfig, AppError> {
    let mut cfg = config::load_config().map_err(|e| AppError::ConfigError(e.to_string()))?;

    if let Some(server) = server_override {
        cfg.api_base_url = server.trim_end_matches('/').to_string();
        cfg.api_base()
            .map_err(|e| AppError::ConfigError(e.to_string()))?;
        // remember the override so later commands hit the same backend
        config::save_config(&cfg).map_err(|e| AppError::ConfigError(e.to_string()))?;
        info!(api_base_url = %cfg.api_base_url, "saved backend base URL");
    } else {
        cfg.api_base()
            .map_err(|e| AppError::ConfigError(e.to_string()))?;
    }

    Ok(cfg)
}

/// Execute the login command
async fn execute_login(args: cli::LoginArgs) -> Result<String, AppError> {
    let cfg = load_backend_config(args.server)?;
    if let Some(client_id) = &cfg.google_client_id {
        debug!(%client_id, "identity negotiation configured for server client id");
    }

    let store = open_store()?;
    let exchange = Arc::new(ExchangeClient::new(cfg.api_base_url));

    let state = if let Some(token) = args.google_token {
        let provider = StaticAssertionProvider::new(IdentityAssertion::new(token));
        let controller = SessionController::new(provider, store.clone(), exchange);
        controller.start().await
    } else if let Some(email) = args.email {
        let controller = SessionController::new(NoIdentityProvider, store.clone(), exchange);
        controller.dev_login(&email).await
    } else {
        return Err(AppError::InvalidInput(
            "Provide --email for dev login or --google-token for a Google identity token"
                .to_string(),
        ));
    };

    match state {
        SessionState::Authenticated { email } => Ok(format!(
            "✓ Signed in{}\n  Storage: {}",
            email.map(|e| format!(" as {}", e)).unwrap_or_default(),
            backend_label(store.backend()),
        )),
        SessionState::Failed {
            reason: SignInFailure::Cancelled,
        } => Err(AppError::InvalidInput("Sign-in cancelled".to_string())),
        SessionState::Failed {
            reason: SignInFailure::Rejected(reason),
        } => Err(AppError::InvalidInput(format!(
            "Sign-in rejected: {}",
            reason
        ))),
        SessionState::Failed {
            reason: SignInFailure::Transport(detail),
        } => Err(AppError::NetworkError(detail)),
        SessionState::Failed {
            reason: SignInFailure::Storage(detail),
        } => Err(AppError::StorageError(detail)),
        other => Err(AppError::Internal(format!(
            "unexpected sign-in state: {:?}",
            other
        ))),
    }
}

/// Execute the logout command
async fn execute_logout() -> Result<String, AppError> {
    let store = open_store()?;
    store.clear()?;
    Ok("✓ Signed out and cleared stored session".to_string())
}

/// Execute the status command
async fn execute_status() -> Result<String, AppError> {
    let store = open_store()?;
    let device_id = store.ensure_device_id()?;

    match store.read() {
        Ok(Some(tokens)) => {
            let expires = auth::jwt::expiry(&tokens.access_token)
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "unknown".to_string());
            let expired_note = if auth::jwt::is_expired(&tokens.access_token) {
                " (expired)"
            } else {
                ""
            };
            Ok(format!(
                "Signed in{}\n  Device: {}\n  Access token expires: {}{}\n  Storage: {}",
                tokens
                    .user_email
                    .map(|e| format!(" as {}", e))
                    .unwrap_or_default(),
                device_id,
                expires,
                expired_note,
                backend_label(store.backend()),
            ))
        }
        Ok(None) => Ok(format!("Signed out\n  Device: {}", device_id)),
        // an unreadable store is treated as signed out
        Err(e) => Ok(format!(
            "Signed out (store unreadable: {})\n  Device: {}",
            e, device_id
        )),
    }
}

/// Execute the fetch command
async fn execute_fetch(args: cli::FetchArgs) -> Result<String, AppError> {
    let api_base = load_backend_config(None)?.api_base_url;
    let store = open_store()?;
    let exchange = Arc::new(ExchangeClient::new(api_base.clone()));
    let authenticator = RequestAuthenticator::new(http::default_client(), store, exchange);

    let url = format!(
        "{}/{}",
        api_base.trim_end_matches('/'),
        args.path.trim_start_matches('/')
    );
    info!(%url, "fetching");

    let response = authenticator.get(&url).await?;
    let status = response.status();
    let body = response.text().await?;

    if status.is_success() {
        Ok(body)
    } else {
        Err(AppError::NetworkError(format!(
            "{} returned {}",
            url, status
        )))
    }
}

fn backend_label(backend: StorageBackend) -> &'static str {
    match backend {
        StorageBackend::Keyring => "OS keyring",
        StorageBackend::File => "file",
        StorageBackend::Memory => "memory",
    }
}
