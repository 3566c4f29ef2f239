//! CLI mode implementation
//!
//! Provides the command-line interface for the shopcart session tools

use clap::{Parser, Subcommand};

/// Shopcart CLI
#[derive(Parser)]
#[command(name = "shopcart")]
#[command(about = "SuperShopperCart session and account utility", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-error output (no short flag to avoid conflicts)
    #[arg(long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sign in to the backend
    Login(LoginArgs),
    /// Clear the stored session
    Logout,
    /// Show the stored session status
    Status,
    /// Perform an authenticated GET against the backend
    Fetch(FetchArgs),
}

/// Login command arguments
#[derive(Parser, Debug)]
pub struct LoginArgs {
    /// Email for the development login path
    #[arg(short, long)]
    pub email: Option<String>,

    /// Google ID token obtained out of band
    #[arg(long, value_name = "TOKEN")]
    pub google_token: Option<String>,

    /// Backend base URL override
    #[arg(short = 's', long)]
    pub server: Option<String>,
}

/// Fetch command arguments
#[derive(Parser, Debug)]
pub struct FetchArgs {
    /// Path relative to the backend base URL (e.g. carts)
    pub path: String,
}
