//! Command-line arguments for the spot feed client.
//!
//! This module defines the CLI interface using `clap`. See `main` for end-to-end usage.
use clap::Parser;
use spot_common::net::DEFAULT_PORT;

/// Parsed command-line arguments.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Base URL of the feed server.
    #[clap(long, default_value_t = format!("http://127.0.0.1:{DEFAULT_PORT}"))]
    pub server: String,

    /// Query the latest quote once and exit instead of subscribing.
    #[clap(long)]
    pub once: bool,

    /// Seconds to wait before reconnecting a dropped stream.
    #[clap(long, default_value_t = 5)]
    pub reconnect_secs: u64,
}
