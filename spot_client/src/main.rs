//! Spot feed client: subscribes to the server's event stream and logs every quote.
//!
//! Usage example (CLI):
//! ```bash
//! spot_client --server http://192.168.0.10:5003
//! spot_client --once
//! ```
//!
//! Quotes are logged at `info`, heartbeats at `debug` (`RUST_LOG=debug`).
#![warn(missing_docs)]
mod args;
mod subscriber;

use crate::args::Args;
use crate::subscriber::{StreamSubscriber, log_quote};
use clap::Parser;
use log::{error, info, warn};
use spot_common::{FeedError, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

fn main() -> Result<()> {
    init_logger();
    let args = Args::parse();
    let subscriber = StreamSubscriber::new(&args.server)?;

    if args.once {
        let response = subscriber.query()?;
        match (&response.data, &response.note) {
            (Some(quote), note) => {
                log_quote(quote);
                if let Some(note) = note {
                    warn!("{}", note);
                }
            }
            (None, _) => error!("No quote: {}", response.error.as_deref().unwrap_or("unknown error")),
        }
        return Ok(());
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            info!("Ctrl+C received. Shutting down client...");
            shutdown.store(true, Ordering::SeqCst);
        })
        .map_err(|e| FeedError::ResourceCreation(format!("Ctrl+C handler: {e}")))?;
    }

    subscriber.run(shutdown, Duration::from_secs(args.reconnect_secs));
    Ok(())
}

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}
