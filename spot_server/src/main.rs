//! Aluminium spot feed server.
//!
//! The binary keeps one latest quote in memory and republishes it over HTTP. It wires
//! together four building blocks:
//!
//! - `AcquisitionScheduler` runs on its own thread and walks the fetch chain (HTTP probe,
//!   browser session, recent log row) every cycle, retrying within the cycle and never
//!   dying on a failed or panicking attempt.
//! - `LiveState` holds the latest snapshot and pulses subscribers when it changes.
//! - `TimeSeriesStore` appends every live quote to a CSV log through a background journal
//!   thread, and answers recovery reads when live acquisition fails.
//! - `DistributionService` answers `/data` queries, feeds `/stream` subscribers with
//!   server-sent events, and exports the log on `/download`.
//!
//! Concurrency:
//! - The scheduler is the only writer of the live state and the only owner of the browser
//!   session. Queries that need an immediate acquisition ask the scheduler through its
//!   command channel instead of touching the session themselves.
//! - HTTP handlers run on a `tokio` runtime; blocking work (queries, log reads) is moved
//!   off the async workers with `spawn_blocking`.
//!
//! Run with `RUST_LOG=debug` to see every pulse and stream connection.
#![warn(missing_docs)]
use crate::config::{Args, DriverBackend, Settings};
use crate::fetch::StrategyChain;
use crate::fetch::browser::BrowserStrategy;
use crate::fetch::cache::CacheStrategy;
use crate::fetch::document::HttpDocumentSource;
use crate::fetch::driver::{DriverFactory, HttpSessionFactory};
use crate::fetch::probe::ProbeStrategy;
use crate::model::driver_monitor::DriverSlot;
use crate::model::live_state::LiveState;
use crate::scheduler::{AcquisitionScheduler, command_channel};
use crate::service::DistributionService;
use crate::store::{TimeSeriesStore, spawn_journal};
use clap::Parser;
use log::{info, warn};
use spot_common::Result;
use std::sync::Arc;
use std::thread;
use tokio::net::TcpListener;

mod config;
mod fetch;
mod http;
mod model;
mod scheduler;
mod service;
mod store;
#[cfg(test)]
mod test_support;

/// Session factory for the browser strategy.
fn driver_factory(settings: &Settings) -> Box<dyn DriverFactory> {
    match settings.backend {
        DriverBackend::Http => Box::new(HttpSessionFactory),
        DriverBackend::Chromium => chromium_factory(settings),
    }
}

#[cfg(feature = "chromium")]
fn chromium_factory(settings: &Settings) -> Box<dyn DriverFactory> {
    use crate::fetch::chromium::ChromiumFactory;
    use crate::fetch::driver::FallbackFactory;

    Box::new(FallbackFactory::new(
        ChromiumFactory::new(settings.chrome_path.clone()),
        HttpSessionFactory,
    ))
}

#[cfg(not(feature = "chromium"))]
fn chromium_factory(_settings: &Settings) -> Box<dyn DriverFactory> {
    warn!("Built without the `chromium` feature, using the HTTP session driver");
    Box::new(HttpSessionFactory)
}

/// Chain in priority order: probe (optional), browser, cache.
///
/// Built on the scheduler thread so the blocking HTTP clients never live on the async runtime.
fn build_chain(settings: &Settings, store: Arc<TimeSeriesStore>) -> StrategyChain {
    let mut chain = StrategyChain::new();
    if settings.probe_enabled {
        match HttpDocumentSource::new() {
            Ok(source) => {
                chain = chain.with(ProbeStrategy::new(
                    source,
                    settings.url.clone(),
                    settings.selectors.clone(),
                    settings.probe_timeout,
                ));
            }
            Err(e) => warn!("Probe strategy disabled: {}", e),
        }
    }
    let slot = DriverSlot::new(driver_factory(settings), settings.driver);
    chain
        .with(BrowserStrategy::new(
            slot,
            settings.url.clone(),
            settings.selectors.clone(),
            settings.browser_timeout,
        ))
        .with(CacheStrategy::new(store, settings.cache))
}

fn main() -> Result<()> {
    init_logger();
    let settings = Settings::from(Args::parse());
    info!("Starting spot feed for {}", settings.url);

    let store = Arc::new(TimeSeriesStore::open(settings.log_path.clone())?);
    info!("Durable log at {}", store.path().display());
    let (journal, _journal_thread) = spawn_journal(Arc::clone(&store), settings.journal_depth)?;
    let live = Arc::new(LiveState::new(Some(journal)));
    let (scheduler, commands) = command_channel();

    {
        let settings = settings.clone();
        let store = Arc::clone(&store);
        let live = Arc::clone(&live);
        thread::Builder::new()
            .name("acquisition".into())
            .spawn(move || {
                let chain = build_chain(&settings, store);
                AcquisitionScheduler::new(chain, live, settings.timing, commands).run();
            })?;
    }

    let service = Arc::new(DistributionService::new(
        live,
        store,
        scheduler,
        settings.heartbeat,
        settings.on_demand_timeout,
    ));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async move {
        let listener = TcpListener::bind(&settings.bind).await?;
        http::serve(listener, service).await
    })
}

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}
