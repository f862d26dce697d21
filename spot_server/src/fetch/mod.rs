//! Acquisition strategies and the ordered chain that runs them.
//!
//! A `FetchStrategy` is one way of obtaining a `Quote`: a lightweight page probe, a
//! browser-session scrape, or the newest row of the durable log. `StrategyChain` tries
//! them strictly in priority order and stops at the first success, so later strategies
//! (and their side effects) are never touched once a quote is in hand. Individual failures
//! never escape the chain; only the exhaustion of every strategy is reported, as
//! `FeedError::Exhausted` with a per-strategy summary.

pub mod browser;
pub mod cache;
#[cfg(feature = "chromium")]
pub mod chromium;
pub mod document;
pub mod driver;
pub mod probe;

use chrono::NaiveDateTime;
use log::{debug, warn};
use spot_common::{FeedError, Quote, Result};
use std::time::Duration;

/// Per-attempt inputs shared by all strategies of one chain run.
#[derive(Debug, Clone, Copy)]
pub struct AttemptContext {
    /// Local wall-clock time stamped onto new quotes and used for cache ages.
    pub now: NaiveDateTime,
    /// How long the pipeline has been failing without a live success.
    pub failing_for: Duration,
}

impl AttemptContext {
    /// Context for the current local time.
    pub fn now(failing_for: Duration) -> Self {
        Self {
            now: chrono::Local::now().naive_local(),
            failing_for,
        }
    }
}

/// One independently fallible method of producing a quote.
pub trait FetchStrategy: Send {
    /// Short name used in logs and failure summaries.
    fn name(&self) -> &'static str;

    /// Try to produce a quote.
    fn attempt(&mut self, ctx: &AttemptContext) -> Result<Quote>;
}

/// Strategies in priority order.
#[derive(Default)]
pub struct StrategyChain {
    strategies: Vec<Box<dyn FetchStrategy>>,
}

impl StrategyChain {
    /// Empty chain; every run fails until strategies are added.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a strategy with lower priority than those already present.
    pub fn with(mut self, strategy: impl FetchStrategy + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    /// Names in the order they are tried.
    pub fn names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Try each strategy until one returns a quote.
    pub fn run(&mut self, ctx: &AttemptContext) -> Result<Quote> {
        let mut failures = Vec::with_capacity(self.strategies.len());
        for strategy in self.strategies.iter_mut() {
            match strategy.attempt(ctx) {
                Ok(quote) => {
                    debug!("Strategy {} produced {}", strategy.name(), quote.value);
                    return Ok(quote);
                }
                Err(e) => {
                    warn!("Strategy {} failed: {}", strategy.name(), e);
                    failures.push(format!("{}: {}", strategy.name(), e));
                }
            }
        }
        if failures.is_empty() {
            return Err(FeedError::Exhausted("no strategies configured".into()));
        }
        Err(FeedError::Exhausted(failures.join("; ")))
    }
}
