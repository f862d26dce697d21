//! Last-resort strategy: serve the newest durable-log row if it is recent enough.
//!
//! The acceptable age depends on how long acquisition has been failing. While the outage
//! is shorter than the grace period only recent rows (default 5 minutes) are served; past
//! the grace period the ceiling widens (default 1 hour) so subscribers keep getting a
//! value during long outages.

use crate::fetch::{AttemptContext, FetchStrategy};
use crate::store::{TimeSeriesStore, age_secs};
use spot_common::{FeedError, Quote, Result};
use std::sync::Arc;
use std::time::Duration;

/// Age ceilings for cached rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    /// Ceiling under normal conditions.
    pub max_age: Duration,
    /// Ceiling once the pipeline has been failing for longer than `grace`.
    pub extended_max_age: Duration,
    /// Outage length after which the extended ceiling applies.
    pub grace: Duration,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(300),
            extended_max_age: Duration::from_secs(3600),
            grace: Duration::from_secs(600),
        }
    }
}

impl CachePolicy {
    /// Ceiling in force after failing for `failing_for`.
    pub fn ceiling(&self, failing_for: Duration) -> Duration {
        if failing_for > self.grace {
            self.extended_max_age
        } else {
            self.max_age
        }
    }
}

/// Third-priority strategy.
pub struct CacheStrategy {
    store: Arc<TimeSeriesStore>,
    policy: CachePolicy,
}

impl CacheStrategy {
    /// Serve rows of `store` under `policy`.
    pub fn new(store: Arc<TimeSeriesStore>, policy: CachePolicy) -> Self {
        Self { store, policy }
    }
}

impl FetchStrategy for CacheStrategy {
    fn name(&self) -> &'static str {
        "cache"
    }

    fn attempt(&mut self, ctx: &AttemptContext) -> Result<Quote> {
        let ceiling = self.policy.ceiling(ctx.failing_for);
        let quote = self.store.latest()?.ok_or(FeedError::CacheEmpty)?;
        let age = age_secs(&quote, ctx.now);
        // A negative age means the clock went back since the row was written.
        if (0..ceiling.as_secs() as i64).contains(&age) {
            Ok(quote)
        } else {
            Err(FeedError::StaleCache {
                age_secs: age,
                ceiling_secs: ceiling.as_secs(),
            })
        }
    }
}
