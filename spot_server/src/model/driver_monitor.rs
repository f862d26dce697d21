//! Lifecycle tracker for the browser-session driver.
//!
//! This module owns the single driver session used by the browser strategy and decides
//! when it has to be replaced:
//!
//! - `DriverSlot::ensure()` — hand out the current session, recreating it first when it is
//!   absent, older than the age ceiling, or has hit the consecutive-error ceiling.
//! - `DriverSlot::record_success()` / `record_error()` — update the error streak after an
//!   attempt.
//!
//! Design notes:
//! - Age is measured on the monotonic clock (`std::time::Instant`).
//! - `DriverSession` is a scope guard: whichever path drops it (replacement, a failed
//!   attempt unwinding, process teardown) closes the underlying driver, exactly once.
//! - Recreation always releases the old session before asking the factory for a new one,
//!   so two sessions never coexist.
//! - The slot is not synchronized; it is owned by the scheduler thread.

use crate::fetch::driver::{Driver, DriverFactory};
use log::{info, warn};
use spot_common::{FeedError, Result};
use std::time::{Duration, Instant};

/// Default session age ceiling.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(600);
/// Default consecutive-error ceiling.
pub const DEFAULT_MAX_ERRORS: u32 = 5;

/// Replacement thresholds for a driver session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverPolicy {
    /// Sessions older than this are replaced before the next attempt.
    pub max_age: Duration,
    /// Sessions with this many consecutive failures are replaced.
    pub max_errors: u32,
}

impl Default for DriverPolicy {
    fn default() -> Self {
        Self {
            max_age: DEFAULT_MAX_AGE,
            max_errors: DEFAULT_MAX_ERRORS,
        }
    }
}

/// Exclusively owned driver plus its bookkeeping. Closing happens on drop.
pub struct DriverSession {
    driver: Option<Box<dyn Driver>>,
    created_at: Instant,
    consecutive_errors: u32,
}

impl DriverSession {
    fn new(driver: Box<dyn Driver>, created_at: Instant) -> Self {
        Self {
            driver: Some(driver),
            created_at,
            consecutive_errors: 0,
        }
    }

    /// Mutable access to the live driver.
    pub fn driver(&mut self) -> Result<&mut (dyn Driver + 'static)> {
        self.driver
            .as_deref_mut()
            .ok_or_else(|| FeedError::ResourceCreation("driver already released".into()))
    }

    /// Time since the session was opened.
    pub fn age_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }

    /// Failures since the last success.
    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }
}

impl Drop for DriverSession {
    fn drop(&mut self) {
        if let Some(mut driver) = self.driver.take() {
            if let Err(e) = driver.close() {
                warn!("Failed to close driver session: {}", e);
            }
        }
    }
}

/// Holder of at most one driver session, applying the replacement policy.
pub struct DriverSlot {
    factory: Box<dyn DriverFactory>,
    policy: DriverPolicy,
    session: Option<DriverSession>,
}

impl DriverSlot {
    /// Empty slot; the first `ensure` creates a session.
    pub fn new(factory: impl DriverFactory + 'static, policy: DriverPolicy) -> Self {
        Self {
            factory: Box::new(factory),
            policy,
            session: None,
        }
    }

    /// Current session, recreated first if the policy demands it.
    pub fn ensure(&mut self) -> Result<&mut DriverSession> {
        self.ensure_at(Instant::now())
    }

    /// As [`Self::ensure`], evaluating age against `now`.
    pub fn ensure_at(&mut self, now: Instant) -> Result<&mut DriverSession> {
        if let Some(reason) = self.recreate_reason(now) {
            if let Some(old) = self.session.take() {
                info!("Recreating driver session: {}", reason);
                drop(old);
            }
            let driver = self.factory.create().map_err(|e| match e {
                created @ FeedError::ResourceCreation(_) => created,
                other => FeedError::ResourceCreation(other.to_string()),
            })?;
            self.session = Some(DriverSession::new(driver, now));
        }
        self.session
            .as_mut()
            .ok_or_else(|| FeedError::ResourceCreation("driver session missing".into()))
    }

    /// Reset the error streak after a successful attempt.
    pub fn record_success(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.consecutive_errors = 0;
        }
    }

    /// Count a failed attempt against the current session.
    pub fn record_error(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.consecutive_errors += 1;
        }
    }

    /// Close the current session, if any.
    pub fn release(&mut self) {
        self.session = None;
    }

    /// Whether a session is currently open.
    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    fn recreate_reason(&self, now: Instant) -> Option<&'static str> {
        match &self.session {
            None => Some("no session"),
            Some(s) if s.age_at(now) >= self.policy.max_age => Some("age ceiling exceeded"),
            Some(s) if s.consecutive_errors >= self.policy.max_errors => Some("error ceiling reached"),
            Some(_) => None,
        }
    }
}
