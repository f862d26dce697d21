//! Browser-session abstraction used by the browser strategy.
//!
//! A `Driver` is an exclusively owned, stateful page session: it loads a URL, waits for a
//! required element to become visible, and exposes the rendered document. Drivers are
//! created by a `DriverFactory` and must be closed exactly once; the lifecycle (age and
//! error ceilings, scope-guarded release) lives in `model::driver_monitor`.

use crate::fetch::document::{USER_AGENT, get_text, has_element};
use log::{debug, warn};
use spot_common::{FeedError, Result};
use std::thread;
use std::time::{Duration, Instant};

/// A stateful page session.
pub trait Driver: Send {
    /// Navigate to `url`.
    fn load(&mut self, url: &str, timeout: Duration) -> Result<()>;

    /// Block until an element matching `selector` is visible, or fail after `timeout`.
    fn wait_visible(&mut self, selector: &str, timeout: Duration) -> Result<()>;

    /// Current page source.
    fn document(&self) -> Result<String>;

    /// Release the session. Called exactly once by the owning scope guard.
    fn close(&mut self) -> Result<()>;
}

/// Creates fresh driver sessions.
pub trait DriverFactory: Send {
    /// Open a new session.
    fn create(&self) -> Result<Box<dyn Driver>>;
}

impl<F: DriverFactory + ?Sized> DriverFactory for Box<F> {
    fn create(&self) -> Result<Box<dyn Driver>> {
        (**self).create()
    }
}

/// Tries `primary` first and opens a `fallback` session when it cannot be created.
pub struct FallbackFactory {
    primary: Box<dyn DriverFactory>,
    fallback: Box<dyn DriverFactory>,
}

impl FallbackFactory {
    /// Pairs a preferred factory with the one used when it fails.
    pub fn new(primary: impl DriverFactory + 'static, fallback: impl DriverFactory + 'static) -> Self {
        Self {
            primary: Box::new(primary),
            fallback: Box::new(fallback),
        }
    }
}

impl DriverFactory for FallbackFactory {
    fn create(&self) -> Result<Box<dyn Driver>> {
        match self.primary.create() {
            Ok(driver) => Ok(driver),
            Err(e) => {
                warn!("Primary driver unavailable ({}), opening fallback session", e);
                self.fallback.create()
            }
        }
    }
}

/// First pause before the page is fetched again during a visibility wait. Doubles on
/// every further fetch.
pub const REFETCH_BACKOFF: Duration = Duration::from_secs(2);

/// HTTP-backed session: one connection pool and cookie-less client per session.
///
/// There is no script engine behind it, so a visibility wait checks the loaded page and
/// only re-fetches it after an exponentially growing pause.
pub struct HttpSessionDriver {
    client: Option<reqwest::blocking::Client>,
    url: Option<String>,
    page: Option<String>,
    refetch_backoff: Duration,
}

impl HttpSessionDriver {
    /// Opens a session whose visibility waits start re-fetching after `refetch_backoff`.
    pub fn open(refetch_backoff: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .pool_max_idle_per_host(1)
            .build()
            .map_err(|e| FeedError::ResourceCreation(format!("session client: {e}")))?;
        debug!("HTTP session opened");
        Ok(Self {
            client: Some(client),
            url: None,
            page: None,
            refetch_backoff,
        })
    }

    fn client(&self) -> Result<&reqwest::blocking::Client> {
        self.client
            .as_ref()
            .ok_or_else(|| FeedError::ResourceCreation("session already closed".into()))
    }
}

impl Driver for HttpSessionDriver {
    fn load(&mut self, url: &str, timeout: Duration) -> Result<()> {
        let page = get_text(self.client()?, url, timeout)?;
        self.url = Some(url.to_string());
        self.page = Some(page);
        Ok(())
    }

    fn wait_visible(&mut self, selector: &str, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut pause = self.refetch_backoff;
        loop {
            if let Some(page) = &self.page {
                if has_element(page, selector)? {
                    return Ok(());
                }
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining <= pause {
                return Err(FeedError::Extraction(format!(
                    "element {selector} not visible within {}s",
                    timeout.as_secs()
                )));
            }
            thread::sleep(pause);
            let url = self
                .url
                .clone()
                .ok_or_else(|| FeedError::Extraction("no page loaded".into()))?;
            let remaining = deadline.saturating_duration_since(Instant::now());
            debug!("Element {} not visible yet, fetching {} again", selector, url);
            self.page = Some(get_text(self.client()?, &url, remaining)?);
            pause *= 2;
        }
    }

    fn document(&self) -> Result<String> {
        self.page
            .clone()
            .ok_or_else(|| FeedError::Extraction("no page loaded".into()))
    }

    fn close(&mut self) -> Result<()> {
        self.client = None;
        self.page = None;
        debug!("HTTP session closed");
        Ok(())
    }
}

/// Factory for [`HttpSessionDriver`].
#[derive(Debug, Clone, Default)]
pub struct HttpSessionFactory;

impl DriverFactory for HttpSessionFactory {
    fn create(&self) -> Result<Box<dyn Driver>> {
        Ok(Box::new(HttpSessionDriver::open(REFETCH_BACKOFF)?))
    }
}
