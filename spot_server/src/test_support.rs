//! Fakes and fixtures shared by the unit tests.

use crate::fetch::document::{DocumentSource, has_element};
use crate::fetch::driver::{Driver, DriverFactory};
use crate::fetch::{AttemptContext, FetchStrategy};
use chrono::{Local, NaiveDateTime, Timelike};
use spot_common::{FeedError, Quote, Result, Source};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

pub const QUOTE_PAGE: &str = r#"
<html><body>
  <div class="instrument-header">
    <div data-test="instrument-price-last">2,612.50</div>
    <span data-test="instrument-price-change">+12.50</span>
    <span data-test="instrument-price-change-percent">(+0.48%)</span>
    <time data-test="trading-time-label">3 Months</time>
  </div>
</body></html>
"#;

pub fn now_seconds() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

pub fn sample_quote(value: &str, source: Source) -> Quote {
    Quote {
        value: value.to_string(),
        change_absolute: "+1.00".into(),
        change_percent: "+0.04%".into(),
        time_span: "3 Months".into(),
        captured_at: now_seconds(),
        source,
    }
}

pub fn context() -> AttemptContext {
    AttemptContext::now(Duration::ZERO)
}

/// Poll `cond` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

#[derive(Clone, Default)]
pub struct Calls(Arc<AtomicUsize>);

impl Calls {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

type Script = Box<dyn FnMut(usize) -> Result<Quote> + Send>;

/// Strategy whose n-th call (0-based) is answered by a script.
pub struct ScriptedStrategy {
    name: &'static str,
    calls: Calls,
    script: Script,
}

impl ScriptedStrategy {
    pub fn new(name: &'static str, script: impl FnMut(usize) -> Result<Quote> + Send + 'static) -> (Self, Calls) {
        let calls = Calls::default();
        let strategy = Self {
            name,
            calls: calls.clone(),
            script: Box::new(script),
        };
        (strategy, calls)
    }

    pub fn succeeding(name: &'static str, quote: Quote) -> (Self, Calls) {
        Self::new(name, move |_| Ok(quote.clone()))
    }

    pub fn failing(name: &'static str) -> (Self, Calls) {
        Self::new(name, |_| Err(FeedError::TransientNetwork("connection refused".into())))
    }

    pub fn failing_then(name: &'static str, failures: usize, quote: Quote) -> (Self, Calls) {
        Self::new(name, move |n| {
            if n < failures {
                Err(FeedError::TransientNetwork("connection reset".into()))
            } else {
                Ok(quote.clone())
            }
        })
    }

    pub fn panicking_then(name: &'static str, panics: usize, quote: Quote) -> (Self, Calls) {
        Self::new(name, move |n| {
            if n < panics {
                panic!("scripted panic in {name}");
            }
            Ok(quote.clone())
        })
    }
}

impl FetchStrategy for ScriptedStrategy {
    fn name(&self) -> &'static str {
        self.name
    }

    fn attempt(&mut self, _ctx: &AttemptContext) -> Result<Quote> {
        let n = self.calls.0.fetch_add(1, Ordering::SeqCst);
        (self.script)(n)
    }
}

#[derive(Clone, Default)]
pub struct RequestLog(Arc<Mutex<Option<(String, Duration)>>>);

impl RequestLog {
    pub fn last_request(&self) -> Option<(String, Duration)> {
        self.0.lock().unwrap().clone()
    }
}

/// Document source answering every fetch with the same response.
pub struct StaticPage {
    response: std::result::Result<String, String>,
    log: RequestLog,
}

impl StaticPage {
    pub fn new(response: Result<String>) -> (Self, RequestLog) {
        let log = RequestLog::default();
        let page = Self {
            response: response.map_err(|e| e.to_string()),
            log: log.clone(),
        };
        (page, log)
    }
}

impl DocumentSource for StaticPage {
    fn fetch(&self, url: &str, timeout: Duration) -> Result<String> {
        *self.log.0.lock().unwrap() = Some((url.to_string(), timeout));
        self.response.clone().map_err(FeedError::TransientNetwork)
    }
}

/// Factory counting sessions created, closed and page loads.
#[derive(Clone, Default)]
pub struct CountingFactory {
    page: Option<String>,
    created: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
    loads: Arc<AtomicUsize>,
}

impl CountingFactory {
    pub fn serving(page: &str) -> Self {
        Self {
            page: Some(page.to_string()),
            ..Self::default()
        }
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl DriverFactory for CountingFactory {
    fn create(&self) -> Result<Box<dyn Driver>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeDriver {
            factory: self.clone(),
            loaded: false,
        }))
    }
}

struct FakeDriver {
    factory: CountingFactory,
    loaded: bool,
}

impl Driver for FakeDriver {
    fn load(&mut self, _url: &str, _timeout: Duration) -> Result<()> {
        self.factory.loads.fetch_add(1, Ordering::SeqCst);
        self.loaded = true;
        Ok(())
    }

    fn wait_visible(&mut self, selector: &str, _timeout: Duration) -> Result<()> {
        match (&self.factory.page, self.loaded) {
            (Some(page), true) if has_element(page, selector)? => Ok(()),
            _ => Err(FeedError::Extraction(format!("element {selector} not visible"))),
        }
    }

    fn document(&self) -> Result<String> {
        self.factory
            .page
            .clone()
            .ok_or_else(|| FeedError::Extraction("no page loaded".into()))
    }

    fn close(&mut self) -> Result<()> {
        self.factory.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Factory that can never open a session.
pub struct FailingFactory;

impl DriverFactory for FailingFactory {
    fn create(&self) -> Result<Box<dyn Driver>> {
        Err(FeedError::ResourceCreation("browser binary not found".into()))
    }
}
