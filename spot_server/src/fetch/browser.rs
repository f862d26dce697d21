//! Browser-session scrape: load the page in the owned driver session, wait for the price
//! element to become visible, then read the sibling fields from the rendered document.

use crate::fetch::document::{FieldSelectors, extract};
use crate::fetch::driver::Driver;
use crate::fetch::{AttemptContext, FetchStrategy};
use crate::model::driver_monitor::DriverSlot;
use spot_common::{ExtractedFields, Quote, Result, Source};
use std::time::Duration;

/// Default page/visibility timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Second-priority strategy.
pub struct BrowserStrategy {
    slot: DriverSlot,
    url: String,
    selectors: FieldSelectors,
    timeout: Duration,
}

impl BrowserStrategy {
    /// Scrape `url` with sessions from `slot`.
    pub fn new(slot: DriverSlot, url: impl Into<String>, selectors: FieldSelectors, timeout: Duration) -> Self {
        Self {
            slot,
            url: url.into(),
            selectors,
            timeout,
        }
    }

    fn scrape(&mut self) -> Result<ExtractedFields> {
        let session = self.slot.ensure()?;
        let driver: &mut dyn Driver = session.driver()?;
        driver.load(&self.url, self.timeout)?;
        driver.wait_visible(&self.selectors.price, self.timeout)?;
        extract(&driver.document()?, &self.selectors)
    }
}

impl FetchStrategy for BrowserStrategy {
    fn name(&self) -> &'static str {
        "browser"
    }

    fn attempt(&mut self, ctx: &AttemptContext) -> Result<Quote> {
        let result = self
            .scrape()
            .and_then(|fields| Quote::from_fields(fields, ctx.now, Source::Browser));
        match result {
            Ok(_) => self.slot.record_success(),
            Err(_) => self.slot.record_error(),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::driver_monitor::DriverPolicy;
    use crate::test_support::{CountingFactory, FailingFactory, QUOTE_PAGE, context};
    use spot_common::FeedError;
    use std::thread;

    fn strategy(factory: CountingFactory, policy: DriverPolicy) -> BrowserStrategy {
        BrowserStrategy::new(
            DriverSlot::new(factory, policy),
            "https://example.test/alu",
            FieldSelectors::default(),
            Duration::from_millis(50),
        )
    }

    #[test]
    fn scrape_reuses_one_session() {
        let factory = CountingFactory::serving(QUOTE_PAGE);
        let mut browser = strategy(factory.clone(), DriverPolicy::default());

        let first = browser.attempt(&context()).unwrap();
        browser.attempt(&context()).unwrap();

        assert_eq!(first.source, Source::Browser);
        assert_eq!(first.time_span, "3 Months");
        assert_eq!(factory.created(), 1);
        assert_eq!(factory.loads(), 2);
    }

    #[test]
    fn aged_session_is_replaced_before_the_next_fetch() {
        let factory = CountingFactory::serving(QUOTE_PAGE);
        let policy = DriverPolicy {
            max_age: Duration::from_millis(20),
            max_errors: 5,
        };
        let mut browser = strategy(factory.clone(), policy);
        browser.attempt(&context()).unwrap();

        thread::sleep(Duration::from_millis(40));
        browser.attempt(&context()).unwrap();

        assert_eq!(factory.created(), 2);
        assert_eq!(factory.closed(), 1);
    }

    #[test]
    fn missing_price_element_fails_and_counts_against_session() {
        let factory = CountingFactory::serving("<html><body>maintenance</body></html>");
        let policy = DriverPolicy {
            max_age: Duration::from_secs(600),
            max_errors: 2,
        };
        let mut browser = strategy(factory.clone(), policy);

        assert!(matches!(browser.attempt(&context()), Err(FeedError::Extraction(_))));
        assert!(browser.attempt(&context()).is_err());
        assert_eq!(factory.created(), 1);

        assert!(browser.attempt(&context()).is_err());
        assert_eq!(factory.created(), 2);
        assert_eq!(factory.closed(), 1);
    }

    #[test]
    fn creation_failure_is_a_resource_error() {
        let mut browser = BrowserStrategy::new(
            DriverSlot::new(FailingFactory, DriverPolicy::default()),
            "https://example.test",
            FieldSelectors::default(),
            Duration::from_millis(10),
        );
        assert!(matches!(browser.attempt(&context()), Err(FeedError::ResourceCreation(_))));
    }
}
