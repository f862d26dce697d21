//! Lightweight page probe: one plain HTTP GET, no session, short timeout.
//!
//! The quote source publishes no structured endpoint, so the probe reads the same HTML
//! page the browser strategy does, just without a session or visibility wait. It is the
//! cheapest strategy and may be switched off entirely in configuration.

use crate::fetch::document::{DocumentSource, FieldSelectors, extract};
use crate::fetch::{AttemptContext, FetchStrategy};
use spot_common::{Quote, Result, Source};
use std::time::Duration;

/// Default probe timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// First-priority strategy.
pub struct ProbeStrategy {
    source: Box<dyn DocumentSource>,
    url: String,
    selectors: FieldSelectors,
    timeout: Duration,
}

impl ProbeStrategy {
    /// Probe `url` through `source`.
    pub fn new(
        source: impl DocumentSource + 'static,
        url: impl Into<String>,
        selectors: FieldSelectors,
        timeout: Duration,
    ) -> Self {
        Self {
            source: Box::new(source),
            url: url.into(),
            selectors,
            timeout,
        }
    }
}

impl FetchStrategy for ProbeStrategy {
    fn name(&self) -> &'static str {
        "probe"
    }

    fn attempt(&mut self, ctx: &AttemptContext) -> Result<Quote> {
        let document = self.source.fetch(&self.url, self.timeout)?;
        let fields = extract(&document, &self.selectors)?;
        Quote::from_fields(fields, ctx.now, Source::Api)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{QUOTE_PAGE, StaticPage, context};
    use spot_common::FeedError;

    #[test]
    fn probe_builds_api_quote_from_page() {
        let (page, seen) = StaticPage::new(Ok(QUOTE_PAGE.to_string()));
        let mut probe = ProbeStrategy::new(page, "https://example.test/alu", FieldSelectors::default(), DEFAULT_TIMEOUT);

        let quote = probe.attempt(&context()).unwrap();

        assert_eq!(quote.source, Source::Api);
        assert_eq!(quote.value, "2,612.50");
        assert_eq!(seen.last_request(), Some(("https://example.test/alu".to_string(), DEFAULT_TIMEOUT)));
    }

    #[test]
    fn network_failure_is_returned_not_panicked() {
        let (page, _) = StaticPage::new(Err(FeedError::TransientNetwork("refused".into())));
        let mut probe = ProbeStrategy::new(page, "https://example.test", FieldSelectors::default(), DEFAULT_TIMEOUT);
        assert!(matches!(probe.attempt(&context()), Err(FeedError::TransientNetwork(_))));
    }

    #[test]
    fn partial_page_is_an_extraction_failure() {
        let (page, _) = StaticPage::new(Ok(r#"<div data-test="instrument-price-last">1</div>"#.into()));
        let mut probe = ProbeStrategy::new(page, "https://example.test", FieldSelectors::default(), DEFAULT_TIMEOUT);
        assert!(matches!(probe.attempt(&context()), Err(FeedError::Extraction(_))));
    }
}
