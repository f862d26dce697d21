//! Page retrieval and field extraction.
//!
//! `DocumentSource` is the raw "fetch a page" capability and `extract` reads the four
//! quote fields out of an HTML document with CSS selectors. Both are deliberately dumb:
//! policy (timeouts per strategy, retries, fallbacks) belongs to the strategies and the
//! scheduler.

use reqwest::StatusCode;
use scraper::{ElementRef, Html, Selector};
use spot_common::{ExtractedFields, FeedError, Result};
use std::time::Duration;

/// Browser-like user agent; the quote page rejects obvious bots.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
                              AppleWebKit/537.36 (KHTML, like Gecko) \
                              Chrome/120.0.0.0 Safari/537.36";

/// Something that can return the text of a page.
pub trait DocumentSource: Send {
    /// Fetch `url`, giving up after `timeout`.
    fn fetch(&self, url: &str, timeout: Duration) -> Result<String>;
}

/// Plain HTTP GET with `reqwest::blocking`.
pub struct HttpDocumentSource {
    client: reqwest::blocking::Client,
}

impl HttpDocumentSource {
    /// Build the underlying client.
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| FeedError::ResourceCreation(format!("HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

impl DocumentSource for HttpDocumentSource {
    fn fetch(&self, url: &str, timeout: Duration) -> Result<String> {
        get_text(&self.client, url, timeout)
    }
}

/// GET `url` and return the body, classifying failures into the fetch taxonomy.
pub(crate) fn get_text(client: &reqwest::blocking::Client, url: &str, timeout: Duration) -> Result<String> {
    let response = client
        .get(url)
        .timeout(timeout)
        .send()
        .map_err(|e| network_error(url, e))?;

    let status = response.status();
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return Err(FeedError::TransientNetwork(format!("HTTP {status} from {url}")));
    }
    if !status.is_success() {
        return Err(FeedError::Extraction(format!("HTTP {status} from {url}")));
    }
    response.text().map_err(|e| network_error(url, e))
}

fn network_error(url: &str, err: reqwest::Error) -> FeedError {
    if err.is_timeout() {
        FeedError::TransientNetwork(format!("timed out fetching {url}"))
    } else if err.is_connect() {
        FeedError::TransientNetwork(format!("connection to {url} failed: {err}"))
    } else {
        FeedError::TransientNetwork(format!("request to {url} failed: {err}"))
    }
}

/// CSS selectors for the four quote fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSelectors {
    /// Last price element; the browser strategy waits for this one.
    pub price: String,
    /// Absolute change element.
    pub change_absolute: String,
    /// Percentage change element.
    pub change_percent: String,
    /// Period/trading time label element.
    pub time_label: String,
}

impl Default for FieldSelectors {
    fn default() -> Self {
        Self {
            price: "div[data-test='instrument-price-last']".into(),
            change_absolute: "span[data-test='instrument-price-change']".into(),
            change_percent: "span[data-test='instrument-price-change-percent']".into(),
            time_label: "time[data-test='trading-time-label']".into(),
        }
    }
}

/// Read all four fields from `document`. The first missing field fails the extraction.
pub fn extract(document: &str, selectors: &FieldSelectors) -> Result<ExtractedFields> {
    let html = Html::parse_document(document);
    let text_of = |name: &str, css: &str| -> Result<String> {
        let selector = parse_selector(css)?;
        html.select(&selector)
            .next()
            .map(|el| element_text(&el))
            .filter(|text| !text.is_empty())
            .ok_or_else(|| FeedError::Extraction(format!("missing field {name} ({css})")))
    };

    Ok(ExtractedFields {
        value: text_of("value", &selectors.price)?,
        change_absolute: text_of("change_absolute", &selectors.change_absolute)?,
        change_percent: text_of("change_percent", &selectors.change_percent)?,
        time_label: text_of("time_label", &selectors.time_label)?,
    })
}

/// Whether `document` contains a non-empty element matching `css`.
pub fn has_element(document: &str, css: &str) -> Result<bool> {
    let selector = parse_selector(css)?;
    let html = Html::parse_document(document);
    Ok(html
        .select(&selector)
        .any(|el| !element_text(&el).is_empty()))
}

fn parse_selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| FeedError::Format(format!("invalid selector {css:?}: {e:?}")))
}

/// Whitespace-collapsed text content of an element.
fn element_text(el: &ElementRef<'_>) -> String {
    el.text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
