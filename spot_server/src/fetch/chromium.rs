//! Headless Chromium session built on `chromiumoxide`.
//!
//! The rest of the pipeline is blocking, so each session owns a single-threaded tokio
//! runtime that drives the DevTools connection and the browser event handler.

use crate::fetch::driver::{Driver, DriverFactory};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use log::{debug, warn};
use spot_common::{FeedError, Result};
use std::path::PathBuf;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;

/// Delay between DOM lookups while waiting for an element.
const DOM_POLL: Duration = Duration::from_millis(250);

/// Launches one headless browser per session.
#[derive(Debug, Clone, Default)]
pub struct ChromiumFactory {
    executable: Option<PathBuf>,
}

impl ChromiumFactory {
    /// Uses `executable` when given, otherwise lets `chromiumoxide` locate a Chrome binary.
    pub fn new(executable: Option<PathBuf>) -> Self {
        Self { executable }
    }
}

impl DriverFactory for ChromiumFactory {
    fn create(&self) -> Result<Box<dyn Driver>> {
        Ok(Box::new(ChromiumDriver::launch(self.executable.clone())?))
    }
}

/// One browser process with a single page.
pub struct ChromiumDriver {
    runtime: Runtime,
    browser: Option<Browser>,
    page: Option<Page>,
    handler: JoinHandle<()>,
}

fn creation(what: &str, e: impl std::fmt::Display) -> FeedError {
    FeedError::ResourceCreation(format!("chromium {what}: {e}"))
}

impl ChromiumDriver {
    fn launch(executable: Option<PathBuf>) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| creation("runtime", e))?;

        let mut builder = BrowserConfig::builder()
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-background-networking");
        if let Some(path) = executable {
            builder = builder.chrome_executable(path);
        }
        let config = builder.build().map_err(|e| creation("config", e))?;

        let (browser, mut events) = runtime
            .block_on(Browser::launch(config))
            .map_err(|e| creation("launch", e))?;
        let handler = runtime.spawn(async move {
            while let Some(event) = events.next().await {
                let _ = event;
            }
        });
        let page = runtime
            .block_on(browser.new_page("about:blank"))
            .map_err(|e| creation("page", e))?;
        debug!("Chromium session opened");

        Ok(Self {
            runtime,
            browser: Some(browser),
            page: Some(page),
            handler,
        })
    }

    fn page(&self) -> Result<&Page> {
        self.page
            .as_ref()
            .ok_or_else(|| FeedError::ResourceCreation("browser already closed".into()))
    }
}

impl Driver for ChromiumDriver {
    fn load(&mut self, url: &str, timeout: Duration) -> Result<()> {
        let page = self.page()?;
        match self.runtime.block_on(tokio::time::timeout(timeout, page.goto(url))) {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(FeedError::TransientNetwork(format!("navigation to {url} failed: {e}"))),
            Err(_) => Err(FeedError::TransientNetwork(format!(
                "navigation to {url} timed out after {}s",
                timeout.as_secs()
            ))),
        }
    }

    fn wait_visible(&mut self, selector: &str, timeout: Duration) -> Result<()> {
        let page = self.page()?;
        let found = self.runtime.block_on(async {
            let deadline = tokio::time::Instant::now() + timeout;
            loop {
                if page.find_element(selector).await.is_ok() {
                    return true;
                }
                if tokio::time::Instant::now() >= deadline {
                    return false;
                }
                tokio::time::sleep(DOM_POLL).await;
            }
        });
        if found {
            Ok(())
        } else {
            Err(FeedError::Extraction(format!(
                "element {selector} not visible within {}s",
                timeout.as_secs()
            )))
        }
    }

    fn document(&self) -> Result<String> {
        let page = self.page()?;
        self.runtime
            .block_on(page.content())
            .map_err(|e| FeedError::Extraction(format!("page source: {e}")))
    }

    fn close(&mut self) -> Result<()> {
        let page = self.page.take();
        let browser = self.browser.take();
        self.runtime.block_on(async move {
            if let Some(page) = page {
                if let Err(e) = page.close().await {
                    warn!("Closing page failed: {}", e);
                }
            }
            if let Some(mut browser) = browser {
                if let Err(e) = browser.close().await {
                    warn!("Closing browser failed: {}", e);
                }
                let _ = browser.wait().await;
            }
        });
        self.handler.abort();
        debug!("Chromium session closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore] // Requires Chromium
    fn renders_inline_page_and_finds_price() {
        let mut driver = ChromiumFactory::default().create().unwrap();
        driver
            .load(
                "data:text/html,<div class=\"price\">2345.50</div>",
                Duration::from_secs(10),
            )
            .unwrap();
        driver.wait_visible("div.price", Duration::from_secs(5)).unwrap();
        assert!(driver.document().unwrap().contains("2345.50"));
        driver.close().unwrap();
        assert!(matches!(
            driver.document(),
            Err(FeedError::ResourceCreation(_))
        ));
    }
}
