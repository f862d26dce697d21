//! Command-line arguments and the typed settings derived from them.
use crate::fetch::cache::CachePolicy;
use crate::fetch::document::FieldSelectors;
use crate::fetch::{browser, probe};
use crate::model::driver_monitor::{DEFAULT_MAX_AGE, DEFAULT_MAX_ERRORS, DriverPolicy};
use crate::scheduler::{Cadence, RetryPolicy, SchedulerTiming};
use clap::{Parser, ValueEnum};
use spot_common::net::DEFAULT_PORT;
use std::path::PathBuf;
use std::time::Duration;

/// Page the quote is scraped from.
pub const DEFAULT_URL: &str = "https://in.investing.com/commodities/aluminum";
/// Location of the durable log.
pub const DEFAULT_LOG_PATH: &str = "scraped_csv/3_months_LME_scrap.csv";
/// Rows that may wait for the journal thread.
pub const JOURNAL_DEPTH: usize = 8;

/// Page session used by the browser strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DriverBackend {
    /// Headless Chromium, falling back to the HTTP session when it cannot start.
    Chromium,
    /// Plain HTTP session.
    Http,
}

/// Parsed command-line arguments.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Address the HTTP server binds to.
    #[clap(long, default_value_t = format!("0.0.0.0:{DEFAULT_PORT}"))]
    pub bind: String,

    /// Page to scrape.
    #[clap(long, default_value = DEFAULT_URL)]
    pub url: String,

    /// CSV file holding every acquired quote.
    #[clap(long, default_value = DEFAULT_LOG_PATH)]
    pub log_path: PathBuf,

    /// Seconds between acquisition cycles.
    #[clap(long, default_value_t = 10)]
    pub interval_secs: u64,

    /// Chain runs per cycle.
    #[clap(long, default_value_t = 3)]
    pub retries: u32,

    /// Seconds between chain runs inside a cycle.
    #[clap(long, default_value_t = 2)]
    pub retry_delay_secs: u64,

    /// Skip the lightweight HTTP probe and go straight to the browser session.
    #[clap(long)]
    pub no_probe: bool,

    /// Probe request timeout in seconds.
    #[clap(long, default_value_t = 5)]
    pub probe_timeout_secs: u64,

    /// Browser page load and element wait timeout in seconds.
    #[clap(long, default_value_t = 15)]
    pub browser_timeout_secs: u64,

    /// Page session backend.
    #[clap(long, value_enum, default_value_t = DriverBackend::Chromium)]
    pub driver: DriverBackend,

    /// Chrome or Chromium executable; searched for when absent.
    #[clap(long)]
    pub chrome_path: Option<PathBuf>,

    /// Browser session lifetime in seconds before it is recreated.
    #[clap(long, default_value_t = 600)]
    pub driver_max_age_secs: u64,

    /// Consecutive browser failures before the session is recreated.
    #[clap(long, default_value_t = 5)]
    pub driver_max_errors: u32,

    /// Maximum age in seconds of a logged quote served as a fallback.
    #[clap(long, default_value_t = 300)]
    pub cache_max_age_secs: u64,

    /// Fallback age ceiling once acquisition has been failing for longer than the grace period.
    #[clap(long, default_value_t = 3600)]
    pub cache_extended_max_age_secs: u64,

    /// Seconds of continuous failure before the extended ceiling applies.
    #[clap(long, default_value_t = 600)]
    pub failure_grace_secs: u64,

    /// Seconds a stream stays silent before a heartbeat is sent.
    #[clap(long, default_value_t = 10)]
    pub heartbeat_secs: u64,

    /// Seconds a query waits for an on-demand acquisition.
    #[clap(long, default_value_t = 30)]
    pub on_demand_timeout_secs: u64,

    /// Selector of the last price element.
    #[clap(long)]
    pub price_selector: Option<String>,

    /// Selector of the absolute change element.
    #[clap(long)]
    pub change_selector: Option<String>,

    /// Selector of the percentage change element.
    #[clap(long)]
    pub percent_selector: Option<String>,

    /// Selector of the time label element.
    #[clap(long)]
    pub time_selector: Option<String>,
}

/// Everything the server needs to start, with durations already typed.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// HTTP bind address.
    pub bind: String,
    /// Page to scrape.
    pub url: String,
    /// Durable log location.
    pub log_path: PathBuf,
    /// Retry, cadence and recovery timing.
    pub timing: SchedulerTiming,
    /// Whether the probe strategy heads the chain.
    pub probe_enabled: bool,
    /// Probe request timeout.
    pub probe_timeout: Duration,
    /// Browser load and wait timeout.
    pub browser_timeout: Duration,
    /// Page session backend.
    pub backend: DriverBackend,
    /// Explicit browser executable.
    pub chrome_path: Option<PathBuf>,
    /// Browser session replacement thresholds.
    pub driver: DriverPolicy,
    /// Fallback age ceilings.
    pub cache: CachePolicy,
    /// Field selectors.
    pub selectors: FieldSelectors,
    /// Stream heartbeat timeout.
    pub heartbeat: Duration,
    /// On-demand acquisition timeout.
    pub on_demand_timeout: Duration,
    /// Journal queue capacity.
    pub journal_depth: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind: format!("0.0.0.0:{DEFAULT_PORT}"),
            url: DEFAULT_URL.to_string(),
            log_path: PathBuf::from(DEFAULT_LOG_PATH),
            timing: SchedulerTiming::default(),
            probe_enabled: true,
            probe_timeout: probe::DEFAULT_TIMEOUT,
            browser_timeout: browser::DEFAULT_TIMEOUT,
            backend: DriverBackend::Chromium,
            chrome_path: None,
            driver: DriverPolicy {
                max_age: DEFAULT_MAX_AGE,
                max_errors: DEFAULT_MAX_ERRORS,
            },
            cache: CachePolicy::default(),
            selectors: FieldSelectors::default(),
            heartbeat: Duration::from_secs(10),
            on_demand_timeout: Duration::from_secs(30),
            journal_depth: JOURNAL_DEPTH,
        }
    }
}

impl From<Args> for Settings {
    fn from(args: Args) -> Self {
        let defaults = Settings::default();
        let selectors = FieldSelectors {
            price: args.price_selector.unwrap_or(defaults.selectors.price),
            change_absolute: args.change_selector.unwrap_or(defaults.selectors.change_absolute),
            change_percent: args.percent_selector.unwrap_or(defaults.selectors.change_percent),
            time_label: args.time_selector.unwrap_or(defaults.selectors.time_label),
        };
        Self {
            bind: args.bind,
            url: args.url,
            log_path: args.log_path,
            timing: SchedulerTiming {
                retry: RetryPolicy {
                    max_attempts: args.retries.max(1),
                    delay: Duration::from_secs(args.retry_delay_secs),
                },
                cadence: Cadence {
                    interval: Duration::from_secs(args.interval_secs),
                    ..defaults.timing.cadence
                },
                ..defaults.timing
            },
            probe_enabled: !args.no_probe,
            probe_timeout: Duration::from_secs(args.probe_timeout_secs),
            browser_timeout: Duration::from_secs(args.browser_timeout_secs),
            backend: args.driver,
            chrome_path: args.chrome_path,
            driver: DriverPolicy {
                max_age: Duration::from_secs(args.driver_max_age_secs),
                max_errors: args.driver_max_errors.max(1),
            },
            cache: CachePolicy {
                max_age: Duration::from_secs(args.cache_max_age_secs),
                extended_max_age: Duration::from_secs(args.cache_extended_max_age_secs),
                grace: Duration::from_secs(args.failure_grace_secs),
            },
            selectors,
            heartbeat: Duration::from_secs(args.heartbeat_secs.max(1)),
            on_demand_timeout: Duration::from_secs(args.on_demand_timeout_secs),
            journal_depth: defaults.journal_depth,
        }
    }
}
