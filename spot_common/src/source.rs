//! Acquisition sources a `Quote` can originate from.

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Which fetch strategy produced a quote.
///
/// Parsing is case-insensitive so values read back from logs or query strings
/// (`api`, `Browser`, `CACHE`) resolve to the same variant.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, Display, EnumString, Hash, Eq, PartialEq,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Source {
    /// Lightweight network probe without a browser session.
    Api,
    /// Full browser-session scrape.
    Browser,
    /// Most recent row of the durable log.
    Cache,
}

impl Source {
    /// Whether quotes from this source are fresh observations worth logging.
    pub fn is_live(self) -> bool {
        !matches!(self, Source::Cache)
    }
}
