//! Quote data model and validation.
//!
//! A `Quote` is one normalized price observation: the displayed price, its absolute and
//! percentage change, the period label shown next to it, the local time it was captured
//! (second precision) and the acquisition `Source`. Quotes are only built from a complete
//! set of extracted fields; a partial extraction is rejected with `FeedError::Extraction`
//! and never reaches the live state or the durable log.

use crate::error::FeedError;
use crate::source::Source;
use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

/// Text format used for `captured_at` in JSON payloads and in the durable log.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Raw text fields as read from a page, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedFields {
    /// Displayed last price, e.g. `2,612.50`.
    pub value: String,
    /// Absolute change, e.g. `+12.50`.
    pub change_absolute: String,
    /// Percentage change, e.g. `+0.48%` (surrounding parentheses are tolerated).
    pub change_percent: String,
    /// Period/time label shown beside the price, e.g. `3 Months` or a trading date.
    pub time_label: String,
}

/// Normalized price observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "QuoteRecord", from = "QuoteRecord")]
pub struct Quote {
    /// Displayed last price.
    pub value: String,
    /// Absolute change since the reference close.
    pub change_absolute: String,
    /// Percentage change, without surrounding parentheses.
    pub change_percent: String,
    /// Period/time label.
    pub time_span: String,
    /// Local capture time, whole seconds.
    pub captured_at: NaiveDateTime,
    /// Acquisition method.
    pub source: Source,
}

impl Quote {
    /// Validate extracted fields and build a quote.
    ///
    /// Every field is trimmed; an empty field, a value without a parseable decimal, or a
    /// change without any digit rejects the whole record.
    pub fn from_fields(
        fields: ExtractedFields,
        captured_at: NaiveDateTime,
        source: Source,
    ) -> Result<Quote, FeedError> {
        let value = required("value", &fields.value)?;
        let change_absolute = required("change_absolute", &fields.change_absolute)?;
        let change_percent = strip_parens(&required("change_percent", &fields.change_percent)?);
        let time_span = required("time_label", &fields.time_label)?;

        if parse_decimal(&value).is_none() {
            return Err(FeedError::Extraction(format!("value {value:?} is not a number")));
        }
        for (name, text) in [("change_absolute", &change_absolute), ("change_percent", &change_percent)] {
            if !text.chars().any(|c| c.is_ascii_digit()) {
                return Err(FeedError::Extraction(format!("{name} {text:?} has no digits")));
            }
        }

        Ok(Quote {
            value,
            change_absolute,
            change_percent,
            time_span,
            captured_at: truncate_to_seconds(captured_at),
            source,
        })
    }

    /// Combined change string as displayed and logged: `"<abs> (<pct>)"`.
    pub fn rate_of_change(&self) -> String {
        format!("{} ({})", self.change_absolute, self.change_percent)
    }

    /// Numeric price with grouping separators and currency marks removed.
    pub fn numeric_value(&self) -> Option<f64> {
        parse_decimal(&self.value)
    }

    /// `captured_at` rendered with [`TIMESTAMP_FORMAT`].
    pub fn timestamp(&self) -> String {
        self.captured_at.format(TIMESTAMP_FORMAT).to_string()
    }

    /// Whether both quotes record the same observation, whichever strategy produced them.
    pub fn same_observation(&self, other: &Quote) -> bool {
        self.value == other.value
            && self.change_absolute == other.change_absolute
            && self.change_percent == other.change_percent
            && self.time_span == other.time_span
            && self.captured_at == other.captured_at
    }

    /// Copy of this quote attributed to another source.
    pub fn with_source(&self, source: Source) -> Quote {
        Quote {
            source,
            ..self.clone()
        }
    }
}

/// Split a combined `"<abs> (<pct>)"` string back into its two parts.
pub fn split_rate_of_change(text: &str) -> Option<(String, String)> {
    let (abs, rest) = text.trim().rsplit_once(" (")?;
    let pct = rest.strip_suffix(')')?;
    Some((abs.trim().to_string(), pct.trim().to_string()))
}

/// Parse a timestamp written with [`TIMESTAMP_FORMAT`].
pub fn parse_timestamp(text: &str) -> Result<NaiveDateTime, FeedError> {
    NaiveDateTime::parse_from_str(text.trim(), TIMESTAMP_FORMAT)
        .map_err(|e| FeedError::Format(format!("timestamp {text:?}: {e}")))
}

fn required(name: &str, raw: &str) -> Result<String, FeedError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(FeedError::Extraction(format!("missing field: {name}")));
    }
    Ok(trimmed.to_string())
}

fn strip_parens(text: &str) -> String {
    text.strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .unwrap_or(text)
        .trim()
        .to_string()
}

fn truncate_to_seconds(at: NaiveDateTime) -> NaiveDateTime {
    at.with_nanosecond(0).unwrap_or(at)
}

fn parse_decimal(text: &str) -> Option<f64> {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-' || *c == '+')
        .collect();
    if !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    cleaned.parse().ok()
}

/// JSON representation of a quote; `rateOfChange` is derived on output and ignored on input.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteRecord {
    value: String,
    change_absolute: String,
    change_percent: String,
    #[serde(default)]
    rate_of_change: String,
    time_span: String,
    #[serde(with = "timestamp_text")]
    captured_at: NaiveDateTime,
    source: Source,
}

impl From<Quote> for QuoteRecord {
    fn from(q: Quote) -> Self {
        QuoteRecord {
            rate_of_change: q.rate_of_change(),
            value: q.value,
            change_absolute: q.change_absolute,
            change_percent: q.change_percent,
            time_span: q.time_span,
            captured_at: q.captured_at,
            source: q.source,
        }
    }
}

impl From<QuoteRecord> for Quote {
    fn from(r: QuoteRecord) -> Self {
        Quote {
            value: r.value,
            change_absolute: r.change_absolute,
            change_percent: r.change_percent,
            time_span: r.time_span,
            captured_at: r.captured_at,
            source: r.source,
        }
    }
}

mod timestamp_text {
    use super::TIMESTAMP_FORMAT;
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(at: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&at.format(TIMESTAMP_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let text = String::deserialize(d)?;
        NaiveDateTime::parse_from_str(&text, TIMESTAMP_FORMAT).map_err(serde::de::Error::custom)
    }
}
