//! JSON payloads exchanged between the feed server and its consumers.
//!
//! `DataResponse` is returned by the on-demand query endpoint and `StreamEvent` is the
//! body of every server-sent event. Both are plain serde types so the client can decode
//! exactly what the server encodes.

use crate::quote::{Quote, TIMESTAMP_FORMAT};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Note attached to a query answered from the durable log.
pub const LOG_NOTE: &str = "Using latest available data from log";

/// Message used when nothing has ever been acquired and no error was recorded.
pub const NO_DATA: &str = "No data available";

/// Response of the query endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataResponse {
    /// Whether `data` carries a quote.
    pub success: bool,
    /// Latest quote, live or from the log.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Quote>,
    /// Annotation for stale answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Last recorded failure when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DataResponse {
    /// Fresh quote from the live state or an immediate acquisition.
    pub fn live(quote: Quote) -> Self {
        Self {
            success: true,
            data: Some(quote),
            note: None,
            error: None,
        }
    }

    /// Quote recovered from the durable log.
    pub fn from_log(quote: Quote) -> Self {
        Self {
            success: true,
            data: Some(quote),
            note: Some(LOG_NOTE.to_string()),
            error: None,
        }
    }

    /// No quote could be produced.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            note: None,
            error: Some(error.into()),
        }
    }
}

/// One server-sent event on the streaming endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StreamEvent {
    /// Keep-alive emitted when no new quote arrived within the wait window.
    Heartbeat {
        /// Always `true`; lets consumers tell heartbeats from quotes.
        heartbeat: bool,
        /// Server time the heartbeat was produced.
        timestamp: String,
    },
    /// A quote not previously sent on this connection.
    Data(Quote),
}

impl StreamEvent {
    /// Build a heartbeat stamped with `now`.
    pub fn heartbeat(now: NaiveDateTime) -> Self {
        StreamEvent::Heartbeat {
            heartbeat: true,
            timestamp: now.format(TIMESTAMP_FORMAT).to_string(),
        }
    }

    /// Encode as the JSON text carried in an SSE `data:` line.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
