//!
//! Common types and utilities shared by the spot price feed server and client.
//!
//! This crate aggregates:
//! - `error` — unified error type `FeedError` used across the workspace.
//! - `result` — handy `Result<T, FeedError>` alias.
//! - `quote` — the normalized `Quote` observation and its validation.
//! - `source` — which acquisition method produced a quote.
//! - `wire` — JSON payloads served by the query and streaming endpoints.
//! - `net` — networking constants and small helpers.
#![warn(missing_docs)]
pub mod error;
pub mod net;
pub mod quote;
pub mod result;
pub mod source;
pub mod wire;

pub use error::FeedError;
pub use quote::{ExtractedFields, Quote};
pub use result::Result;
pub use source::Source;
