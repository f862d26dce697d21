//! Error types shared between the feed server and the stream client.
//!
//! The `FeedError` enum unifies I/O, serialization, channel communication and the
//! acquisition failure taxonomy, so every crate in the workspace propagates a single
//! error type. Fetch failures are values, not panics: the strategy chain turns them
//! into "try the next strategy", and the scheduler turns an exhausted chain into a
//! recorded error string on the live state.
use std::io;
use std::sync::PoisonError;

use thiserror::Error;

/// Unified error type shared by server and client.
#[derive(Error, Debug)]
pub enum FeedError {
    /// I/O error originating from the standard library, sockets or files.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Generic formatting/validation error with a human-readable message.
    #[error("Format error: {0}")]
    Format(String),

    /// Failure while encoding/decoding JSON via serde_json.
    #[error("JSON serialization/deserialization error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    /// Timeout, refused connection or a retryable HTTP status.
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    /// An expected field was missing or could not be parsed.
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// The acquisition driver/session could not be created.
    #[error("Resource creation error: {0}")]
    ResourceCreation(String),

    /// Appending to or reading from the durable log failed.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// The durable log holds no rows yet.
    #[error("Cache fallback unavailable: the log is empty")]
    CacheEmpty,

    /// The most recent logged row is older than the active ceiling, or stamped in the future.
    #[error("Cached row age {age_secs}s is outside the {ceiling_secs}s ceiling")]
    StaleCache {
        /// Age of the newest row in seconds.
        age_secs: i64,
        /// Ceiling that was in force for this attempt.
        ceiling_secs: u64,
    },

    /// Every strategy of the chain failed; contains a per-strategy summary.
    #[error("All fetch strategies failed: {0}")]
    Exhausted(String),

    /// An operation did not complete within its deadline.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Crossbeam/channel send failed (e.g., receiver dropped); contains a short context string.
    #[error("Channel send failed: {0}")]
    ChannelSend(String),

    /// Crossbeam/channel receive failed (e.g., sender closed); contains a short context string.
    #[error("Channel receive failed: {0}")]
    ChannelRecv(String),

    /// Error indicating a poisoned mutex/lock was encountered.
    #[error("Mutex Lock Poisoned: {0}")]
    MutexLock(String),
}

impl FeedError {
    /// Whether another attempt within the same cycle may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FeedError::TransientNetwork(_)
                | FeedError::Extraction(_)
                | FeedError::ResourceCreation(_)
                | FeedError::Timeout(_)
                | FeedError::Exhausted(_)
        )
    }

    /// Equivalent error for another recipient of the same outcome.
    ///
    /// Wrapped library errors keep their message but not their source.
    pub fn replay(&self) -> FeedError {
        match self {
            FeedError::Io(e) => FeedError::Io(io::Error::new(e.kind(), e.to_string())),
            FeedError::Format(m) => FeedError::Format(m.clone()),
            FeedError::SerdeJson(e) => FeedError::Format(e.to_string()),
            FeedError::TransientNetwork(m) => FeedError::TransientNetwork(m.clone()),
            FeedError::Extraction(m) => FeedError::Extraction(m.clone()),
            FeedError::ResourceCreation(m) => FeedError::ResourceCreation(m.clone()),
            FeedError::Persistence(m) => FeedError::Persistence(m.clone()),
            FeedError::CacheEmpty => FeedError::CacheEmpty,
            FeedError::StaleCache { age_secs, ceiling_secs } => FeedError::StaleCache {
                age_secs: *age_secs,
                ceiling_secs: *ceiling_secs,
            },
            FeedError::Exhausted(m) => FeedError::Exhausted(m.clone()),
            FeedError::Timeout(m) => FeedError::Timeout(m.clone()),
            FeedError::ChannelSend(m) => FeedError::ChannelSend(m.clone()),
            FeedError::ChannelRecv(m) => FeedError::ChannelRecv(m.clone()),
            FeedError::MutexLock(m) => FeedError::MutexLock(m.clone()),
        }
    }
}

impl<T> From<PoisonError<T>> for FeedError {
    fn from(err: PoisonError<T>) -> Self {
        FeedError::MutexLock(err.to_string())
    }
}
