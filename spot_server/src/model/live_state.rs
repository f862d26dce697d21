//! Process-wide "latest quote" slot with a pulse-style change signal.
//!
//! Exactly one writer (the acquisition scheduler) replaces the current `Snapshot`; any
//! number of readers (query handlers, stream connections) clone the `Arc` and read it
//! without further locking. Every write swaps in a whole new immutable snapshot, so a
//! reader sees either the old state or the new one, never a mix.
//!
//! The change signal is a pulse, not a queue: `update` wakes whoever is waiting at that
//! moment and keeps no memory of it. A subscriber that was busy when the pulse fired
//! simply misses it and must re-check the snapshot on its next wake-up (its own timeout).

use crate::store::JournalHandle;
use log::debug;
use spot_common::Quote;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Notify;

/// Immutable view of the live state at one revision.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    /// Most recent quote, kept even while acquisition is failing.
    pub quote: Option<Quote>,
    /// Last failure description; cleared by the next successful update.
    pub error: Option<String>,
    /// Incremented on every successful update.
    pub revision: u64,
}

/// Shared live state. Construct once in `main` and hand out `Arc`s.
pub struct LiveState {
    current: RwLock<Arc<Snapshot>>,
    pulse: Notify,
    journal: Option<JournalHandle>,
}

impl LiveState {
    /// Empty state. Live quotes are forwarded to `journal` when one is given.
    pub fn new(journal: Option<JournalHandle>) -> Self {
        Self {
            current: RwLock::new(Arc::new(Snapshot::default())),
            pulse: Notify::new(),
            journal,
        }
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Publish a new quote: swap the snapshot, queue the row, then pulse.
    ///
    /// Quotes served from the log are published but not logged again.
    pub fn update(&self, quote: Quote) {
        let revision = {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            let next = Snapshot {
                quote: Some(quote.clone()),
                error: None,
                revision: current.revision + 1,
            };
            *current = Arc::new(next);
            current.revision
        };

        if quote.source.is_live() {
            if let Some(journal) = &self.journal {
                journal.submit(quote);
            }
        }
        debug!("Live state at revision {}", revision);
        self.pulse.notify_waiters();
    }

    /// Record a failure, keeping the previous quote.
    pub fn record_error(&self, message: impl Into<String>) {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let next = Snapshot {
            quote: current.quote.clone(),
            error: Some(message.into()),
            revision: current.revision,
        };
        *current = Arc::new(next);
    }

    /// Wait for the next pulse. Returns `false` when `timeout` elapsed first.
    pub async fn wait_for_pulse(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.pulse.notified()).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{TimeSeriesStore, spawn_journal};
    use crate::test_support::sample_quote;
    use spot_common::Source;
    use std::thread;

    #[test]
    fn update_replaces_quote_and_clears_error() {
        let live = LiveState::new(None);
        live.record_error("probe timed out");
        assert_eq!(live.snapshot().error.as_deref(), Some("probe timed out"));

        let quote = sample_quote("2,600.00", Source::Browser);
        live.update(quote.clone());

        let snap = live.snapshot();
        assert_eq!(snap.quote.as_ref(), Some(&quote));
        assert_eq!(snap.error, None);
        assert_eq!(snap.revision, 1);
    }

    #[test]
    fn errors_keep_the_stale_quote() {
        let live = LiveState::new(None);
        let quote = sample_quote("2,600.00", Source::Api);
        live.update(quote.clone());
        live.record_error("all strategies failed");

        let snap = live.snapshot();
        assert_eq!(snap.quote, Some(quote));
        assert_eq!(snap.error.as_deref(), Some("all strategies failed"));
        assert_eq!(snap.revision, 1);
    }

    #[test]
    fn readers_never_observe_a_torn_snapshot() {
        let live = Arc::new(LiveState::new(None));
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let live = Arc::clone(&live);
                thread::spawn(move || {
                    for _ in 0..2_000 {
                        let snap = live.snapshot();
                        if let Some(q) = &snap.quote {
                            assert_eq!(q.value, snap.revision.to_string());
                            assert!(snap.error.is_none());
                        }
                    }
                })
            })
            .collect();

        for i in 1..=500u64 {
            live.update(sample_quote(&i.to_string(), Source::Browser));
            let snap = live.snapshot();
            assert_eq!(snap.quote.as_ref().map(|q| q.value.clone()), Some(i.to_string()));
        }
        for r in readers {
            r.join().unwrap();
        }
    }

    #[test]
    fn only_live_quotes_reach_the_journal() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(TimeSeriesStore::open(dir.path().join("log.csv")).unwrap());
        let (journal, worker) = spawn_journal(Arc::clone(&store), 4).unwrap();
        let live = LiveState::new(Some(journal));

        live.update(sample_quote("2,601.00", Source::Browser));
        live.update(sample_quote("2,500.00", Source::Cache));
        drop(live);
        worker.join().unwrap();

        let rows = store.last_n(10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, "2,601.00");
    }

    #[tokio::test]
    async fn pulse_wakes_a_waiter_and_times_out_otherwise() {
        let live = Arc::new(LiveState::new(None));
        assert!(!live.wait_for_pulse(Duration::from_millis(20)).await);

        let writer = Arc::clone(&live);
        let waiter = tokio::spawn(async move { live.wait_for_pulse(Duration::from_secs(5)).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        writer.update(sample_quote("2,610.00", Source::Api));

        assert!(waiter.await.unwrap());
    }
}
