//! Read side of the server: on-demand queries, the export and per-connection event streams.
//!
//! A query prefers the live quote, then an immediate acquisition, then the newest logged
//! row. A stream relays the live state to one subscriber, sending each distinct quote once
//! and a heartbeat whenever a wait window passes without one.

use crate::model::live_state::{LiveState, Snapshot};
use crate::scheduler::SchedulerHandle;
use crate::store::TimeSeriesStore;
use async_stream::stream;
use chrono::{Local, NaiveDateTime};
use futures::Stream;
use log::{debug, error, info, warn};
use spot_common::wire::{DataResponse, NO_DATA, StreamEvent};
use spot_common::{Quote, Result, Source};
use std::sync::Arc;
use std::time::Duration;

/// Serves queries, exports and streams from the shared live state.
pub struct DistributionService {
    live: Arc<LiveState>,
    store: Arc<TimeSeriesStore>,
    scheduler: SchedulerHandle,
    heartbeat: Duration,
    on_demand_timeout: Duration,
}

impl DistributionService {
    /// Service over `live` and `store`; empty-state queries go through `scheduler`.
    pub fn new(
        live: Arc<LiveState>,
        store: Arc<TimeSeriesStore>,
        scheduler: SchedulerHandle,
        heartbeat: Duration,
        on_demand_timeout: Duration,
    ) -> Self {
        Self {
            live,
            store,
            scheduler,
            heartbeat,
            on_demand_timeout,
        }
    }

    /// Answer an on-demand read. Blocks while an immediate acquisition runs.
    pub fn query(&self) -> DataResponse {
        match &self.live.snapshot().quote {
            Some(quote) if quote.source == Source::Cache => return DataResponse::from_log(quote.clone()),
            Some(quote) => return DataResponse::live(quote.clone()),
            None => {}
        }

        info!("No live quote yet, running an on-demand acquisition");
        let attempt_error = match self.scheduler.request_cycle(self.on_demand_timeout) {
            Ok(quote) if quote.source == Source::Cache => return DataResponse::from_log(quote),
            Ok(quote) => return DataResponse::live(quote),
            Err(e) => {
                warn!("On-demand acquisition failed: {}", e);
                e.to_string()
            }
        };

        match self.store.latest() {
            Ok(Some(quote)) => return DataResponse::from_log(quote),
            Ok(None) => debug!("Log holds no rows"),
            Err(e) => error!("Reading the log failed: {}", e),
        }

        let message = self
            .live
            .snapshot()
            .error
            .clone()
            .unwrap_or(attempt_error);
        if message.is_empty() {
            DataResponse::failure(NO_DATA)
        } else {
            DataResponse::failure(message)
        }
    }

    /// Whole log file, or `None` when it has no data rows.
    pub fn export(&self) -> Result<Option<Vec<u8>>> {
        self.store.export()
    }

    /// File name offered for the export download.
    pub fn export_name(&self) -> String {
        self.store
            .path()
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "quotes.csv".to_string())
    }

    /// Shared live state.
    pub fn live(&self) -> Arc<LiveState> {
        Arc::clone(&self.live)
    }

    /// Silence window before a stream heartbeat.
    pub fn heartbeat(&self) -> Duration {
        self.heartbeat
    }
}

/// Per-connection memory of the last observation sent. A quote re-served from the log
/// counts as already sent.
#[derive(Debug, Default)]
pub struct StreamCursor {
    last_sent: Option<Quote>,
}

impl StreamCursor {
    /// Quote event if `snapshot` holds a quote this connection has not seen yet.
    pub fn fresh(&mut self, snapshot: &Snapshot) -> Option<StreamEvent> {
        let quote = snapshot.quote.as_ref()?;
        if self.last_sent.as_ref().is_some_and(|sent| sent.same_observation(quote)) {
            return None;
        }
        self.last_sent = Some(quote.clone());
        Some(StreamEvent::Data(quote.clone()))
    }

    /// Event for one wake-up: the new quote if any, a heartbeat otherwise.
    pub fn next_event(&mut self, snapshot: &Snapshot, now: NaiveDateTime) -> StreamEvent {
        self.fresh(snapshot).unwrap_or_else(|| StreamEvent::heartbeat(now))
    }
}

struct Subscription;

impl Drop for Subscription {
    fn drop(&mut self) {
        info!("Stream subscriber disconnected");
    }
}

/// Endless event stream for one subscriber. Dropping it ends the subscription.
///
/// The current quote, if any, is sent right away. After that every wake-up yields one
/// event: a pulse or a `heartbeat` timeout.
pub fn event_stream(live: Arc<LiveState>, heartbeat: Duration) -> impl Stream<Item = StreamEvent> + Send {
    stream! {
        let _subscription = Subscription;
        debug!("Stream subscriber connected");
        let mut cursor = StreamCursor::default();
        if let Some(event) = cursor.fresh(&live.snapshot()) {
            yield event;
        }
        loop {
            live.wait_for_pulse(heartbeat).await;
            yield cursor.next_event(&live.snapshot(), Local::now().naive_local());
        }
    }
}
