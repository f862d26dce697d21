//! Acquisition scheduler: drives the strategy chain on its own timeline.
//!
//! The `AcquisitionScheduler` runs on a dedicated thread for the life of the process. Each
//! cycle is a small state machine:
//!
//! - `Idle` → `Fetching { attempt: 1 }`
//! - `Fetching` → `Success(quote)` when the chain yields a quote, otherwise either another
//!   `Fetching` after the retry delay or `Failed(error)` once `RetryPolicy` gives up.
//! - `Success` publishes to the live state (which queues the durable append and pulses
//!   subscribers); `Failed` records the error on the live state and leaves the quote alone.
//!
//! Between cycles the thread waits `max(floor, interval − elapsed)` so slow fetches do not
//! stretch the cadence. While waiting it serves `SchedulerCommand`s: on-demand cycles
//! requested by the query endpoint (the driver session never leaves this thread) and
//! shutdown. Pending requests are merged into one cycle, requests whose caller already gave
//! up are dropped, and a request arriving within `floor` of the previous cycle reuses that
//! cycle's outcome, so a burst of queries never turns into a burst of scrapes. A panic inside a cycle is caught, logged, and followed by the shorter recovery
//! sleep; the loop itself only ends on an explicit shutdown.

use crate::fetch::{AttemptContext, StrategyChain};
use crate::model::live_state::LiveState;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, bounded, unbounded};
use log::{debug, error, info, warn};
use spot_common::{FeedError, Quote, Result};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Bounded in-cycle retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Chain runs per cycle, including the first.
    pub max_attempts: u32,
    /// Fixed pause between runs.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

/// Outcome of [`RetryPolicy::decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Run the chain again after the pause.
    Retry(Duration),
    /// End the cycle as failed.
    GiveUp,
}

impl RetryPolicy {
    /// Decide what follows failed attempt number `attempt` (1-based).
    pub fn decide(&self, attempt: u32, error: &FeedError) -> RetryDecision {
        if error.is_retryable() && attempt < self.max_attempts {
            RetryDecision::Retry(self.delay)
        } else {
            RetryDecision::GiveUp
        }
    }
}

/// Inter-cycle pacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence {
    /// Target period between cycle starts.
    pub interval: Duration,
    /// Minimum pause, even after a cycle longer than `interval`.
    pub floor: Duration,
}

impl Default for Cadence {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            floor: Duration::from_secs(1),
        }
    }
}

impl Cadence {
    /// Pause after a cycle that took `elapsed`.
    pub fn sleep_after(&self, elapsed: Duration) -> Duration {
        self.interval.saturating_sub(elapsed).max(self.floor)
    }
}

/// All timing knobs of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerTiming {
    /// In-cycle retries.
    pub retry: RetryPolicy,
    /// Inter-cycle pacing.
    pub cadence: Cadence,
    /// Pause after an unexpected failure.
    pub recovery: Duration,
}

impl Default for SchedulerTiming {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            cadence: Cadence::default(),
            recovery: Duration::from_secs(5),
        }
    }
}

/// Per-cycle states.
#[derive(Debug)]
pub enum CycleState {
    /// Before the first attempt.
    Idle,
    /// Running the chain; `attempt` is 1-based.
    Fetching {
        /// Current attempt number.
        attempt: u32,
    },
    /// The chain produced a quote.
    Success(Quote),
    /// Retries exhausted or a non-retryable error.
    Failed(FeedError),
}

/// An on-demand cycle request and where to deliver its outcome.
pub struct CycleRequest {
    reply: Sender<Result<Quote>>,
    deadline: Instant,
}

impl CycleRequest {
    fn is_waiting(&self, now: Instant) -> bool {
        now < self.deadline
    }
}

/// Requests accepted by a running scheduler.
pub enum SchedulerCommand {
    /// Run one cycle now and send its result back.
    RunNow(CycleRequest),
    /// Leave the loop.
    Shutdown,
}

/// Cloneable handle for talking to the scheduler thread.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: Sender<SchedulerCommand>,
}

impl SchedulerHandle {
    /// Ask for an immediate cycle and wait up to `timeout` for its result.
    pub fn request_cycle(&self, timeout: Duration) -> Result<Quote> {
        let (reply_tx, reply_rx) = bounded(1);
        let request = CycleRequest {
            reply: reply_tx,
            deadline: Instant::now() + timeout,
        };
        self.tx
            .send(SchedulerCommand::RunNow(request))
            .map_err(|e| FeedError::ChannelSend(e.to_string()))?;
        match reply_rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(FeedError::Timeout(format!(
                "on-demand acquisition exceeded {}s",
                timeout.as_secs()
            ))),
            Err(RecvTimeoutError::Disconnected) => {
                Err(FeedError::ChannelRecv("scheduler dropped the request".into()))
            }
        }
    }

    /// Stop the scheduler after its current cycle.
    pub fn shutdown(&self) -> Result<()> {
        self.tx
            .send(SchedulerCommand::Shutdown)
            .map_err(|e| FeedError::ChannelSend(e.to_string()))
    }
}

/// Command channel pair; the receiver goes to [`AcquisitionScheduler::new`].
pub fn command_channel() -> (SchedulerHandle, Receiver<SchedulerCommand>) {
    let (tx, rx) = unbounded();
    (SchedulerHandle { tx }, rx)
}

/// Background acquisition loop.
pub struct AcquisitionScheduler {
    chain: StrategyChain,
    live: Arc<LiveState>,
    timing: SchedulerTiming,
    commands: Receiver<SchedulerCommand>,
    failing_since: Option<Instant>,
    last_outcome: Option<(Instant, Result<Quote>)>,
}

impl AcquisitionScheduler {
    /// Scheduler over `chain`, publishing to `live`.
    pub fn new(
        chain: StrategyChain,
        live: Arc<LiveState>,
        timing: SchedulerTiming,
        commands: Receiver<SchedulerCommand>,
    ) -> Self {
        Self {
            chain,
            live,
            timing,
            commands,
            failing_since: None,
            last_outcome: None,
        }
    }

    /// Run one full cycle, retries included.
    pub fn run_cycle(&mut self) -> Result<Quote> {
        let mut state = CycleState::Idle;
        loop {
            state = match state {
                CycleState::Idle => CycleState::Fetching { attempt: 1 },
                CycleState::Fetching { attempt } => {
                    let ctx = AttemptContext::now(self.failing_for());
                    match self.chain.run(&ctx) {
                        Ok(quote) => CycleState::Success(quote),
                        Err(e) => match self.timing.retry.decide(attempt, &e) {
                            RetryDecision::Retry(delay) => {
                                warn!(
                                    "Attempt {}/{} failed: {}",
                                    attempt, self.timing.retry.max_attempts, e
                                );
                                thread::sleep(delay);
                                CycleState::Fetching { attempt: attempt + 1 }
                            }
                            RetryDecision::GiveUp => CycleState::Failed(e),
                        },
                    }
                }
                CycleState::Success(quote) => {
                    info!(
                        "Quote {} | {} | {} via {}",
                        quote.value,
                        quote.rate_of_change(),
                        quote.time_span,
                        quote.source
                    );
                    if quote.source.is_live() {
                        self.failing_since = None;
                    } else {
                        self.failing_since.get_or_insert_with(Instant::now);
                    }
                    self.live.update(quote.clone());
                    return Ok(quote);
                }
                CycleState::Failed(e) => {
                    error!("Acquisition cycle failed: {}", e);
                    self.failing_since.get_or_insert_with(Instant::now);
                    self.live.record_error(e.to_string());
                    return Err(e);
                }
            };
        }
    }

    /// Loop until shutdown. Never returns because of a failed or panicking cycle.
    pub fn run(mut self) {
        info!(
            "Acquisition scheduler started (Thread ID: {:?}), strategies: {:?}",
            thread::current().id(),
            self.chain.names()
        );
        loop {
            let started = Instant::now();
            let pause = match self.guarded_cycle() {
                Ok(_) => self.timing.cadence.sleep_after(started.elapsed()),
                Err(e) => {
                    error!("{}", e);
                    self.timing.recovery
                }
            };
            if !self.idle(pause) {
                break;
            }
        }
        info!("Acquisition scheduler stopped");
    }

    /// Cycle with panics turned into an error. `Ok` holds the cycle's own result.
    fn guarded_cycle(&mut self) -> std::result::Result<Result<Quote>, FeedError> {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.run_cycle())).map_err(|payload| {
            let message = format!("Unexpected failure in acquisition cycle: {}", panic_message(payload.as_ref()));
            self.failing_since.get_or_insert_with(Instant::now);
            self.live.record_error(message.clone());
            FeedError::Format(message)
        });
        let flat = match &outcome {
            Ok(result) => replay(result),
            Err(e) => Err(e.replay()),
        };
        self.last_outcome = Some((Instant::now(), flat));
        outcome
    }

    /// Serve `first` and every other request already queued with a single cycle.
    /// Returns `false` if a shutdown was queued among them.
    fn serve_requests(&mut self, first: CycleRequest) -> bool {
        let mut requests = vec![first];
        let mut keep_running = true;
        loop {
            match self.commands.try_recv() {
                Ok(SchedulerCommand::RunNow(request)) => requests.push(request),
                Ok(SchedulerCommand::Shutdown) => keep_running = false,
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }

        let now = Instant::now();
        let queued = requests.len();
        requests.retain(|r| r.is_waiting(now));
        if requests.len() < queued {
            debug!("Dropped {} on-demand requests whose callers gave up", queued - requests.len());
        }
        if requests.is_empty() {
            return keep_running;
        }

        let recent = match &self.last_outcome {
            Some((at, result)) if at.elapsed() < self.timing.cadence.floor => Some(replay(result)),
            _ => None,
        };
        let outcome = match recent {
            Some(result) => {
                debug!("Answering {} on-demand requests from the cycle that just ran", requests.len());
                result
            }
            None => {
                debug!("Running one cycle for {} on-demand requests", requests.len());
                self.guarded_cycle().and_then(|r| r)
            }
        };
        for request in requests {
            if request.reply.send(replay(&outcome)).is_err() {
                warn!("On-demand requester went away before the cycle finished");
            }
        }
        keep_running
    }

    /// Wait `pause`, serving commands meanwhile. Returns `false` on shutdown.
    fn idle(&mut self, pause: Duration) -> bool {
        let deadline = Instant::now() + pause;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return true;
            }
            match self.commands.recv_timeout(remaining) {
                Ok(SchedulerCommand::RunNow(request)) => {
                    if !self.serve_requests(request) {
                        return false;
                    }
                }
                Ok(SchedulerCommand::Shutdown) => return false,
                Err(RecvTimeoutError::Timeout) => return true,
                Err(RecvTimeoutError::Disconnected) => {
                    thread::sleep(remaining);
                    return true;
                }
            }
        }
    }

    fn failing_for(&self) -> Duration {
        self.failing_since.map(|t| t.elapsed()).unwrap_or_default()
    }
}

fn replay(result: &Result<Quote>) -> Result<Quote> {
    match result {
        Ok(quote) => Ok(quote.clone()),
        Err(e) => Err(e.replay()),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
