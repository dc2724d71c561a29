//! Core functionality for actual scanning behaviour.
//!
//! A [`ScanOrchestrator`] pulls targets from a strategy, runs each through
//! the [`StreamValidator`] under the [`RateLimiter`], and hands the outcomes
//! back as a stream in the order the probes finish.
mod progress;
mod smart;

pub use progress::{ScanProgress, ScanState};
pub use smart::{SmartPortScanner, DEFAULT_DISCOVERY_TIMEOUT};

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, FuturesUnordered, StreamExt};
use log::{debug, error, info};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::errors::ScanError;
use crate::limiter::{RateLimiter, Slot};
use crate::strategy::{ScanStrategy, Target, Targets};
use crate::validator::{Prober, StreamValidator, ValidationOutcome};
use smart::SmartSchedule;

/// Called after every resolved probe with the updated totals. An error
/// aborts the scan.
pub type ProgressObserver = Arc<dyn Fn(&ScanProgress) -> anyhow::Result<()> + Send + Sync>;

/// Outcomes in completion order. Yields at most one `Err`, after which it
/// ends.
pub type OutcomeStream = BoxStream<'static, Result<ValidationOutcome, ScanError>>;

/// Drives one scan from start to a terminal state.
///
/// An orchestrator runs a single scan: `start` or `start_smart` may be
/// called once. Keep the orchestrator around to cancel the scan or read its
/// progress while the returned stream is consumed.
pub struct ScanOrchestrator<P: Prober> {
    validator: Arc<StreamValidator<P>>,
    limiter: RateLimiter,
    observers: Vec<ProgressObserver>,
    cancel: CancellationToken,
    state: Arc<Mutex<ScanState>>,
    progress: Arc<Mutex<Option<ScanProgress>>>,
}

impl<P: Prober> ScanOrchestrator<P> {
    pub fn new(validator: Arc<StreamValidator<P>>, limiter: RateLimiter) -> Self {
        Self {
            validator,
            limiter,
            observers: Vec::new(),
            cancel: CancellationToken::new(),
            state: Arc::new(Mutex::new(ScanState::Idle)),
            progress: Arc::new(Mutex::new(None)),
        }
    }

    /// Registers an observer. Observers run in registration order.
    pub fn on_progress<F>(&mut self, observer: F) -> &mut Self
    where
        F: Fn(&ScanProgress) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.observers.push(Arc::new(observer));
        self
    }

    /// Starts scanning the targets of `strategy`.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use std::sync::Arc;
    /// # use std::time::Duration;
    /// # use futures::StreamExt;
    /// # use iptvscan::limiter::RateLimiter;
    /// # use iptvscan::scanner::ScanOrchestrator;
    /// # use iptvscan::strategy::TemplateStrategy;
    /// # use iptvscan::validator::{FfprobeProber, StreamValidator};
    /// # async fn run() -> anyhow::Result<()> {
    /// let validator = Arc::new(StreamValidator::new(FfprobeProber::new("ffprobe"), 10)?);
    /// let orchestrator = ScanOrchestrator::new(validator, RateLimiter::new(10, Duration::from_secs(10))?);
    ///
    /// let strategy = TemplateStrategy::new("http://192.168.1.1:4022/rtp/{ip}", "192.168.1.1", "192.168.1.254")?;
    /// let mut outcomes = orchestrator.start(strategy.into())?;
    /// while let Some(outcome) = outcomes.next().await {
    ///     let outcome = outcome?;
    ///     if outcome.is_valid {
    ///         println!("{}", outcome.target);
    ///     }
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub fn start(&self, strategy: ScanStrategy) -> Result<OutcomeStream, ScanError> {
        let total = strategy.estimated_count();
        self.launch(total, ScanPlan::Direct(strategy.produce()))
    }

    /// Starts a multicast scan through the smart port scanner.
    pub fn start_smart(&self, scanner: SmartPortScanner) -> Result<OutcomeStream, ScanError> {
        let total = scanner.estimated_count();
        self.launch(total, scanner.into_plan())
    }

    /// Stops pulling new targets. Probes already dispatched still finish
    /// and are still yielded.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this scan, for wiring into signal handlers.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Snapshot of the totals, `None` until the scan starts.
    pub fn progress(&self) -> Option<ScanProgress> {
        *self.progress.lock()
    }

    pub fn state(&self) -> ScanState {
        *self.state.lock()
    }

    fn launch(&self, total: u64, plan: ScanPlan) -> Result<OutcomeStream, ScanError> {
        {
            let mut state = self.state.lock();
            if *state != ScanState::Idle {
                return Err(ScanError::AlreadyStarted(*state));
            }
            *state = ScanState::Running;
        }

        let progress = ScanProgress::new(total);
        *self.progress.lock() = Some(progress);

        info!(
            "Starting scan of {total} targets, concurrency {}, timeout {:?}",
            self.limiter.max_concurrency(),
            self.limiter.timeout()
        );

        let coordinator = Coordinator {
            plan,
            validator: Arc::clone(&self.validator),
            limiter: self.limiter.clone(),
            observers: self.observers.clone(),
            cancel: self.cancel.clone(),
            state: Arc::clone(&self.state),
            shared_progress: Arc::clone(&self.progress),
            progress,
            in_flight: FuturesUnordered::new(),
            pending: None,
            exhausted: false,
            halted: false,
            finished: false,
        };

        Ok(stream::unfold(coordinator, |mut coordinator| async move {
            let item = coordinator.next().await?;
            Some((item, coordinator))
        })
        .boxed())
    }
}

/// Where the next target comes from.
pub(crate) enum ScanPlan {
    Direct(Targets),
    Smart(SmartSchedule),
}

pub(crate) enum Pull {
    /// Probe this target, optionally with its own timeout.
    Probe(Target, Option<Duration>),
    /// Nothing can be scheduled until the probes in flight resolve.
    Barrier,
    Exhausted,
}

impl ScanPlan {
    /// `idle` is true when no probe is in flight.
    fn pull(&mut self, idle: bool) -> Pull {
        match self {
            Self::Direct(targets) => targets
                .next()
                .map_or(Pull::Exhausted, |target| Pull::Probe(target, None)),
            Self::Smart(schedule) => schedule.pull(idle),
        }
    }

    fn observe(&mut self, outcome: &ValidationOutcome) {
        if let Self::Smart(schedule) = self {
            schedule.observe(outcome);
        }
    }
}

enum Step {
    Resolved(ValidationOutcome),
    Acquired(Slot),
    Cancelled,
    Closed,
}

/// The single task that submits probes and collects their outcomes.
struct Coordinator<P: Prober> {
    plan: ScanPlan,
    validator: Arc<StreamValidator<P>>,
    limiter: RateLimiter,
    observers: Vec<ProgressObserver>,
    cancel: CancellationToken,
    state: Arc<Mutex<ScanState>>,
    shared_progress: Arc<Mutex<Option<ScanProgress>>>,
    progress: ScanProgress,
    in_flight: FuturesUnordered<BoxFuture<'static, ValidationOutcome>>,
    pending: Option<(Target, Option<Duration>)>,
    exhausted: bool,
    halted: bool,
    finished: bool,
}

impl<P: Prober> Coordinator<P> {
    async fn next(&mut self) -> Option<Result<ValidationOutcome, ScanError>> {
        loop {
            if self.finished {
                return None;
            }

            if self.cancel.is_cancelled() && !self.halted && !self.exhausted {
                self.halted = true;
                self.pending = None;
                debug!(
                    "Cancellation requested, waiting on {} probes in flight",
                    self.in_flight.len()
                );
            }

            if self.halted || self.exhausted {
                if let Some(outcome) = self.in_flight.next().await {
                    return Some(self.record(outcome));
                }
                self.finish();
                return None;
            }

            if self.pending.is_none() {
                match self.plan.pull(self.in_flight.is_empty()) {
                    Pull::Probe(target, timeout) => self.pending = Some((target, timeout)),
                    Pull::Barrier => {
                        if let Some(outcome) = self.in_flight.next().await {
                            return Some(self.record(outcome));
                        }
                        continue;
                    }
                    Pull::Exhausted => {
                        self.exhausted = true;
                        continue;
                    }
                }
            }

            let step = tokio::select! {
                biased;
                Some(outcome) = self.in_flight.next(), if !self.in_flight.is_empty() => {
                    Step::Resolved(outcome)
                }
                () = self.cancel.cancelled() => Step::Cancelled,
                slot = self.limiter.acquire() => match slot {
                    Ok(slot) => Step::Acquired(slot),
                    Err(_) => Step::Closed,
                },
            };

            match step {
                Step::Resolved(outcome) => return Some(self.record(outcome)),
                Step::Cancelled => continue,
                Step::Acquired(slot) => {
                    if let Some((target, timeout)) = self.pending.take() {
                        self.submit(slot, target, timeout);
                    }
                }
                Step::Closed => {
                    error!("Rate limiter closed mid-scan");
                    self.abort();
                    return Some(Err(ScanError::LimiterClosed));
                }
            }
        }
    }

    fn submit(&mut self, slot: Slot, target: Target, timeout: Option<Duration>) {
        let requested = timeout.unwrap_or_else(|| self.limiter.timeout());
        let deadline = self.validator.probe_timeout(&target, requested);
        let validator = Arc::clone(&self.validator);

        debug!("Probing {target} (deadline {deadline:?})");

        self.in_flight.push(Box::pin(async move {
            match slot.run(validator.validate(&target, requested), Some(deadline)).await {
                Ok(outcome) => outcome,
                Err(_) => ValidationOutcome::timed_out(&target, deadline),
            }
        }));
    }

    fn record(&mut self, outcome: ValidationOutcome) -> Result<ValidationOutcome, ScanError> {
        self.progress.record(outcome.is_valid);
        *self.shared_progress.lock() = Some(self.progress);
        self.plan.observe(&outcome);

        let progress = self.progress;
        if let Some(e) = self
            .observers
            .iter()
            .find_map(|observer| observer(&progress).err())
        {
            error!("Progress observer failed: {e:#}");
            self.abort();
            return Err(ScanError::Observer(e));
        }

        Ok(outcome)
    }

    fn finish(&mut self) {
        let state = if self.cancel.is_cancelled() {
            ScanState::Cancelled
        } else {
            ScanState::Completed
        };
        *self.state.lock() = state;
        self.finished = true;

        info!(
            "Scan {state}: {} of {} targets probed, {} valid, {} invalid",
            self.progress.completed, self.progress.total, self.progress.valid, self.progress.invalid
        );
    }

    fn abort(&mut self) {
        *self.state.lock() = ScanState::Failed;
        self.in_flight.clear();
        self.pending = None;
        self.finished = true;
    }
}

impl<P: Prober> Drop for Coordinator<P> {
    fn drop(&mut self) {
        // The caller dropped the stream before it ran out.
        if !self.finished {
            *self.state.lock() = ScanState::Cancelled;
        }
    }
}
