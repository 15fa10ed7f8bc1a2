//! Periodic Job Scheduler
//!
//! Runs independent jobs on fixed intervals inside the tokio worker pool.
//!
//! ## Guarantees
//!
//! - At most one in-flight run per job id: each job has its own driver task
//!   that awaits the current run before waiting for the next tick, and a
//!   manual [`Scheduler::run_now`] that overlaps a run is refused as `Busy`
//! - Missed ticks are coalesced (`MissedTickBehavior::Skip`), never replayed
//!   in a burst after a stall
//! - Fault isolation: every run executes in its own spawned task under a
//!   timeout, so an error, a panic or a hang is logged and recorded on that
//!   job only; its later runs and every other job continue
//!
//! Jobs are registered once at startup; the [`Scheduler`] is then shared
//! (behind `Arc`) with the HTTP surface for introspection and pause/resume.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// A unit of periodic work.
#[async_trait]
pub trait Job: Send + Sync {
    /// One execution. `now` is the scheduled wall-clock time of the run.
    async fn run(&self, now: DateTime<Utc>) -> anyhow::Result<()>;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("unknown job '{0}'")]
    UnknownJob(String),

    #[error("job '{0}' is already registered")]
    DuplicateJob(String),
}

/// Registration metadata of a job.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub id: String,
    pub name: String,
    pub interval: Duration,
    /// Upper bound of a single run
    pub timeout: Duration,
}

impl JobSpec {
    pub fn new(id: impl Into<String>, name: impl Into<String>, interval: Duration, timeout: Duration) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            interval,
            timeout,
        }
    }

    /// Human-readable trigger, e.g. `interval[0:05:00]`.
    pub fn trigger(&self) -> String {
        let secs = self.interval.as_secs();
        format!("interval[{}:{:02}:{:02}]", secs / 3600, (secs / 60) % 60, secs % 60)
    }
}

/// How a single run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Failed(String),
    TimedOut,
    Panicked(String),
    /// The job is paused; nothing ran
    Skipped,
    /// Another run of the same job is still in flight; nothing ran
    Busy,
}

/// Introspection snapshot of one job.
#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    pub name: String,
    pub next_run: Option<DateTime<Utc>>,
    pub trigger: String,
    pub paused: bool,
    pub running: bool,
    pub runs: u64,
    pub failures: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
struct RunLog {
    next_run: Option<DateTime<Utc>>,
    last_run: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

struct JobSlot {
    spec: JobSpec,
    job: Arc<dyn Job>,
    paused: AtomicBool,
    in_flight: AtomicBool,
    runs: AtomicU64,
    failures: AtomicU64,
    log: Mutex<RunLog>,
}

/// Clears the slot's in-flight flag when the run ends or is dropped.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn claim(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl JobSlot {
    fn log(&self) -> std::sync::MutexGuard<'_, RunLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn info(&self) -> JobInfo {
        let log = self.log();
        JobInfo {
            id: self.spec.id.clone(),
            name: self.spec.name.clone(),
            next_run: log.next_run,
            trigger: self.spec.trigger(),
            paused: self.paused.load(Ordering::SeqCst),
            running: self.in_flight.load(Ordering::SeqCst),
            runs: self.runs.load(Ordering::SeqCst),
            failures: self.failures.load(Ordering::SeqCst),
            last_run: log.last_run,
            last_error: log.last_error.clone(),
        }
    }

    fn schedule_next(&self, from: DateTime<Utc>) {
        let next = chrono::Duration::from_std(self.spec.interval).ok().map(|d| from + d);
        self.log().next_run = next;
    }

    async fn execute(&self, now: DateTime<Utc>) -> RunOutcome {
        if self.paused.load(Ordering::SeqCst) {
            return RunOutcome::Skipped;
        }
        let Some(_guard) = InFlight::claim(&self.in_flight) else {
            return RunOutcome::Busy;
        };

        let job = Arc::clone(&self.job);
        let limit = self.spec.timeout;
        let started = Instant::now();
        let handle = tokio::spawn(async move { tokio::time::timeout(limit, job.run(now)).await });

        let outcome = match handle.await {
            Ok(Ok(Ok(()))) => RunOutcome::Completed,
            Ok(Ok(Err(e))) => RunOutcome::Failed(format!("{e:#}")),
            Ok(Err(_)) => RunOutcome::TimedOut,
            Err(e) if e.is_panic() => RunOutcome::Panicked(panic_message(e.into_panic())),
            Err(e) => RunOutcome::Failed(e.to_string()),
        };

        self.runs.fetch_add(1, Ordering::SeqCst);
        let elapsed_ms = started.elapsed().as_millis();
        let mut log = self.log();
        log.last_run = Some(now);
        match &outcome {
            RunOutcome::Completed => {
                log.last_error = None;
                debug!(job = %self.spec.id, elapsed_ms, "Job run completed");
            }
            RunOutcome::Failed(e) => {
                self.failures.fetch_add(1, Ordering::SeqCst);
                log.last_error = Some(e.clone());
                warn!(job = %self.spec.id, error = %e, elapsed_ms, "Job run failed");
            }
            RunOutcome::TimedOut => {
                self.failures.fetch_add(1, Ordering::SeqCst);
                log.last_error = Some(format!("timed out after {limit:?}"));
                warn!(job = %self.spec.id, timeout = ?limit, "Job run timed out");
            }
            RunOutcome::Panicked(msg) => {
                self.failures.fetch_add(1, Ordering::SeqCst);
                log.last_error = Some(format!("panicked: {msg}"));
                error!(job = %self.spec.id, panic = %msg, "Job run panicked");
            }
            RunOutcome::Skipped | RunOutcome::Busy => {}
        }
        outcome
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

// ============================================================================
// Scheduler
// ============================================================================

/// Owns job registration and drives every job until cancelled.
#[derive(Default)]
pub struct Scheduler {
    jobs: Vec<Arc<JobSlot>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, spec: JobSpec, job: Arc<dyn Job>) -> Result<(), SchedulerError> {
        if self.jobs.iter().any(|s| s.spec.id == spec.id) {
            return Err(SchedulerError::DuplicateJob(spec.id));
        }
        info!(job = %spec.id, trigger = %spec.trigger(), "Job registered");
        self.jobs.push(Arc::new(JobSlot {
            spec,
            job,
            paused: AtomicBool::new(false),
            in_flight: AtomicBool::new(false),
            runs: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            log: Mutex::new(RunLog::default()),
        }));
        Ok(())
    }

    pub fn jobs(&self) -> Vec<JobInfo> {
        self.jobs.iter().map(|s| s.info()).collect()
    }

    pub fn job(&self, id: &str) -> Result<JobInfo, SchedulerError> {
        self.slot(id).map(|s| s.info())
    }

    pub fn pause(&self, id: &str) -> Result<JobInfo, SchedulerError> {
        let slot = self.slot(id)?;
        slot.paused.store(true, Ordering::SeqCst);
        info!(job = %id, "Job paused");
        Ok(slot.info())
    }

    pub fn resume(&self, id: &str) -> Result<JobInfo, SchedulerError> {
        let slot = self.slot(id)?;
        slot.paused.store(false, Ordering::SeqCst);
        info!(job = %id, "Job resumed");
        Ok(slot.info())
    }

    /// Run a job once right now, with the same isolation as a scheduled run.
    ///
    /// Returns `Busy` without running anything when the driver (or another
    /// manual call) is already running the same job.
    pub async fn run_now(&self, id: &str, now: DateTime<Utc>) -> Result<RunOutcome, SchedulerError> {
        let slot = self.slot(id)?;
        Ok(slot.execute(now).await)
    }

    fn slot(&self, id: &str) -> Result<&Arc<JobSlot>, SchedulerError> {
        self.jobs
            .iter()
            .find(|s| s.spec.id == id)
            .ok_or_else(|| SchedulerError::UnknownJob(id.to_string()))
    }

    /// Drive every registered job until `cancel` fires.
    ///
    /// The first run of each job happens one interval after start.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut drivers = JoinSet::new();
        for slot in &self.jobs {
            drivers.spawn(drive(Arc::clone(slot), cancel.clone()));
        }
        info!(jobs = self.jobs.len(), "Scheduler started");

        while let Some(joined) = drivers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Job driver terminated unexpectedly");
            }
        }
        info!("Scheduler stopped");
    }
}

async fn drive(slot: Arc<JobSlot>, cancel: CancellationToken) {
    let period = slot.spec.interval;
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    slot.schedule_next(Utc::now());

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                debug!(job = %slot.spec.id, "Job driver shutting down");
                return;
            }
            _ = ticker.tick() => {}
        }

        let now = Utc::now();
        match slot.execute(now).await {
            RunOutcome::Skipped => debug!(job = %slot.spec.id, "Job paused, tick skipped"),
            RunOutcome::Busy => debug!(job = %slot.spec.id, "Manual run in flight, tick skipped"),
            _ => {}
        }
        slot.schedule_next(Utc::now());
    }
}
