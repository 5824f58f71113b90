//! Recurring job runner
//!
//! The JobScheduler is responsible for:
//! - Firing each registered job on its own recurrence
//! - Running manual triggers through the same path as scheduled firings
//! - Keeping per-job run statistics and the last few errors
//! - Emitting lifecycle events for monitoring
//!
//! ## Guarantees
//!
//! - A job never overlaps itself: scheduled and manual runs of one job share
//!   a run guard.
//! - A failing (or panicking) handler is recorded and the scheduler moves on.
//! - `stop()` lets in-flight handlers finish, then joins every job task.
//!
//! History is in memory only. A restart loses statistics, not due work:
//! every job is re-armed from its recurrence on `start()`.

pub mod clock;
pub mod recurrence;

pub use clock::{Clock, ManualClock, SystemClock};
pub use recurrence::Recurrence;

use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Errors kept per job
pub const MAX_RECENT_ERRORS: usize = 10;

/// Work performed on each firing
///
/// Closures `Fn(DateTime<Utc>) -> impl Future<Output = Result<()>>` are
/// handlers too.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// `now` is the scheduler clock's time at the start of the firing
    async fn run(&self, now: DateTime<Utc>) -> Result<()>;
}

#[async_trait]
impl<F, Fut> JobHandler for F
where
    F: Fn(DateTime<Utc>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn run(&self, now: DateTime<Utc>) -> Result<()> {
        (self)(now).await
    }
}

/// Events emitted by the scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    Started { jobs: usize },
    JobStarted { name: String },
    JobSucceeded { name: String, duration_ms: u64 },
    JobFailed { name: String, error: String },
    Stopped,
}

/// One recorded handler failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobError {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// Snapshot of one job for operators
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobStatus {
    pub name: String,
    pub schedule: String,
    pub last_run: Option<DateTime<Utc>>,
    pub last_duration_ms: Option<u64>,
    pub next_run: Option<DateTime<Utc>>,
    pub run_count: u64,
    /// Oldest first, at most [`MAX_RECENT_ERRORS`]
    pub recent_errors: Vec<JobError>,
}

#[derive(Debug, Default)]
struct JobStats {
    last_run: Option<DateTime<Utc>>,
    last_duration_ms: Option<u64>,
    next_run: Option<DateTime<Utc>>,
    run_count: u64,
    recent_errors: VecDeque<JobError>,
}

impl JobStats {
    fn push_error(&mut self, error: JobError) {
        if self.recent_errors.len() == MAX_RECENT_ERRORS {
            self.recent_errors.pop_front();
        }
        self.recent_errors.push_back(error);
    }
}

struct JobEntry {
    name: String,
    recurrence: Recurrence,
    handler: Arc<dyn JobHandler>,
    run_guard: Mutex<()>,
    stats: Mutex<JobStats>,
}

struct Running {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

/// Process-wide recurring job runner
pub struct JobScheduler {
    clock: Arc<dyn Clock>,
    jobs: RwLock<BTreeMap<String, Arc<JobEntry>>>,
    event_tx: mpsc::Sender<SchedulerEvent>,
    running: Mutex<Option<Running>>,
}

impl JobScheduler {
    /// Create a scheduler and the receiving end of its event channel
    ///
    /// Events are dropped with a warning when nobody drains the channel.
    pub fn new(
        clock: Arc<dyn Clock>,
        event_channel_capacity: usize,
    ) -> (Self, mpsc::Receiver<SchedulerEvent>) {
        let (tx, rx) = mpsc::channel(event_channel_capacity.max(1));
        let scheduler = Self {
            clock,
            jobs: RwLock::new(BTreeMap::new()),
            event_tx: tx,
            running: Mutex::new(None),
        };
        (scheduler, rx)
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Register `handler` under `name`, firing per `expression`
    ///
    /// Duplicate names and unparseable expressions are rejected. Jobs must be
    /// registered before `start()`.
    pub async fn schedule<H>(&self, name: &str, expression: &str, handler: H) -> Result<()>
    where
        H: JobHandler + 'static,
    {
        let recurrence: Recurrence = expression.parse()?;

        if self.running.lock().await.is_some() {
            return Err(Error::schedule(format!(
                "cannot register job '{}' while the scheduler is running",
                name
            )));
        }

        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(name) {
            return Err(Error::schedule(format!("job '{}' is already registered", name)));
        }

        debug!(job = name, schedule = %recurrence, "job registered");
        jobs.insert(
            name.to_string(),
            Arc::new(JobEntry {
                name: name.to_string(),
                recurrence,
                handler: Arc::new(handler),
                run_guard: Mutex::new(()),
                stats: Mutex::new(JobStats::default()),
            }),
        );
        Ok(())
    }

    /// Arm every job on its recurrence
    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(Error::schedule("scheduler already started"));
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let jobs = self.jobs.read().await;
        let now = self.clock.now();
        let mut tasks = Vec::with_capacity(jobs.len());

        for entry in jobs.values() {
            let next = entry.recurrence.next_after(now);
            entry.stats.lock().await.next_run = Some(next);
            tasks.push(tokio::spawn(job_loop(
                entry.clone(),
                self.clock.clone(),
                self.event_tx.clone(),
                shutdown_rx.clone(),
                next,
            )));
        }

        info!(jobs = tasks.len(), "scheduler started");
        emit(&self.event_tx, SchedulerEvent::Started { jobs: tasks.len() });
        *running = Some(Running { shutdown, tasks });
        Ok(())
    }

    /// Cancel pending firings and wait for every job task to exit
    ///
    /// A handler already running completes first. Stopping a scheduler
    /// that is not running is a no-op.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };

        let _ = running.shutdown.send(true);
        for task in running.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "job task ended abnormally");
            }
        }

        info!("scheduler stopped");
        emit(&self.event_tx, SchedulerEvent::Stopped);
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Run `name` now through the normal execution path
    ///
    /// Waits for a run already in progress. The handler's own error is
    /// recorded in the job status, not returned; only an unknown job name
    /// is an error here.
    pub async fn run_job(&self, name: &str) -> Result<()> {
        let entry = self
            .jobs
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| Error::schedule(format!("unknown job '{}'", name)))?;

        execute(&entry, self.clock.as_ref(), &self.event_tx).await;
        Ok(())
    }

    /// Per-job statistics, ordered by name
    pub async fn status(&self) -> Vec<JobStatus> {
        let jobs = self.jobs.read().await;
        let mut statuses = Vec::with_capacity(jobs.len());
        for entry in jobs.values() {
            let stats = entry.stats.lock().await;
            statuses.push(JobStatus {
                name: entry.name.clone(),
                schedule: entry.recurrence.to_string(),
                last_run: stats.last_run,
                last_duration_ms: stats.last_duration_ms,
                next_run: stats.next_run,
                run_count: stats.run_count,
                recent_errors: stats.recent_errors.iter().cloned().collect(),
            });
        }
        statuses
    }

    pub async fn job_names(&self) -> Vec<String> {
        self.jobs.read().await.keys().cloned().collect()
    }
}

async fn job_loop(
    entry: Arc<JobEntry>,
    clock: Arc<dyn Clock>,
    events: mpsc::Sender<SchedulerEvent>,
    mut shutdown: watch::Receiver<bool>,
    mut next: DateTime<Utc>,
) {
    loop {
        tokio::select! {
            _ = clock.sleep_until(next) => {}
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }

        execute(&entry, clock.as_ref(), &events).await;

        next = entry.recurrence.next_after(clock.now());
        entry.stats.lock().await.next_run = Some(next);
        debug!(job = %entry.name, %next, "next firing");
    }
    debug!(job = %entry.name, "job task exiting");
}

async fn execute(entry: &JobEntry, clock: &dyn Clock, events: &mpsc::Sender<SchedulerEvent>) {
    let _running = entry.run_guard.lock().await;

    let started_at = clock.now();
    emit(events, SchedulerEvent::JobStarted {
        name: entry.name.clone(),
    });
    debug!(job = %entry.name, "job started");

    let started = std::time::Instant::now();
    // Spawned so a panicking handler is contained like an error
    let handler = entry.handler.clone();
    let outcome = match tokio::spawn(async move { handler.run(started_at).await }).await {
        Ok(result) => result,
        Err(e) => Err(Error::schedule(format!("job handler panicked: {}", e))),
    };
    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    let mut stats = entry.stats.lock().await;
    stats.run_count += 1;
    stats.last_run = Some(started_at);
    stats.last_duration_ms = Some(duration_ms);

    match outcome {
        Ok(()) => {
            debug!(job = %entry.name, duration_ms, "job succeeded");
            emit(events, SchedulerEvent::JobSucceeded {
                name: entry.name.clone(),
                duration_ms,
            });
        }
        Err(e) => {
            warn!(job = %entry.name, error = %e, "job failed");
            stats.push_error(JobError {
                at: started_at,
                message: e.to_string(),
            });
            emit(events, SchedulerEvent::JobFailed {
                name: entry.name.clone(),
                error: e.to_string(),
            });
        }
    }
}

fn emit(events: &mpsc::Sender<SchedulerEvent>, event: SchedulerEvent) {
    if events.try_send(event).is_err() {
        warn!("Scheduler event channel full, dropping event. Consider increasing event_channel_capacity.");
    }
}
