//! Cron scheduler for jobs that must run on one instance at a time.
//!
//! Every instance registers the same schedule. On each tick the job runs
//! through [`run_exclusive`], so only the instance that wins the job's lock
//! executes it; the others log a skip. A heartbeat keeps the lock alive for
//! long runs, and the job is told through its lost token when ownership goes
//! away mid-run.
//!
//! Lifecycle follows the usual rules: join handles are tracked, cancellation
//! is explicit, and every asynchronous operation is wrapped in a timeout.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use specforge_domain::{LockConfig, Result};
//! use specforge_infra::coordination::InMemoryCoordinationStore;
//! use specforge_infra::scheduling::{
//!     ScheduledJob, SchedulerResult, SingletonScheduler, SingletonSchedulerConfig,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! struct StaleJobSweep;
//!
//! #[async_trait]
//! impl ScheduledJob for StaleJobSweep {
//!     fn name(&self) -> &str {
//!         "stale_job_sweep"
//!     }
//!
//!     async fn run(&self, _lost: CancellationToken) -> Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() -> SchedulerResult<()> {
//! let store = Arc::new(InMemoryCoordinationStore::new());
//! let mut scheduler = SingletonScheduler::from_lock_config(
//!     SingletonSchedulerConfig::default(),
//!     Arc::new(StaleJobSweep),
//!     store,
//!     &LockConfig::default(),
//! )?;
//!
//! scheduler.start().await?;
//! // ... application runs ...
//! scheduler.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use specforge_core::{run_exclusive, CoordinationStore, DistributedLock, ExclusiveOutcome};
use specforge_domain::{LockConfig, Result as DomainResult};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::scheduling::error::{SchedulerError, SchedulerResult};

/// Work that runs on at most one instance per tick.
#[async_trait]
pub trait ScheduledJob: Send + Sync {
    /// Stable name; also the suffix of the job's lock key.
    fn name(&self) -> &str;

    /// Execute the job.
    ///
    /// `lost` is cancelled if the lock is lost mid-run; long jobs should
    /// check it between steps. The run future is also dropped on loss.
    async fn run(&self, lost: CancellationToken) -> DomainResult<()>;
}

/// Configuration for the singleton scheduler.
#[derive(Debug, Clone)]
pub struct SingletonSchedulerConfig {
    /// Cron expression describing the execution schedule (with seconds).
    pub cron_expression: String,
    /// Interval between lock extensions; must be shorter than the lock TTL.
    pub heartbeat_interval: Duration,
    /// Timeout applied to a single job execution.
    pub job_timeout: Duration,
    /// Timeout for starting the underlying scheduler.
    pub start_timeout: Duration,
    /// Timeout for stopping the scheduler.
    pub stop_timeout: Duration,
    /// Timeout for awaiting the monitor task join handle.
    pub join_timeout: Duration,
}

impl Default for SingletonSchedulerConfig {
    fn default() -> Self {
        Self {
            cron_expression: "0 * * * * *".into(), // every minute
            heartbeat_interval: Duration::from_secs(10),
            job_timeout: Duration::from_secs(300),
            start_timeout: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(5),
            join_timeout: Duration::from_secs(5),
        }
    }
}

/// Counters for tick outcomes on this instance.
#[derive(Debug, Default)]
struct RunCounters {
    /// Set while a tick runs on this instance
    in_flight: AtomicBool,
    completed: AtomicU64,
    skipped: AtomicU64,
    lost: AtomicU64,
    cancelled: AtomicU64,
    failed: AtomicU64,
}

/// Snapshot of tick outcomes on this instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SingletonRunStats {
    /// Ticks where this instance held the lock and the job succeeded
    pub completed: u64,
    /// Ticks where another instance held the lock, or an earlier tick on
    /// this instance was still running
    pub skipped: u64,
    /// Ticks abandoned because ownership was lost
    pub lost: u64,
    /// Ticks abandoned because the scheduler stopped
    pub cancelled: u64,
    /// Ticks where the job, or acquiring the lock, failed or timed out
    pub failed: u64,
}

/// Cron scheduler running one [`ScheduledJob`] under a distributed lock.
pub struct SingletonScheduler {
    scheduler: Arc<RwLock<Option<JobScheduler>>>,
    config: SingletonSchedulerConfig,
    monitor_handle: Option<JoinHandle<()>>,
    cancellation: CancellationToken,
    counters: Arc<RunCounters>,
    lock: Arc<DistributedLock>,
    job: Arc<dyn ScheduledJob>,
}

impl SingletonScheduler {
    /// Create a scheduler for `job` guarded by `lock`.
    ///
    /// # Errors
    /// Returns `SchedulerError::Lock` unless the heartbeat interval is
    /// positive and shorter than the lock TTL.
    pub fn new(
        config: SingletonSchedulerConfig,
        job: Arc<dyn ScheduledJob>,
        lock: Arc<DistributedLock>,
    ) -> SchedulerResult<Self> {
        lock.check_heartbeat_interval(config.heartbeat_interval)?;
        Ok(Self {
            scheduler: Arc::new(RwLock::new(None)),
            config,
            monitor_handle: None,
            cancellation: CancellationToken::new(),
            counters: Arc::new(RunCounters::default()),
            lock,
            job,
        })
    }

    /// Create a scheduler whose lock is named after the job.
    ///
    /// The heartbeat interval is taken from `lock_config`.
    ///
    /// # Errors
    /// Returns `SchedulerError::Lock` if the lock settings are invalid.
    pub fn from_lock_config(
        config: SingletonSchedulerConfig,
        job: Arc<dyn ScheduledJob>,
        store: Arc<dyn CoordinationStore>,
        lock_config: &LockConfig,
    ) -> SchedulerResult<Self> {
        let lock = DistributedLock::from_config(store, lock_config, job.name())?;
        let heartbeat_interval = lock_config.heartbeat_interval();
        Self::new(SingletonSchedulerConfig { heartbeat_interval, ..config }, job, Arc::new(lock))
    }

    /// Start the scheduler, spawning the monitoring task.
    #[instrument(skip(self), fields(job = %self.job.name()))]
    pub async fn start(&mut self) -> SchedulerResult<()> {
        if self.is_running() {
            return Err(SchedulerError::AlreadyRunning);
        }

        self.cancellation = CancellationToken::new();

        let scheduler_instance = self.build_scheduler().await?;
        let start_timeout = self.config.start_timeout;

        tokio::time::timeout(start_timeout, scheduler_instance.start())
            .await
            .map_err(|_| SchedulerError::Timeout { duration: start_timeout })?
            .map_err(|source| SchedulerError::StartFailed { source })?;

        {
            let mut guard = self.scheduler.write().await;
            *guard = Some(scheduler_instance);
        }

        let cancel = self.cancellation.clone();
        let name = self.job.name().to_string();
        let handle = tokio::spawn(async move {
            cancel.cancelled().await;
            debug!(job = %name, "scheduler.singleton.monitor_exit");
        });

        self.monitor_handle = Some(handle);
        info!(cron = %self.config.cron_expression, "scheduler.singleton.started");
        Ok(())
    }

    /// Stop the scheduler and wait for the monitor task to finish.
    ///
    /// A run in progress is cancelled and its lock released. If the release
    /// does not get through, the lock expires after the TTL.
    #[instrument(skip(self), fields(job = %self.job.name()))]
    pub async fn stop(&mut self) -> SchedulerResult<()> {
        if !self.is_running() {
            return Err(SchedulerError::NotRunning);
        }

        self.cancellation.cancel();

        let scheduler = {
            let mut guard = self.scheduler.write().await;
            guard.take()
        };

        let Some(mut scheduler) = scheduler else {
            return Err(SchedulerError::NotRunning);
        };

        let stop_timeout = self.config.stop_timeout;
        tokio::time::timeout(stop_timeout, async move { scheduler.shutdown().await })
            .await
            .map_err(|_| SchedulerError::Timeout { duration: stop_timeout })?
            .map_err(|source| SchedulerError::StopFailed { source })?;

        if let Some(handle) = self.monitor_handle.take() {
            let join_timeout = self.config.join_timeout;
            tokio::time::timeout(join_timeout, handle)
                .await
                .map_err(|_| SchedulerError::Timeout { duration: join_timeout })??;
        }

        info!("scheduler.singleton.stopped");
        Ok(())
    }

    /// Returns true when the monitor task is active.
    pub fn is_running(&self) -> bool {
        self.monitor_handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    pub fn lock(&self) -> &Arc<DistributedLock> {
        &self.lock
    }

    /// Tick outcomes observed by this instance since creation.
    pub fn stats(&self) -> SingletonRunStats {
        SingletonRunStats {
            completed: self.counters.completed.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
            lost: self.counters.lost.load(Ordering::Relaxed),
            cancelled: self.counters.cancelled.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Run one tick now, outside the cron schedule.
    pub async fn run_once(&self) -> SingletonRunStats {
        run_tick(
            Arc::clone(&self.job),
            Arc::clone(&self.lock),
            self.config.clone(),
            self.cancellation.clone(),
            Arc::clone(&self.counters),
        )
        .await;
        self.stats()
    }

    async fn build_scheduler(&self) -> SchedulerResult<JobScheduler> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|source| SchedulerError::CreationFailed { source })?;

        let job = Arc::clone(&self.job);
        let lock = Arc::clone(&self.lock);
        let config = self.config.clone();
        let cancel = self.cancellation.clone();
        let counters = Arc::clone(&self.counters);

        let cron_expr = self.config.cron_expression.clone();

        let job_definition = Job::new_async(cron_expr.as_str(), move |_id, _scheduler| {
            Box::pin(run_tick(
                Arc::clone(&job),
                Arc::clone(&lock),
                config.clone(),
                cancel.clone(),
                Arc::clone(&counters),
            ))
        })
        .map_err(|source| SchedulerError::JobRegistrationFailed { source })?;

        let job_id = job_definition.guid();
        scheduler
            .add(job_definition)
            .await
            .map_err(|source| SchedulerError::JobRegistrationFailed { source })?;

        debug!(cron = %cron_expr, job_id = %job_id, "scheduler.singleton.registered");
        Ok(scheduler)
    }
}

/// One scheduled tick: compete for the lock, run under heartbeat, record.
async fn run_tick(
    job: Arc<dyn ScheduledJob>,
    lock: Arc<DistributedLock>,
    config: SingletonSchedulerConfig,
    cancel: CancellationToken,
    counters: Arc<RunCounters>,
) {
    let started = Instant::now();
    let name = job.name().to_string();
    let job_timeout = config.job_timeout;

    let Some(_in_flight) = InFlight::enter(&counters.in_flight) else {
        counters.skipped.fetch_add(1, Ordering::Relaxed);
        debug!(job = %name, "scheduler.singleton.previous_tick_running");
        return;
    };

    let outcome = run_exclusive(lock, config.heartbeat_interval, &cancel, |lost| {
        let job = Arc::clone(&job);
        async move { tokio::time::timeout(job_timeout, job.run(lost)).await }
    })
    .await;

    let elapsed_ms = started.elapsed().as_millis() as u64;
    match outcome {
        Ok(ExclusiveOutcome::Completed(Ok(Ok(())))) => {
            counters.completed.fetch_add(1, Ordering::Relaxed);
            info!(job = %name, elapsed_ms, "scheduler.singleton.completed");
        }
        Ok(ExclusiveOutcome::Completed(Ok(Err(err)))) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            error!(job = %name, elapsed_ms, error = %err, "scheduler.singleton.job_failed");
        }
        Ok(ExclusiveOutcome::Completed(Err(_elapsed))) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            warn!(
                job = %name,
                timeout_secs = job_timeout.as_secs(),
                "scheduler.singleton.job_timeout"
            );
        }
        Ok(ExclusiveOutcome::Skipped) => {
            counters.skipped.fetch_add(1, Ordering::Relaxed);
            debug!(job = %name, "scheduler.singleton.skipped");
        }
        Ok(ExclusiveOutcome::Lost) => {
            counters.lost.fetch_add(1, Ordering::Relaxed);
            warn!(job = %name, elapsed_ms, "scheduler.singleton.lost");
        }
        Ok(ExclusiveOutcome::Cancelled) => {
            counters.cancelled.fetch_add(1, Ordering::Relaxed);
            info!(job = %name, elapsed_ms, "scheduler.singleton.cancelled");
        }
        Err(err) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            warn!(job = %name, error = %err, "scheduler.singleton.lock_failed");
        }
    }
}

/// Marks a tick as running until dropped
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn enter(flag: &'a AtomicBool) -> Option<Self> {
        (!flag.swap(true, Ordering::AcqRel)).then_some(Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Drop for SingletonScheduler {
    fn drop(&mut self) {
        if self.is_running() {
            warn!(job = %self.job.name(), "Scheduler dropped while running; cancelling tasks");
            self.cancellation.cancel();
        }
    }
}
