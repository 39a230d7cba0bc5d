//! Dispatcher: the worker pool that publishes due jobs.
//!
//! Each poll lists due jobs and spawns one task per job, bounded by a
//! semaphore. A task leases its job, calls the publisher under a timeout
//! while renewing the lease, then records the outcome. Publisher errors end
//! up as state transitions on the job; they never stop the pool.

use crate::clock::Clock;
use crate::config::DispatcherConfig;
use crate::error::{JobError, JobResult};
use crate::events::{TransitionEvent, TransitionObserver};
use crate::job::{Job, JobState};
use crate::metrics::JobMetrics;
use crate::publisher::{PublishError, PublishReceipt, Publisher};
use crate::retry::RetryPolicy;
use crate::store::{chrono_duration, JobMutation, JobStore};
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use herald_core::JobId;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Notify, Semaphore};
use tokio::time::{interval, interval_at, timeout, MissedTickBehavior};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Outcome counters.
#[derive(Debug, Default)]
struct Counters {
    processed: AtomicU64,
    completed: AtomicU64,
    retried: AtomicU64,
    dead: AtomicU64,
    conflicts: AtomicU64,
}

/// Dispatcher statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherStats {
    /// Dispatcher ID.
    pub id: String,

    /// Is running.
    pub running: bool,

    /// Configured concurrency.
    pub concurrency: usize,

    /// Publishes currently in flight.
    pub in_flight: usize,

    /// Attempts started.
    pub processed: u64,

    /// Jobs completed.
    pub completed: u64,

    /// Failed attempts scheduled for retry.
    pub retried: u64,

    /// Jobs that exhausted their attempts.
    pub dead: u64,

    /// Lease races lost.
    pub conflicts: u64,
}

/// Everything a single job execution needs. Cheap to clone into a task.
#[derive(Clone)]
struct JobRunner {
    store: Arc<dyn JobStore>,
    publisher: Arc<dyn Publisher>,
    clock: Arc<dyn Clock>,
    observer: Arc<dyn TransitionObserver>,
    retry: Arc<RetryPolicy>,
    config: Arc<DispatcherConfig>,
    counters: Arc<Counters>,
}

impl JobRunner {
    /// Runs one attempt of `job` as `owner`.
    async fn execute(&self, job: Job, owner: &str) {
        let id = job.id;
        let mut from = job.state;

        if job.state == JobState::FailedRetryable {
            let now = self.clock.now();
            match self
                .record(&id, JobState::FailedRetryable, &|j: &mut Job| j.requeue(now))
                .await
            {
                Some(_) => from = JobState::Waiting,
                None => return,
            }
        }

        let now = self.clock.now();
        let lease = self.config.lease_duration();
        let leased = self
            .with_store_retry("try_lease", || self.store.try_lease(&id, owner, now, lease))
            .await;

        match leased {
            Ok(true) => {}
            Ok(false) => {
                self.counters.conflicts.fetch_add(1, Ordering::Relaxed);
                JobMetrics::lease_conflict();
                debug!(job_id = %id, "Lost lease race");
                return;
            }
            Err(e) => {
                error!(job_id = %id, error = %e, "Failed to lease job");
                return;
            }
        }

        let job = match self.with_store_retry("get", || self.store.get(&id)).await {
            Ok(job) => job,
            Err(e) => {
                error!(job_id = %id, error = %e, "Failed to load leased job; leaving it to lease expiry");
                return;
            }
        };

        if from == JobState::Active {
            warn!(job_id = %id, attempts = job.attempts, "Reclaimed expired lease");
        }
        self.observer
            .on_transition(&TransitionEvent::for_job(&job, Some(from), now));
        self.counters.processed.fetch_add(1, Ordering::Relaxed);

        debug!(job_id = %id, attempt = job.attempts, max_attempts = job.max_attempts, "Publishing post");

        let started = Instant::now();
        let outcome = self.publish_with_renewal(&job, owner).await;
        let elapsed = started.elapsed();

        let now = self.clock.now();
        match outcome {
            Ok(receipt) => {
                JobMetrics::publish_duration(elapsed, "success");
                info!(job_id = %id, post_id = %receipt.post_id, "Publisher accepted post");
                if self
                    .record(&id, JobState::Active, &|j: &mut Job| j.complete(owner, now))
                    .await
                    .is_some()
                {
                    self.counters.completed.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(e) => {
                JobMetrics::publish_duration(elapsed, "failure");
                let message = e.to_string();

                if self.retry.is_retryable(job.attempts, job.max_attempts) {
                    let delay = self.retry.next_delay(job.attempts);
                    let retry_at = now + chrono_duration(delay);
                    debug!(job_id = %id, attempt = job.attempts, ?delay, error = %message, "Attempt failed, retrying");
                    if self
                        .record(&id, JobState::Active, &|j: &mut Job| {
                            j.fail_retryable(owner, message.clone(), retry_at, now)
                        })
                        .await
                        .is_some()
                    {
                        self.counters.retried.fetch_add(1, Ordering::Relaxed);
                    }
                } else if self
                    .record(&id, JobState::Active, &|j: &mut Job| j.kill(owner, message.clone(), now))
                    .await
                    .is_some()
                {
                    self.counters.dead.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    /// Calls the publisher under the publish timeout, renewing the lease on
    /// every renewal tick until the call resolves.
    async fn publish_with_renewal(&self, job: &Job, owner: &str) -> Result<PublishReceipt, PublishError> {
        let publish_timeout = self.config.publish_timeout();
        let renew_every = self.config.lease_renew_interval();

        let publish = timeout(publish_timeout, self.publisher.publish(&job.payload));
        tokio::pin!(publish);

        let mut renew = interval_at(tokio::time::Instant::now() + renew_every, renew_every);
        renew.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                result = &mut publish => {
                    return match result {
                        Ok(outcome) => outcome,
                        Err(_) => Err(PublishError::Timeout(publish_timeout)),
                    };
                }
                _ = renew.tick() => {
                    let now = self.clock.now();
                    match self.store.renew_lease(&job.id, owner, now, self.config.lease_duration()).await {
                        Ok(true) => debug!(job_id = %job.id, "Renewed lease"),
                        Ok(false) => warn!(job_id = %job.id, "Lease lost while publishing"),
                        Err(e) => warn!(job_id = %job.id, error = %e, "Failed to renew lease"),
                    }
                }
            }
        }
    }

    /// Applies a bookkeeping mutation and emits its transition.
    ///
    /// Returns `None` if the mutation was rejected or the store stayed
    /// unreachable; the job is then left for lease-expiry recovery.
    async fn record(&self, id: &JobId, from: JobState, mutation: JobMutation<'_>) -> Option<Job> {
        match self
            .with_store_retry("update", || self.store.update(id, mutation))
            .await
        {
            Ok(job) => {
                self.observer
                    .on_transition(&TransitionEvent::for_job(&job, Some(from), self.clock.now()));
                Some(job)
            }
            Err(JobError::LeaseConflict(_)) => {
                self.counters.conflicts.fetch_add(1, Ordering::Relaxed);
                JobMetrics::lease_conflict();
                warn!(job_id = %id, "Job changed hands before its outcome was recorded");
                None
            }
            Err(e) => {
                error!(job_id = %id, error = %e, "Failed to record job outcome; leaving it to lease expiry");
                None
            }
        }
    }

    /// Retries transient store failures with exponential backoff.
    async fn with_store_retry<T, F, Fut>(&self, op: &'static str, mut f: F) -> JobResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = JobResult<T>>,
    {
        let max_attempts = self.config.store_retry_attempts.max(1);
        let mut backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(50),
            max_interval: Duration::from_secs(2),
            max_elapsed_time: None,
            ..Default::default()
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = backoff
                        .next_backoff()
                        .unwrap_or(Duration::from_millis(100));
                    warn!(op, attempt, error = %e, delay_ms = delay.as_millis() as u64, "Store operation failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Polls the store for due jobs and runs them on a bounded pool of tasks.
pub struct Dispatcher {
    /// Unique dispatcher ID; prefixes every lease owner it hands out.
    id: String,

    runner: JobRunner,

    semaphore: Arc<Semaphore>,

    /// Jobs handed to a task and not finished yet.
    in_flight: Arc<Mutex<HashSet<JobId>>>,

    /// Task sequence for lease owner names.
    next_task: AtomicU64,

    wake: Arc<Notify>,

    shutdown_tx: watch::Sender<bool>,

    running: AtomicBool,
}

impl Dispatcher {
    /// Create a new dispatcher.
    pub fn new(
        store: Arc<dyn JobStore>,
        publisher: Arc<dyn Publisher>,
        clock: Arc<dyn Clock>,
        observer: Arc<dyn TransitionObserver>,
        retry: RetryPolicy,
        config: DispatcherConfig,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let concurrency = config.concurrency.max(1);

        Self {
            id: format!("dispatcher-{}", Uuid::new_v4().simple()),
            runner: JobRunner {
                store,
                publisher,
                clock,
                observer,
                retry: Arc::new(retry),
                config: Arc::new(config),
                counters: Arc::new(Counters::default()),
            },
            semaphore: Arc::new(Semaphore::new(concurrency)),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            next_task: AtomicU64::new(0),
            wake: Arc::new(Notify::new()),
            shutdown_tx,
            running: AtomicBool::new(false),
        }
    }

    /// Handle that wakes the poll loop early; share it with the
    /// [`Scheduler`](crate::Scheduler) via `with_wake`.
    pub fn wake_handle(&self) -> Arc<Notify> {
        self.wake.clone()
    }

    /// Runs the poll loop until [`stop`](Self::stop) is called, then waits up
    /// to the shutdown timeout for in-flight publishes.
    pub async fn run(&self) -> JobResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(JobError::Configuration("Dispatcher already running".to_string()));
        }

        let config = &self.runner.config;
        info!(
            dispatcher_id = %self.id,
            concurrency = self.concurrency(),
            poll_interval_ms = config.poll_interval_ms,
            lease_duration_secs = config.lease_duration_secs,
            "Starting dispatcher"
        );

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut ticker = interval(config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !*shutdown_rx.borrow() {
            tokio::select! {
                _ = shutdown_rx.changed() => continue,
                _ = ticker.tick() => {}
                _ = self.wake.notified() => {}
            }

            if let Err(e) = self.poll_once().await {
                warn!(dispatcher_id = %self.id, error = %e, "Poll failed");
            }
        }

        info!(dispatcher_id = %self.id, "Waiting for in-flight publishes to finish...");
        let drained = timeout(
            config.shutdown_timeout(),
            self.semaphore.acquire_many(self.concurrency() as u32),
        )
        .await;
        if drained.is_err() {
            warn!(
                dispatcher_id = %self.id,
                in_flight = self.in_flight.lock().len(),
                "Shutdown timeout elapsed; unfinished jobs will recover via lease expiry"
            );
        }

        self.running.store(false, Ordering::SeqCst);

        let stats = self.stats();
        info!(
            dispatcher_id = %self.id,
            processed = stats.processed,
            completed = stats.completed,
            retried = stats.retried,
            dead = stats.dead,
            "Dispatcher stopped"
        );

        Ok(())
    }

    /// One polling round: lists due jobs and spawns a task for each one a
    /// free worker slot can take. Returns the number of tasks spawned.
    pub async fn poll_once(&self) -> JobResult<usize> {
        let free = self.semaphore.available_permits();
        if free == 0 {
            return Ok(0);
        }

        let runner = &self.runner;
        let now = runner.clock.now();
        let limit = runner.config.batch_size.min(free);
        let due = runner
            .with_store_retry("list_due", || runner.store.list_due(now, limit))
            .await?;

        let mut spawned = 0;
        for job in due {
            if !self.in_flight.lock().insert(job.id) {
                continue;
            }

            let permit = match self.semaphore.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    self.in_flight.lock().remove(&job.id);
                    break;
                }
            };

            let task = self.next_task.fetch_add(1, Ordering::Relaxed);
            let owner = format!("{}-{}", self.id, task);
            let job_id = job.id;
            let runner = self.runner.clone();
            let in_flight = self.in_flight.clone();
            let span = info_span!("dispatch", job_id = %job_id, worker_id = %owner);

            tokio::spawn(
                async move {
                    runner.execute(job, &owner).await;
                    let remaining = {
                        let mut set = in_flight.lock();
                        set.remove(&job_id);
                        set.len()
                    };
                    JobMetrics::in_flight(remaining as u64);
                    drop(permit);
                }
                .instrument(span),
            );
            spawned += 1;
        }

        if spawned > 0 {
            JobMetrics::in_flight(self.in_flight.lock().len() as u64);
            debug!(dispatcher_id = %self.id, spawned, "Dispatched due jobs");
        }

        Ok(spawned)
    }

    /// Signals the poll loop to exit.
    pub fn stop(&self) {
        info!(dispatcher_id = %self.id, "Stopping dispatcher...");
        self.shutdown_tx.send_replace(true);
    }

    /// Check if the poll loop is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Get the dispatcher ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    fn concurrency(&self) -> usize {
        self.runner.config.concurrency.max(1)
    }

    /// Get dispatcher statistics.
    pub fn stats(&self) -> DispatcherStats {
        let counters = &self.runner.counters;
        DispatcherStats {
            id: self.id.clone(),
            running: self.is_running(),
            concurrency: self.concurrency(),
            in_flight: self.in_flight.lock().len(),
            processed: counters.processed.load(Ordering::Relaxed),
            completed: counters.completed.load(Ordering::Relaxed),
            retried: counters.retried.load(Ordering::Relaxed),
            dead: counters.dead.load(Ordering::Relaxed),
            conflicts: counters.conflicts.load(Ordering::Relaxed),
        }
    }
}
