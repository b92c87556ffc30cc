//! Cron-driven job scheduling: timers feed a queue, a bounded pool drains it.

pub mod cron;
pub mod dispatch;

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::invoker::Invoker;
use crate::job::JobId;
use crate::storage::JobStore;

pub use self::cron::{parse_schedule, preview, Clock, CronRegistry, ScheduleError, SystemClock};
pub use self::dispatch::{Dispatcher, TriggerEvent, DEFAULT_CONCURRENCY};

/// Owns the cron registry and the dispatch pool, and ties their lifecycles
/// to the job store. Clones share the same state.
#[derive(Clone)]
pub struct Scheduler {
    store: Arc<dyn JobStore>,
    registry: Arc<CronRegistry>,
    dispatcher: Dispatcher,
}

impl Scheduler {
    pub fn new(store: Arc<dyn JobStore>, invoker: Arc<dyn Invoker>, concurrency: usize) -> Self {
        Self::with_clock(store, invoker, concurrency, Arc::new(SystemClock))
    }

    /// Like [`Scheduler::new`], with cron timers reading time from `clock`.
    pub fn with_clock(
        store: Arc<dyn JobStore>,
        invoker: Arc<dyn Invoker>,
        concurrency: usize,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let dispatcher = Dispatcher::new(invoker, store.clone(), concurrency);
        let registry = Arc::new(CronRegistry::with_clock(dispatcher.clone(), clock));
        Self {
            store,
            registry,
            dispatcher,
        }
    }

    /// Start the dispatch loop and register a timer for every stored job.
    ///
    /// A job with a bad schedule is skipped; a failed load is logged and leaves
    /// the scheduler running with nothing registered. Returns how many jobs
    /// were registered.
    pub async fn start(&self) -> usize {
        info!("Starting scheduler...");
        self.dispatcher.spawn();

        let jobs = match self.store.list_jobs().await {
            Ok(jobs) => jobs,
            Err(e) => {
                error!(error = %e, "Failed to load jobs, starting with none scheduled");
                return 0;
            }
        };

        let registered = jobs
            .iter()
            .filter(|job| self.schedule_job(&job.id, &job.schedule, &job.target))
            .count();

        info!(registered, total = jobs.len(), "Scheduler started with {} jobs", registered);
        registered
    }

    /// See [`CronRegistry::schedule_job`].
    pub fn schedule_job(&self, job_id: &JobId, schedule: &str, target: &str) -> bool {
        self.registry.schedule_job(job_id, schedule, target)
    }

    pub fn unschedule_job(&self, job_id: &JobId) -> bool {
        self.registry.unschedule_job(job_id)
    }

    pub fn is_scheduled(&self, job_id: &JobId) -> bool {
        self.registry.is_scheduled(job_id)
    }

    pub fn scheduled_count(&self) -> usize {
        self.registry.len()
    }

    pub fn queue_size(&self) -> usize {
        self.dispatcher.queue_size()
    }

    pub fn active_workers(&self) -> usize {
        self.dispatcher.active_workers()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Halt all cron timers. Queued and in-flight work continues.
    pub fn stop(&self) {
        info!("Stopping scheduler...");
        let stopped = self.registry.stop();
        info!(stopped, "Scheduler stopped");
    }

    /// Stop timers, then give queued and in-flight work up to `grace` to finish.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.stop();
        self.dispatcher.shutdown(grace).await
    }
}
