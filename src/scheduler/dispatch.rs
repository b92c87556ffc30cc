//! Dispatch queue drained by a bounded pool of workers.
//!
//! Producers push `TriggerEvent`s onto an unbounded FIFO and poke a single
//! wake token (`Notify`). One dispatch loop owns dequeueing: on every wake it
//! fills idle slots from the queue head, up to the concurrency ceiling. A
//! finishing worker frees its slot and pokes the same token, so wake-ups that
//! arrive mid-pass coalesce into exactly one follow-up pass.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::invoker::{Invocation, Invoker};
use crate::job::{ExecutionOutcome, JobId};
use crate::storage::JobStore;

/// Default ceiling on simultaneous invocations.
pub const DEFAULT_CONCURRENCY: usize = 10;

/// A pending request to call a job's target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerEvent {
    pub job_id: JobId,
    pub target: String,
}

/// Cheap cloneable handle to the queue and its worker pool.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    queue: Mutex<VecDeque<TriggerEvent>>,
    concurrency: usize,
    active: AtomicUsize,
    /// Single-slot wake token for the dispatch loop.
    wake: Notify,
    /// Signalled whenever a worker finishes; used while draining.
    idle: Notify,
    started: AtomicBool,
    shutdown: CancellationToken,
    invoker: Arc<dyn Invoker>,
    store: Arc<dyn JobStore>,
}

/// Holds one worker slot. Dropping it frees the slot, even if the worker panicked.
struct Slot {
    inner: Arc<Inner>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        // Free the slot before waking the loop, otherwise the follow-up pass could
        // still see it occupied.
        self.inner.active.fetch_sub(1, Ordering::SeqCst);
        self.inner.wake.notify_one();
        self.inner.idle.notify_waiters();
    }
}

impl Dispatcher {
    /// Build a dispatcher. Nothing is dequeued until [`Dispatcher::spawn`] runs the loop.
    pub fn new(invoker: Arc<dyn Invoker>, store: Arc<dyn JobStore>, concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(VecDeque::new()),
                concurrency,
                active: AtomicUsize::new(0),
                wake: Notify::new(),
                idle: Notify::new(),
                started: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
                invoker,
                store,
            }),
        }
    }

    /// Append to the tail of the queue. Never blocks and never rejects.
    pub fn enqueue(&self, event: TriggerEvent) {
        let job_id = event.job_id.clone();
        let queue_size = {
            let mut queue = self.inner.queue.lock();
            queue.push_back(event);
            queue.len()
        };
        debug!(%job_id, queue_size, "Job enqueued");
        self.inner.wake.notify_one();
    }

    pub fn queue_size(&self) -> usize {
        self.inner.queue.lock().len()
    }

    pub fn active_workers(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    pub fn concurrency(&self) -> usize {
        self.inner.concurrency
    }

    /// Start the dispatch loop on the current runtime.
    ///
    /// Only one loop may own a queue; later calls return `None`.
    pub fn spawn(&self) -> Option<JoinHandle<()>> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            warn!("Dispatch loop already running");
            return None;
        }
        let this = self.clone();
        Some(tokio::spawn(async move { this.run().await }))
    }

    async fn run(self) {
        info!(concurrency = self.inner.concurrency, "Dispatch loop started");

        loop {
            self.fill();

            tokio::select! {
                _ = self.inner.wake.notified() => {}
                _ = self.inner.shutdown.cancelled() => break,
            }
        }

        info!(
            pending = self.queue_size(),
            in_flight = self.active_workers(),
            "Dispatch loop stopped"
        );
    }

    /// One fill pass: hand queue-head events to idle slots until either runs out.
    fn fill(&self) {
        loop {
            if self.inner.active.load(Ordering::SeqCst) >= self.inner.concurrency {
                break;
            }
            // Pop and claim the slot under one lock so an observer never sees
            // the event in neither the queue nor the active count.
            let event = {
                let mut queue = self.inner.queue.lock();
                let Some(event) = queue.pop_front() else {
                    break;
                };
                self.inner.active.fetch_add(1, Ordering::SeqCst);
                event
            };

            let slot = Slot {
                inner: self.inner.clone(),
            };
            tokio::spawn(async move {
                execute(&slot.inner, event).await;
                drop(slot);
            });
        }
    }

    /// Wait up to `grace` for the queue and all in-flight work to drain, then stop
    /// the loop. Whatever is still queued or running afterwards is abandoned.
    ///
    /// Returns `true` if everything drained in time.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        let drained = tokio::time::timeout(grace, self.drained()).await.is_ok();
        self.inner.shutdown.cancel();

        if drained {
            info!("Dispatch queue drained");
        } else {
            warn!(
                pending = self.queue_size(),
                in_flight = self.active_workers(),
                grace_secs = grace.as_secs_f64(),
                "Grace period elapsed, abandoning remaining jobs"
            );
        }
        drained
    }

    fn is_idle(&self) -> bool {
        let queue = self.inner.queue.lock();
        queue.is_empty() && self.inner.active.load(Ordering::SeqCst) == 0
    }

    async fn drained(&self) {
        loop {
            let idle = self.inner.idle.notified();
            tokio::pin!(idle);
            // Register before checking so a worker finishing in between is not missed
            idle.as_mut().enable();

            if self.is_idle() {
                return;
            }
            idle.await;
        }
    }
}

/// Invoke the target and record exactly one outcome, whatever happens on the wire.
async fn execute(inner: &Inner, event: TriggerEvent) {
    info!(job_id = %event.job_id, target = %event.target, "Executing job");

    let start = Instant::now();
    let invoker = inner.invoker.clone();
    let target = event.target.clone();
    // A panicking invoker still counts as one failed attempt
    let invocation = match tokio::spawn(async move { invoker.invoke(&target).await }).await {
        Ok(invocation) => invocation,
        Err(e) => Invocation::failed(None, format!("invocation task failed: {e}")),
    };
    let duration_ms = start.elapsed().as_millis().min(u64::MAX as u128) as u64;

    match (&invocation.error, invocation.success) {
        (None, true) => info!(
            job_id = %event.job_id,
            status_code = ?invocation.status_code,
            duration_ms,
            "Job execution succeeded"
        ),
        (None, false) => warn!(
            job_id = %event.job_id,
            status_code = ?invocation.status_code,
            duration_ms,
            "Job execution failed"
        ),
        (Some(err), _) => error!(
            job_id = %event.job_id,
            status_code = ?invocation.status_code,
            duration_ms,
            error = %err,
            "Job execution error"
        ),
    }

    let outcome = ExecutionOutcome {
        job_id: event.job_id,
        status_code: invocation.status_code,
        duration_ms,
        success: invocation.success,
        executed_at: Utc::now(),
    };

    if let Err(e) = inner.store.append_execution(&outcome).await {
        error!(job_id = %outcome.job_id, error = %e, "Failed to record execution");
    }
}
