use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule as CronSchedule;
use parking_lot::Mutex;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::dispatch::{Dispatcher, TriggerEvent};
use crate::job::{JobDefinition, JobId};

/// How late (seconds) a fire may be before it counts as missed and is skipped.
const MISSED_FIRE_TOLERANCE_SECS: i64 = 5;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidSchedule { expr: String, reason: String },
}

/// Parse a five- or six-field cron expression.
///
/// Five fields are `minute hour day month weekday` and fire at second 0.
/// Six fields carry a leading seconds field. Weekday numbers follow standard
/// cron, where both 0 and 7 mean Sunday.
pub fn parse_schedule(expr: &str) -> Result<CronSchedule, ScheduleError> {
    let invalid = |reason: String| ScheduleError::InvalidSchedule {
        expr: expr.to_string(),
        reason,
    };

    let mut fields: Vec<String> = expr.split_whitespace().map(str::to_string).collect();
    match fields.len() {
        5 => fields.insert(0, "0".to_string()),
        6 => {}
        n => return Err(invalid(format!("expected 5 or 6 fields, got {n}"))),
    }
    fields[5] = weekday_names(&fields[5]).ok_or_else(|| invalid("bad weekday field".into()))?;

    CronSchedule::from_str(&fields.join(" ")).map_err(|e| invalid(e.to_string()))
}

/// Rewrite numeric weekdays (0-7, Sunday = 0 or 7) as names, which the
/// `cron` crate reads unambiguously. Numeric ranges and steps are expanded
/// into an explicit list; named items pass through untouched.
fn weekday_names(field: &str) -> Option<String> {
    const NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

    let number = |tok: &str| -> Option<Option<usize>> {
        match tok.parse::<usize>() {
            Ok(n) if n <= 7 => Some(Some(n)),
            Ok(_) => None,
            Err(_) => Some(None),
        }
    };

    let mut parts: Vec<String> = Vec::new();
    let mut push = |item: String| {
        if !parts.contains(&item) {
            parts.push(item);
        }
    };

    for part in field.split(',') {
        let (base, step) = match part.split_once('/') {
            Some((b, s)) => (b, Some(s.parse::<usize>().ok().filter(|s| *s > 0)?)),
            None => (part, None),
        };

        // Inclusive numeric bounds, or None for a named item
        let bounds = match base.split_once('-') {
            _ if base == "*" => step.map(|_| (0, 6)),
            Some((lo, hi)) => match (number(lo)?, number(hi)?) {
                (Some(lo), Some(hi)) if lo <= hi => Some((lo, hi)),
                (None, None) => None,
                _ => return None,
            },
            // "N/s" runs from N to the end of the week
            None => number(base)?.map(|n| (n, if step.is_some() { 6.max(n) } else { n })),
        };

        match bounds {
            Some((lo, hi)) => {
                for day in (lo..=hi).step_by(step.unwrap_or(1)) {
                    push(NAMES[day % 7].to_string());
                }
            }
            None => push(part.to_string()),
        }
    }
    Some(parts.join(","))
}

/// Every fire time of `jobs` in `(from, until]`, earliest first. Jobs with an
/// unparseable schedule are skipped.
pub fn preview(
    jobs: &[JobDefinition],
    from: DateTime<Utc>,
    until: DateTime<Utc>,
) -> Vec<(DateTime<Utc>, JobDefinition)> {
    let mut runs = Vec::new();
    for job in jobs {
        let Ok(schedule) = parse_schedule(&job.schedule) else {
            continue;
        };
        for next in schedule.after(&from) {
            if next > until {
                break;
            }
            runs.push((next, job.clone()));
        }
    }
    runs.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.id.cmp(&b.1.id)));
    runs
}

/// Source of "now" for cron timers.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The host's wall clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Live cron timers, at most one per job.
///
/// A timer only ever enqueues onto the [`Dispatcher`]; it never calls the
/// target itself.
pub struct CronRegistry {
    timers: Mutex<HashMap<JobId, CancellationToken>>,
    dispatcher: Dispatcher,
    clock: Arc<dyn Clock>,
}

impl CronRegistry {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self::with_clock(dispatcher, Arc::new(SystemClock))
    }

    pub fn with_clock(dispatcher: Dispatcher, clock: Arc<dyn Clock>) -> Self {
        Self {
            timers: Mutex::new(HashMap::new()),
            dispatcher,
            clock,
        }
    }

    /// Install (or replace) the timer for `job_id`.
    ///
    /// An invalid expression is logged and leaves the registry untouched.
    /// Returns whether a timer is now installed for this schedule. Must be
    /// called from within a Tokio runtime.
    pub fn schedule_job(&self, job_id: &JobId, schedule: &str, target: &str) -> bool {
        let parsed = match parse_schedule(schedule) {
            Ok(s) => s,
            Err(e) => {
                error!(%job_id, %schedule, error = %e, "Invalid cron schedule");
                return false;
            }
        };

        let cancel = CancellationToken::new();
        {
            let mut timers = self.timers.lock();
            if let Some(previous) = timers.insert(job_id.clone(), cancel.clone()) {
                previous.cancel();
                debug!(%job_id, "Replaced existing timer");
            }
        }

        tokio::spawn(run_timer(
            job_id.clone(),
            parsed,
            target.to_string(),
            self.dispatcher.clone(),
            self.clock.clone(),
            cancel,
        ));

        info!(%job_id, %schedule, %target, "Job scheduled");
        true
    }

    /// Stop and drop the timer for `job_id`. No-op if none exists.
    pub fn unschedule_job(&self, job_id: &JobId) -> bool {
        match self.timers.lock().remove(job_id) {
            Some(cancel) => {
                cancel.cancel();
                info!(%job_id, "Job unscheduled");
                true
            }
            None => false,
        }
    }

    /// Stop every timer. Work already queued or running is untouched.
    pub fn stop(&self) -> usize {
        let timers: Vec<(JobId, CancellationToken)> = self.timers.lock().drain().collect();
        for (job_id, cancel) in &timers {
            cancel.cancel();
            debug!(%job_id, "Stopped cron timer");
        }
        timers.len()
    }

    pub fn is_scheduled(&self, job_id: &JobId) -> bool {
        self.timers.lock().contains_key(job_id)
    }

    pub fn len(&self) -> usize {
        self.timers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Longest single sleep before the wall clock is consulted again, so a
/// suspended host or a stepped clock is noticed within a minute.
const MAX_TIMER_SLEEP: Duration = Duration::from_secs(60);

/// Wait until each upcoming fire time (UTC) and enqueue a trigger event.
async fn run_timer(
    job_id: JobId,
    schedule: CronSchedule,
    target: String,
    dispatcher: Dispatcher,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
) {
    // Walk fire times from the previous fire, never from "now": each slot fires once.
    let mut cursor = clock.now();

    loop {
        let Some(next) = schedule.after(&cursor).next() else {
            debug!(%job_id, "Schedule has no upcoming fire times");
            break;
        };

        loop {
            let now = clock.now();
            if now >= next {
                break;
            }
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO).min(MAX_TIMER_SLEEP);
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(wait) => {}
            }
        }
        if cancel.is_cancelled() {
            break;
        }

        let now = clock.now();
        if now - next > chrono::Duration::seconds(MISSED_FIRE_TOLERANCE_SECS) {
            warn!(%job_id, missed = %next, "Missed cron fire, skipping ahead");
            cursor = now;
            continue;
        }

        debug!(%job_id, %target, "Scheduler triggered");
        dispatcher.enqueue(TriggerEvent {
            job_id: job_id.clone(),
            target: target.clone(),
        });
        cursor = next;
    }
}
