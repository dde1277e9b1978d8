// src/scheduler.rs
//! Periodic job driver. Each task runs at most once at a time (a tick that finds it
//! still running skips it), runs behind a fault boundary, and keeps a cadence
//! anchored to local midnight.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeDelta, TimeZone};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const DEFAULT_TICK: Duration = Duration::from_secs(1);
/// How long shutdown waits for in-flight runs.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self) -> anyhow::Result<()>;
}

struct TaskSlot {
    busy: AtomicBool,
    next_due: Mutex<DateTime<Local>>,
}

impl TaskSlot {
    fn next_due(&self) -> DateTime<Local> {
        *self.next_due.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn set_next_due(&self, at: DateTime<Local>) {
        *self.next_due.lock().unwrap_or_else(|p| p.into_inner()) = at;
    }
}

pub struct ScheduledTask {
    job: Arc<dyn Job>,
    interval: TimeDelta,
    slot: Arc<TaskSlot>,
}

impl ScheduledTask {
    pub fn name(&self) -> &str {
        self.job.name()
    }

    pub fn interval(&self) -> TimeDelta {
        self.interval
    }

    pub fn next_due(&self) -> DateTime<Local> {
        self.slot.next_due()
    }

    pub fn is_running(&self) -> bool {
        self.slot.busy.load(Ordering::Acquire)
    }
}

pub struct Scheduler {
    tasks: Vec<ScheduledTask>,
    tick: Duration,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            tick: DEFAULT_TICK,
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick.max(Duration::from_millis(1));
        self
    }

    /// Registers `job` to run every `interval`. A zero interval becomes one second.
    pub fn add(&mut self, interval: Duration, job: Arc<dyn Job>) -> &mut Self {
        let interval = if interval.is_zero() {
            warn!(target: "scheduler", job = job.name(), "zero interval, using 1s");
            Duration::from_secs(1)
        } else {
            interval
        };
        let interval = TimeDelta::from_std(interval).unwrap_or(TimeDelta::days(365));
        self.tasks.push(ScheduledTask {
            job,
            interval,
            slot: Arc::new(TaskSlot {
                busy: AtomicBool::new(false),
                next_due: Mutex::new(start_of_local_day(Local::now())),
            }),
        });
        self
    }

    pub fn tasks(&self) -> &[ScheduledTask] {
        &self.tasks
    }

    /// Makes every task due at `at`.
    pub fn anchor(&self, at: DateTime<Local>) {
        for task in &self.tasks {
            task.slot.set_next_due(at);
        }
    }

    /// Starts every due, idle task. Returns handles of the runs started.
    pub fn tick_once(&self, now: DateTime<Local>) -> Vec<JoinHandle<()>> {
        let mut started = Vec::new();
        for task in &self.tasks {
            if now < task.slot.next_due() {
                continue;
            }
            if task
                .slot
                .busy
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                debug!(target: "scheduler", job = task.name(), "still running, skipping tick");
                continue;
            }
            started.push(tokio::spawn(run_guarded(
                Arc::clone(&task.job),
                Arc::clone(&task.slot),
                task.interval,
            )));
        }
        started
    }

    /// Drives the tasks until `shutdown` is cancelled, then waits briefly for runs in flight.
    pub async fn run(self, shutdown: CancellationToken) {
        self.anchor(start_of_local_day(Local::now()));
        info!(
            target: "scheduler",
            tasks = self.tasks.len(),
            tick_ms = self.tick.as_millis() as u64,
            "scheduler started"
        );

        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight: Vec<JoinHandle<()>> = Vec::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    in_flight.retain(|h| !h.is_finished());
                    in_flight.extend(self.tick_once(Local::now()));
                }
            }
        }

        in_flight.retain(|h| !h.is_finished());
        if !in_flight.is_empty() {
            info!(target: "scheduler", running = in_flight.len(), "waiting for running jobs");
            let drain = async {
                for h in in_flight {
                    let _ = h.await;
                }
            };
            if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
                warn!(target: "scheduler", "jobs still running after grace period");
            }
        }
        info!(target: "scheduler", "scheduler stopped");
    }
}

async fn run_guarded(job: Arc<dyn Job>, slot: Arc<TaskSlot>, interval: TimeDelta) {
    let name = job.name().to_string();
    debug!(target: "scheduler", job = %name, "run started");

    let inner = {
        let job = Arc::clone(&job);
        tokio::spawn(async move { job.run().await })
    };
    match inner.await {
        Ok(Ok(())) => debug!(target: "scheduler", job = %name, "run finished"),
        Ok(Err(e)) => error!(target: "scheduler", job = %name, error = ?e, "job failed"),
        Err(e) if e.is_panic() => {
            let payload = panic_message(e.into_panic());
            error!(target: "scheduler", job = %name, panic = %payload, "job panicked");
        }
        Err(e) => warn!(target: "scheduler", job = %name, error = %e, "job cancelled"),
    }

    let next = advance_past(slot.next_due(), interval, &Local::now());
    slot.set_next_due(next);
    slot.busy.store(false, Ordering::Release);
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Local midnight of `now`'s day (or `now` itself if midnight does not exist that day).
pub fn start_of_local_day(now: DateTime<Local>) -> DateTime<Local> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|midnight| Local.from_local_datetime(&midnight).earliest())
        .unwrap_or(now)
}

/// Moves `next_due` forward by whole `interval`s until it is strictly after `now`.
pub fn advance_past<Tz: TimeZone>(
    next_due: DateTime<Tz>,
    interval: TimeDelta,
    now: &DateTime<Tz>,
) -> DateTime<Tz> {
    if next_due > *now {
        return next_due;
    }
    let step_ms = interval.num_milliseconds().max(1);
    let behind_ms = now.clone().signed_duration_since(next_due.clone()).num_milliseconds();
    let steps = behind_ms / step_ms + 1;
    let mut due = next_due + TimeDelta::milliseconds(step_ms.saturating_mul(steps));
    while due <= *now {
        due = due + TimeDelta::milliseconds(step_ms);
    }
    due
}
