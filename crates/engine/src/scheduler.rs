//! Fixed-interval task scheduler. `tick` runs whatever is due; `spawn`
//! drives ticks from a tokio interval until stopped.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub type TaskFn = Box<dyn Fn(DateTime<Utc>) + Send + Sync>;

struct ScheduledTask {
    name: String,
    interval: Duration,
    next_due: DateTime<Utc>,
    runs: u64,
    run: TaskFn,
}

#[derive(Default)]
pub struct Scheduler {
    tasks: Mutex<Vec<ScheduledTask>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task first due one `interval` after `start`.
    pub fn register<F>(&self, name: impl Into<String>, interval: Duration, start: DateTime<Utc>, task: F)
    where
        F: Fn(DateTime<Utc>) + Send + Sync + 'static,
    {
        let name = name.into();
        let interval = interval.max(Duration::milliseconds(1));
        debug!(task = %name, interval_ms = interval.num_milliseconds(), "Task scheduled");
        self.tasks.lock().push(ScheduledTask {
            name,
            interval,
            next_due: start + interval,
            runs: 0,
            run: Box::new(task),
        });
    }

    /// Run every due task once, in registration order. Missed periods are
    /// skipped rather than replayed. Returns the names of tasks that ran.
    pub fn tick(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut ran = Vec::new();
        let mut tasks = self.tasks.lock();
        for task in tasks.iter_mut().filter(|t| now >= t.next_due) {
            (task.run)(now);
            task.runs += 1;
            while task.next_due <= now {
                task.next_due += task.interval;
            }
            ran.push(task.name.clone());
        }
        ran
    }

    pub fn task_names(&self) -> Vec<String> {
        self.tasks.lock().iter().map(|t| t.name.clone()).collect()
    }

    pub fn runs(&self, name: &str) -> Option<u64> {
        self.tasks.lock().iter().find(|t| t.name == name).map(|t| t.runs)
    }

    /// Drive `tick` every `period` on the tokio runtime.
    pub fn spawn(self: Arc<Self>, period: std::time::Duration) -> SchedulerHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let join = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            info!(period_ms = period.as_millis() as u64, "Scheduler started");
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.tick(Utc::now());
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Scheduler stopped");
        });
        SchedulerHandle { stop_tx, join }
    }
}

pub struct SchedulerHandle {
    stop_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signal the loop and wait for the in-flight tick to finish.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.join.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn counter(scheduler: &Scheduler, name: &str, secs: i64, start: DateTime<Utc>) -> Arc<AtomicU64> {
        let count = Arc::new(AtomicU64::new(0));
        let c = Arc::clone(&count);
        scheduler.register(name, Duration::seconds(secs), start, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        count
    }

    #[test]
    fn test_tick_runs_only_due_tasks() {
        let scheduler = Scheduler::new();
        let start = Utc::now();
        let fast = counter(&scheduler, "fast", 10, start);
        let slow = counter(&scheduler, "slow", 60, start);

        assert!(scheduler.tick(start + Duration::seconds(5)).is_empty());
        assert_eq!(scheduler.tick(start + Duration::seconds(10)), vec!["fast"]);
        assert_eq!(
            scheduler.tick(start + Duration::seconds(60)),
            vec!["fast", "slow"]
        );
        assert_eq!(fast.load(Ordering::SeqCst), 2);
        assert_eq!(slow.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_missed_periods_are_not_replayed() {
        let scheduler = Scheduler::new();
        let start = Utc::now();
        let count = counter(&scheduler, "sweep", 10, start);

        scheduler.tick(start + Duration::seconds(95));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(scheduler.tick(start + Duration::seconds(99)).is_empty());
        scheduler.tick(start + Duration::seconds(100));
        assert_eq!(scheduler.runs("sweep"), Some(2));
    }

    #[tokio::test]
    async fn test_spawned_loop_ticks_until_stopped() {
        let scheduler = Arc::new(Scheduler::new());
        let count = counter(&scheduler, "every-ms", 0, Utc::now() - Duration::seconds(1));

        let handle = Arc::clone(&scheduler).spawn(std::time::Duration::from_millis(5));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        handle.stop().await;

        let after_stop = count.load(Ordering::SeqCst);
        assert!(after_stop >= 1);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), after_stop);
    }
}
