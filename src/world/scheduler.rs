use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::entities::entity::Entity;
use crate::error::{Result, SimError};
use crate::world::ai;
use crate::world::map_instance::MapInstance;

const IDLE_WAIT: Duration = Duration::from_millis(250);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ControlSignal {
    Running = 0,
    Shutdown = 1,
}

#[derive(Debug)]
pub struct ServerControl {
    signal: AtomicU8,
}

impl ServerControl {
    pub fn new() -> Self {
        Self {
            signal: AtomicU8::new(ControlSignal::Running as u8),
        }
    }

    pub fn request_shutdown(&self) {
        self.signal
            .store(ControlSignal::Shutdown as u8, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        matches!(self.current_signal(), ControlSignal::Running)
    }

    fn current_signal(&self) -> ControlSignal {
        match self.signal.load(Ordering::SeqCst) {
            0 => ControlSignal::Running,
            _ => ControlSignal::Shutdown,
        }
    }
}

impl Default for ServerControl {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    Retire,
}

pub trait Tickable: Send + Sync {
    fn name(&self) -> String;
    fn tick(&self, now: Instant) -> TickOutcome;
}

struct Job {
    due: Instant,
    seq: u64,
    interval: Duration,
    task: Arc<dyn Tickable>,
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Job {}

impl PartialOrd for Job {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

// Reversed so the heap pops the earliest due job first.
impl Ord for Job {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Fixed-rate scheduler for entity and instance ticks.
///
/// Every job runs on whichever worker pops it first; one job never runs on
/// two workers at once because it is only pushed back after its tick returns.
pub struct TickScheduler {
    queue: Mutex<BinaryHeap<Job>>,
    wakeup: Condvar,
    control: Arc<ServerControl>,
    next_seq: AtomicU64,
}

impl TickScheduler {
    pub fn new(control: Arc<ServerControl>) -> Self {
        Self {
            queue: Mutex::new(BinaryHeap::new()),
            wakeup: Condvar::new(),
            control,
            next_seq: AtomicU64::new(0),
        }
    }

    pub fn control(&self) -> &Arc<ServerControl> {
        &self.control
    }

    pub fn schedule(&self, task: Arc<dyn Tickable>, interval: Duration, first_due: Instant) {
        let job = Job {
            due: first_due,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            interval,
            task,
        };
        self.push(job);
    }

    pub fn len(&self) -> usize {
        self.lock_queue().map(|queue| queue.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_queue(&self) -> Result<MutexGuard<'_, BinaryHeap<Job>>> {
        self.queue
            .lock()
            .map_err(|_| SimError::Poisoned("scheduler queue"))
    }

    fn push(&self, job: Job) {
        match self.lock_queue() {
            Ok(mut queue) => queue.push(job),
            Err(err) => {
                tracing::error!(job = %job.task.name(), error = %err, "job dropped");
                return;
            }
        }
        self.wakeup.notify_one();
    }

    pub fn run_due(&self, now: Instant) -> usize {
        let due: Vec<Job> = match self.lock_queue() {
            Ok(mut queue) => {
                let mut due = Vec::new();
                while queue.peek().is_some_and(|job| job.due <= now) {
                    if let Some(job) = queue.pop() {
                        due.push(job);
                    }
                }
                due
            }
            Err(err) => {
                tracing::error!(error = %err, "scheduler queue unavailable");
                return 0;
            }
        };
        let count = due.len();
        for job in due {
            self.run_job(job, now);
        }
        count
    }

    fn run_job(&self, mut job: Job, now: Instant) {
        let task = Arc::clone(&job.task);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| task.tick(now)));
        match outcome {
            Ok(TickOutcome::Retire) => {
                tracing::trace!(job = %task.name(), "job retired");
                return;
            }
            Ok(TickOutcome::Continue) => {}
            Err(_) => {
                tracing::error!(job = %task.name(), "tick panicked, rescheduling");
            }
        }
        let mut next = job.due + job.interval;
        if next <= now {
            next = now + job.interval;
        }
        job.due = next;
        self.push(job);
    }

    pub fn run_workers(self: &Arc<Self>, count: usize) -> Result<Vec<JoinHandle<()>>> {
        (0..count.max(1))
            .map(|index| {
                let name = format!("tick-worker-{index}");
                let scheduler = Arc::clone(self);
                thread::Builder::new()
                    .name(name.clone())
                    .spawn(move || scheduler.worker_loop())
                    .map_err(|source| SimError::Thread { name, source })
            })
            .collect()
    }

    pub fn shutdown(&self) {
        self.control.request_shutdown();
        self.wakeup.notify_all();
    }

    fn worker_loop(&self) {
        while let Some(job) = self.next_job() {
            self.run_job(job, Instant::now());
        }
    }

    fn next_job(&self) -> Option<Job> {
        let mut queue = self.lock_queue().ok()?;
        loop {
            if !self.control.is_running() {
                return None;
            }
            let wait = match queue.peek() {
                None => IDLE_WAIT,
                Some(job) => {
                    let now = Instant::now();
                    if job.due <= now {
                        return queue.pop();
                    }
                    job.due - now
                }
            };
            queue = self.wakeup.wait_timeout(queue, wait.min(IDLE_WAIT)).ok()?.0;
        }
    }
}

pub struct EntityJob {
    instance: Weak<MapInstance>,
    entity: Arc<Entity>,
}

impl EntityJob {
    pub fn new(instance: Weak<MapInstance>, entity: Arc<Entity>) -> Self {
        Self { instance, entity }
    }
}

impl Tickable for EntityJob {
    fn name(&self) -> String {
        format!("entity {}", self.entity.id())
    }

    fn tick(&self, now: Instant) -> TickOutcome {
        let Some(instance) = self.instance.upgrade() else {
            self.entity.retire();
            return TickOutcome::Retire;
        };
        if ai::tick_entity(&instance, &self.entity, now) {
            TickOutcome::Continue
        } else {
            TickOutcome::Retire
        }
    }
}

pub struct InstanceJob {
    instance: Weak<MapInstance>,
}

impl InstanceJob {
    pub fn new(instance: &Arc<MapInstance>) -> Self {
        Self {
            instance: Arc::downgrade(instance),
        }
    }
}

impl Tickable for InstanceJob {
    fn name(&self) -> String {
        match self.instance.upgrade() {
            Some(instance) => format!("instance {}", instance.id()),
            None => "instance (gone)".to_string(),
        }
    }

    fn tick(&self, now: Instant) -> TickOutcome {
        match self.instance.upgrade() {
            Some(instance) if !instance.is_disposed() => {
                instance.tick(now);
                TickOutcome::Continue
            }
            _ => TickOutcome::Retire,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Counter {
        runs: AtomicUsize,
        retire_after: usize,
        panic_on: Option<usize>,
    }

    impl Counter {
        fn new(retire_after: usize) -> Arc<Self> {
            Arc::new(Self {
                runs: AtomicUsize::new(0),
                retire_after,
                panic_on: None,
            })
        }
    }

    impl Tickable for Counter {
        fn name(&self) -> String {
            "counter".to_string()
        }

        fn tick(&self, _now: Instant) -> TickOutcome {
            let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
            if self.panic_on == Some(run) {
                panic!("tick {run} failed");
            }
            if run >= self.retire_after {
                TickOutcome::Retire
            } else {
                TickOutcome::Continue
            }
        }
    }

    #[test]
    fn jobs_run_at_fixed_rate_until_retired() {
        let scheduler = TickScheduler::new(Arc::new(ServerControl::new()));
        let start = Instant::now();
        let counter = Counter::new(3);
        scheduler.schedule(counter.clone(), Duration::from_millis(100), start);

        assert_eq!(scheduler.run_due(start), 1);
        assert_eq!(scheduler.run_due(start + Duration::from_millis(50)), 0);
        assert_eq!(scheduler.run_due(start + Duration::from_millis(100)), 1);
        assert_eq!(scheduler.run_due(start + Duration::from_millis(200)), 1);
        assert!(scheduler.is_empty());
        assert_eq!(counter.runs.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn earliest_job_runs_first() {
        let scheduler = TickScheduler::new(Arc::new(ServerControl::new()));
        let start = Instant::now();
        let late = Counter::new(1);
        let early = Counter::new(1);
        scheduler.schedule(late.clone(), Duration::from_secs(1), start + Duration::from_millis(20));
        scheduler.schedule(early.clone(), Duration::from_secs(1), start + Duration::from_millis(10));
        assert_eq!(scheduler.run_due(start + Duration::from_millis(15)), 1);
        assert_eq!(early.runs.load(Ordering::SeqCst), 1);
        assert_eq!(late.runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panicking_tick_is_rescheduled() {
        let scheduler = TickScheduler::new(Arc::new(ServerControl::new()));
        let start = Instant::now();
        let counter = Arc::new(Counter {
            runs: AtomicUsize::new(0),
            retire_after: 3,
            panic_on: Some(1),
        });
        scheduler.schedule(counter.clone(), Duration::from_millis(10), start);
        scheduler.run_due(start);
        assert_eq!(scheduler.len(), 1);
        scheduler.run_due(start + Duration::from_millis(10));
        scheduler.run_due(start + Duration::from_millis(20));
        assert_eq!(counter.runs.load(Ordering::SeqCst), 3);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn workers_stop_on_shutdown() {
        let scheduler = Arc::new(TickScheduler::new(Arc::new(ServerControl::new())));
        let counter = Counter::new(usize::MAX);
        scheduler.schedule(counter.clone(), Duration::from_millis(5), Instant::now());
        let workers = scheduler.run_workers(2).unwrap();
        thread::sleep(Duration::from_millis(60));
        scheduler.shutdown();
        for worker in workers {
            worker.join().unwrap();
        }
        assert!(counter.runs.load(Ordering::SeqCst) >= 2);
    }
}
