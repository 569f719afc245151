//! Rust-native shape of the "(callable, due_time) pairs" scheduling
//! primitive described in §5: a min-heap of `ScheduledTask`s, each a
//! callback that runs once at its due time and whose return value is the
//! next round of tasks to fold back into the heap. This is the direct
//! translation of the original's `time_queue_driven_process` run list.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cooperative shutdown flag (§5 "a global halt signal"): shared by every
/// scheduled task and the event loop itself. Cloning shares the same flag.
#[derive(Clone, Default)]
pub struct HaltSignal(Arc<AtomicBool>);

impl HaltSignal {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn set(&self) {
        self.0.store(true, AtomicOrdering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(AtomicOrdering::SeqCst)
    }
}

/// A `(callable, due_time)` pair: `callback` runs once at `due`, and
/// whatever `ScheduledTask`s it returns are folded back into the scheduler.
pub struct ScheduledTask {
    due: Instant,
    callback: Box<dyn FnMut(&HaltSignal) -> Vec<ScheduledTask>>,
}

impl ScheduledTask {
    pub fn new<F>(due: Instant, callback: F) -> Self
    where
        F: FnMut(&HaltSignal) -> Vec<ScheduledTask> + 'static,
    {
        Self { due, callback: Box::new(callback) }
    }
}

struct HeapEntry(ScheduledTask);

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.due == other.0.due
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the earliest due time sorts first.
        other.0.due.cmp(&self.0.due)
    }
}

/// Min-heap of scheduled tasks ordered by due time, owned by the node
/// process's event loop.
#[derive(Default)]
pub struct Scheduler {
    heap: BinaryHeap<HeapEntry>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self { heap: BinaryHeap::new() }
    }

    pub fn schedule<F>(&mut self, due: Instant, callback: F)
    where
        F: FnMut(&HaltSignal) -> Vec<ScheduledTask> + 'static,
    {
        self.heap.push(HeapEntry(ScheduledTask::new(due, callback)));
    }

    /// How long the event loop should block in its next poll call, or
    /// `None` if nothing is scheduled.
    pub fn time_until_next(&self) -> Option<Duration> {
        self.heap
            .peek()
            .map(|entry| entry.0.due.saturating_duration_since(Instant::now()))
    }

    /// Runs every task whose due time has passed, feeding whatever each
    /// returns back into the heap.
    pub fn run_due(&mut self, halt: &HaltSignal) {
        let now = Instant::now();
        while let Some(entry) = self.heap.peek() {
            if entry.0.due > now {
                break;
            }
            let HeapEntry(mut task) = self.heap.pop().unwrap();
            for follow_up in (task.callback)(halt) {
                self.heap.push(HeapEntry(follow_up));
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    #[test]
    fn run_due_only_fires_tasks_whose_time_has_passed() {
        let mut scheduler = Scheduler::new();
        let halt = HaltSignal::new();
        let fired = Arc::new(AtomicBool::new(false));

        let fired_clone = fired.clone();
        scheduler.schedule(Instant::now() + Duration::from_secs(3600), move |_| {
            fired_clone.store(true, AtomicOrdering::SeqCst);
            Vec::new()
        });
        scheduler.run_due(&halt);
        assert!(!fired.load(AtomicOrdering::SeqCst));

        let fired_clone = fired.clone();
        scheduler.schedule(Instant::now(), move |_| {
            fired_clone.store(true, AtomicOrdering::SeqCst);
            Vec::new()
        });
        scheduler.run_due(&halt);
        assert!(fired.load(AtomicOrdering::SeqCst));
    }

    #[test]
    fn task_reschedules_itself_via_return_value() {
        let mut scheduler = Scheduler::new();
        let halt = HaltSignal::new();
        let runs = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        fn tick(runs: Arc<std::sync::atomic::AtomicUsize>, halt: &HaltSignal) -> Vec<ScheduledTask> {
            runs.fetch_add(1, AtomicOrdering::SeqCst);
            if halt.is_set() {
                return Vec::new();
            }
            let runs = runs.clone();
            vec![ScheduledTask::new(Instant::now(), move |halt| tick(runs.clone(), halt))]
        }

        let runs_clone = runs.clone();
        scheduler.schedule(Instant::now(), move |halt| tick(runs_clone.clone(), halt));

        scheduler.run_due(&halt);
        scheduler.run_due(&halt);
        assert_eq!(runs.load(AtomicOrdering::SeqCst), 2);

        halt.set();
        scheduler.run_due(&halt);
        assert_eq!(runs.load(AtomicOrdering::SeqCst), 3);
        assert!(scheduler.heap.is_empty());
    }
}
