//! Cooperative idle scheduling for non-urgent UI mutations.
//!
//! The queue defers bounded units of work into host-granted idle slices so
//! the control thread stays responsive while worker results arrive in a
//! burst. Strictly FIFO and budget-based, not a priority scheduler.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;
use std::time::{Duration, Instant};

/// A zero-argument unit of deferred work. Opaque to the queue.
pub type IdleTask = Box<dyn FnOnce()>;

/// Callback handed to the host's idle-scheduling primitive.
pub type IdleCallback = Box<dyn FnOnce(&IdleDeadline)>;

/// Handle for one outstanding idle-work request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdleHandle(u64);

impl IdleHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Remaining-time budget for one idle slice.
pub struct IdleDeadline {
    remaining: Box<dyn Fn() -> Duration>,
}

impl IdleDeadline {
    pub fn new(remaining: impl Fn() -> Duration + 'static) -> Self {
        Self {
            remaining: Box::new(remaining),
        }
    }

    /// Deadline at a fixed wall-clock instant.
    pub fn until(deadline: Instant) -> Self {
        Self::new(move || deadline.saturating_duration_since(Instant::now()))
    }

    /// Time left in this slice. Zero once the budget is spent.
    pub fn time_remaining(&self) -> Duration {
        (self.remaining)()
    }
}

/// Host idle-scheduling primitive (consumed interface).
///
/// The host invokes the callback once, at some later point when the control
/// thread is idle, with the slice's remaining-time budget.
pub trait IdleScheduler {
    fn request_idle_work(&self, callback: IdleCallback) -> IdleHandle;

    /// Cancel a not-yet-fired request. Canceling a fired or unknown handle
    /// is a no-op.
    fn cancel_idle_work(&self, handle: IdleHandle);
}

struct QueueState {
    tasks: VecDeque<IdleTask>,
    /// The single outstanding scheduling request, or `None` when idle.
    handle: Option<IdleHandle>,
}

/// FIFO task queue drained during host idle slices.
///
/// Two states: idle (no scheduling request outstanding) and scheduled (one
/// outstanding). Appending a task while idle requests a slice; appending
/// while scheduled only queues. Strictly control-thread; not `Send`.
#[derive(Clone)]
pub struct IdleTaskQueue {
    state: Rc<RefCell<QueueState>>,
    scheduler: Rc<dyn IdleScheduler>,
}

impl IdleTaskQueue {
    pub fn new(scheduler: Rc<dyn IdleScheduler>) -> Self {
        Self {
            state: Rc::new(RefCell::new(QueueState {
                tasks: VecDeque::new(),
                handle: None,
            })),
            scheduler,
        }
    }

    /// Append a task to the back of the queue, requesting an idle slice if
    /// none is outstanding.
    pub fn add_task(&self, task: impl FnOnce() + 'static) {
        self.state.borrow_mut().tasks.push_back(Box::new(task));
        schedule(&self.state, &self.scheduler);
    }

    /// Drop all queued tasks and cancel the outstanding slice request.
    /// A task already mid-execution still completes.
    pub fn clear(&self) {
        let handle = {
            let mut state = self.state.borrow_mut();
            state.tasks.clear();
            state.handle.take()
        };
        if let Some(handle) = handle {
            self.scheduler.cancel_idle_work(handle);
        }
    }

    /// True iff a scheduling request is outstanding.
    pub fn has_pending_tasks(&self) -> bool {
        self.state.borrow().handle.is_some()
    }
}

fn schedule(state: &Rc<RefCell<QueueState>>, scheduler: &Rc<dyn IdleScheduler>) {
    {
        let state = state.borrow();
        if state.handle.is_some() || state.tasks.is_empty() {
            return;
        }
    }
    let handle = scheduler.request_idle_work(drain_callback(state.clone(), scheduler.clone()));
    state.borrow_mut().handle = Some(handle);
}

fn drain_callback(state: Rc<RefCell<QueueState>>, scheduler: Rc<dyn IdleScheduler>) -> IdleCallback {
    Box::new(move |deadline| {
        // Pop-then-run keeps the borrow released while the task executes, so
        // tasks may themselves append or clear.
        while deadline.time_remaining() > Duration::ZERO {
            let task = match state.borrow_mut().tasks.pop_front() {
                Some(task) => task,
                None => break,
            };
            if catch_unwind(AssertUnwindSafe(task)).is_err() {
                log::error!("idle task panicked; continuing with the remaining queue");
            }
        }

        let more = !state.borrow().tasks.is_empty();
        if more {
            let next =
                scheduler.request_idle_work(drain_callback(state.clone(), scheduler.clone()));
            state.borrow_mut().handle = Some(next);
        } else {
            state.borrow_mut().handle = None;
        }
    })
}

/// Production [`IdleScheduler`] over a tokio `LocalSet`.
///
/// "Idle" is approximated by yielding to the local executor before running
/// the callback with a fixed slice budget. Must be used within a `LocalSet`.
pub struct LocalIdleScheduler {
    slice: Duration,
    next_id: Cell<u64>,
    outstanding: Rc<RefCell<HashMap<u64, tokio::task::JoinHandle<()>>>>,
}

impl LocalIdleScheduler {
    /// Default per-slice budget, roughly one frame.
    pub const DEFAULT_SLICE: Duration = Duration::from_millis(12);

    pub fn new(slice: Duration) -> Self {
        Self {
            slice,
            next_id: Cell::new(0),
            outstanding: Rc::new(RefCell::new(HashMap::new())),
        }
    }
}

impl Default for LocalIdleScheduler {
    fn default() -> Self {
        Self::new(Self::DEFAULT_SLICE)
    }
}

impl IdleScheduler for LocalIdleScheduler {
    fn request_idle_work(&self, callback: IdleCallback) -> IdleHandle {
        let id = self.next_id.get();
        self.next_id.set(id + 1);

        let slice = self.slice;
        let outstanding = self.outstanding.clone();
        let join = tokio::task::spawn_local(async move {
            tokio::task::yield_now().await;
            let deadline = IdleDeadline::until(Instant::now() + slice);
            callback(&deadline);
            outstanding.borrow_mut().remove(&id);
        });
        self.outstanding.borrow_mut().insert(id, join);

        IdleHandle::new(id)
    }

    fn cancel_idle_work(&self, handle: IdleHandle) {
        if let Some(join) = self.outstanding.borrow_mut().remove(&handle.raw()) {
            join.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ManualIdleScheduler, generous_deadline, slice_budget};

    fn recorder() -> (Rc<RefCell<Vec<u32>>>, impl Fn(u32) -> IdleTask) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let make = {
            let seen = seen.clone();
            move |n: u32| -> IdleTask {
                let seen = seen.clone();
                Box::new(move || seen.borrow_mut().push(n))
            }
        };
        (seen, make)
    }

    #[test]
    fn drains_fifo_within_one_slice() {
        let scheduler = ManualIdleScheduler::new();
        let queue = IdleTaskQueue::new(scheduler.clone());
        let (seen, task) = recorder();

        for n in 1..=5 {
            queue.add_task(task(n));
        }
        assert!(queue.has_pending_tasks());
        assert_eq!(scheduler.outstanding(), 1);

        scheduler.fire(generous_deadline());
        assert_eq!(*seen.borrow(), vec![1, 2, 3, 4, 5]);
        assert!(!queue.has_pending_tasks());
    }

    #[test]
    fn spans_multiple_slices_when_budget_runs_out() {
        let scheduler = ManualIdleScheduler::new();
        let queue = IdleTaskQueue::new(scheduler.clone());
        let (seen, task) = recorder();

        for n in 1..=5 {
            queue.add_task(task(n));
        }

        // Two tasks fit in the first slice; the queue re-requests itself.
        scheduler.fire(slice_budget(2));
        assert_eq!(*seen.borrow(), vec![1, 2]);
        assert!(queue.has_pending_tasks());
        assert_eq!(scheduler.outstanding(), 1);

        scheduler.fire(slice_budget(2));
        assert_eq!(*seen.borrow(), vec![1, 2, 3, 4]);
        assert!(queue.has_pending_tasks());

        scheduler.fire(generous_deadline());
        assert_eq!(*seen.borrow(), vec![1, 2, 3, 4, 5]);
        assert!(!queue.has_pending_tasks());
    }

    #[test]
    fn add_while_scheduled_only_queues() {
        let scheduler = ManualIdleScheduler::new();
        let queue = IdleTaskQueue::new(scheduler.clone());
        let (seen, task) = recorder();

        queue.add_task(task(1));
        queue.add_task(task(2));
        assert_eq!(scheduler.outstanding(), 1);

        scheduler.fire(generous_deadline());
        assert_eq!(*seen.borrow(), vec![1, 2]);
    }

    #[test]
    fn clear_cancels_outstanding_request() {
        let scheduler = ManualIdleScheduler::new();
        let queue = IdleTaskQueue::new(scheduler.clone());
        let (seen, task) = recorder();

        queue.add_task(task(1));
        queue.clear();
        assert!(!queue.has_pending_tasks());
        assert_eq!(scheduler.outstanding(), 0);

        scheduler.drain();
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn panicking_task_does_not_starve_the_queue() {
        let scheduler = ManualIdleScheduler::new();
        let queue = IdleTaskQueue::new(scheduler.clone());
        let (seen, task) = recorder();

        queue.add_task(task(1));
        queue.add_task(|| panic!("broken task"));
        queue.add_task(task(3));

        scheduler.fire(generous_deadline());
        assert_eq!(*seen.borrow(), vec![1, 3]);
        assert!(!queue.has_pending_tasks());
    }

    #[test]
    fn task_may_append_more_work() {
        let scheduler = ManualIdleScheduler::new();
        let queue = IdleTaskQueue::new(scheduler.clone());
        let (seen, task) = recorder();

        {
            let inner_queue = queue.clone();
            let inner_seen = seen.clone();
            let late = task(2);
            queue.add_task(move || {
                inner_seen.borrow_mut().push(1);
                inner_queue.add_task(late);
            });
        }

        scheduler.fire(generous_deadline());
        assert_eq!(*seen.borrow(), vec![1, 2]);
        assert!(!queue.has_pending_tasks());
    }

    #[tokio::test]
    async fn local_scheduler_runs_queued_tasks() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let scheduler = Rc::new(LocalIdleScheduler::default());
                let queue = IdleTaskQueue::new(scheduler);
                let (seen, task) = recorder();

                for n in 1..=3 {
                    queue.add_task(task(n));
                }
                assert!(queue.has_pending_tasks());

                while queue.has_pending_tasks() {
                    tokio::task::yield_now().await;
                }
                assert_eq!(*seen.borrow(), vec![1, 2, 3]);
            })
            .await;
    }

    #[tokio::test]
    async fn local_scheduler_cancel_drops_request() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let scheduler = Rc::new(LocalIdleScheduler::default());
                let queue = IdleTaskQueue::new(scheduler);
                let (seen, task) = recorder();

                queue.add_task(task(1));
                queue.clear();

                for _ in 0..10 {
                    tokio::task::yield_now().await;
                }
                assert!(seen.borrow().is_empty());
                assert!(!queue.has_pending_tasks());
            })
            .await;
    }
}
