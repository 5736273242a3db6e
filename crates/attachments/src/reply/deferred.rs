//! Single-threaded queue of deferred notifications

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

type Task = Box<dyn FnOnce()>;

/// Tasks scheduled to run after the current call stack unwinds
///
/// Handles are cheap clones sharing one queue. Whoever owns the event loop
/// calls [`DeferredQueue::run_pending`] between turns; a scheduled task
/// never runs inside the call that scheduled it.
#[derive(Clone, Default)]
pub struct DeferredQueue {
    tasks: Rc<RefCell<VecDeque<Task>>>,
}

impl DeferredQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `task` for the next turn
    pub fn schedule(&self, task: impl FnOnce() + 'static) {
        self.tasks.borrow_mut().push_back(Box::new(task));
    }

    pub fn len(&self) -> usize {
        self.tasks.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.borrow().is_empty()
    }

    /// Run the tasks queued before this call, in order
    ///
    /// Tasks scheduled while these run wait for the next turn. Returns the
    /// number of tasks run.
    pub fn run_pending(&self) -> usize {
        let pending = self.len();
        let mut ran = 0;
        while ran < pending {
            // The borrow ends before the task runs so it can schedule more
            let Some(task) = self.tasks.borrow_mut().pop_front() else {
                break;
            };
            task();
            ran += 1;
        }
        ran
    }

    /// Run turns until no task is left; returns the total number run
    pub fn run_until_idle(&self) -> usize {
        let mut total = 0;
        loop {
            let ran = self.run_pending();
            if ran == 0 {
                return total;
            }
            total += ran;
        }
    }
}

impl fmt::Debug for DeferredQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredQueue")
            .field("pending", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_tasks_run_in_order() {
        let queue = DeferredQueue::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        for i in 0..3 {
            let log = log.clone();
            queue.schedule(move || log.borrow_mut().push(i));
        }
        assert!(log.borrow().is_empty());
        assert_eq!(queue.run_pending(), 3);
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_rescheduled_task_waits_for_next_turn() {
        let queue = DeferredQueue::new();
        let count = Rc::new(Cell::new(0));

        let inner_queue = queue.clone();
        let inner_count = count.clone();
        queue.schedule(move || {
            inner_count.set(inner_count.get() + 1);
            let again = inner_count.clone();
            inner_queue.schedule(move || again.set(again.get() + 10));
        });

        assert_eq!(queue.run_pending(), 1);
        assert_eq!(count.get(), 1);
        assert_eq!(queue.len(), 1);

        assert_eq!(queue.run_until_idle(), 1);
        assert_eq!(count.get(), 11);
    }
}
