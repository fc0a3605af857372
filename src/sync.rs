// Copyright 2025 the Blockfold authors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Synchronization primitives: the queue/latch monitor and the per-batch
//! completion latch.

use crate::error::Error;
use crate::macros::log_debug;
use std::sync::{Condvar, Mutex, MutexGuard};

/// An ergonomic wrapper around a [`Mutex`]-[`Condvar`] pair.
pub(crate) struct Monitor<T> {
    mutex: Mutex<T>,
    condvar: Condvar,
}

impl<T> Monitor<T> {
    /// Creates a new monitor initialized with the given state.
    pub fn new(t: T) -> Self {
        Self {
            mutex: Mutex::new(t),
            condvar: Condvar::new(),
        }
    }

    /// Runs `f` on the state under the lock, then notifies one waiting
    /// thread.
    pub fn with_notify_one<U>(&self, f: impl FnOnce(&mut T) -> U) -> U {
        let result = f(&mut self.mutex.lock().unwrap());
        self.condvar.notify_one();
        result
    }

    /// Runs `f` on the state under the lock, then notifies all waiting
    /// threads.
    pub fn with_notify_all<U>(&self, f: impl FnOnce(&mut T) -> U) -> U {
        let result = f(&mut self.mutex.lock().unwrap());
        self.condvar.notify_all();
        result
    }

    /// Waits until the predicate is false on the state.
    ///
    /// This returns a [`MutexGuard`], allowing to further inspect or modify
    /// the state.
    pub fn wait_while(&self, predicate: impl FnMut(&mut T) -> bool) -> MutexGuard<T> {
        self.condvar
            .wait_while(self.mutex.lock().unwrap(), predicate)
            .unwrap()
    }
}

/// How a single task of a batch was disposed of.
#[derive(Clone, Copy, Debug)]
pub(crate) enum TaskOutcome {
    /// The task ran to completion and wrote its result slot.
    Completed,
    /// The task panicked; its result slot was never written.
    Panicked,
    /// The pool shut down before a worker picked the task up.
    Abandoned,
}

/// Tally of the disposed tasks of one batch.
#[derive(Default)]
struct LatchState {
    completed: usize,
    panicked: usize,
    abandoned: usize,
}

impl LatchState {
    fn settled(&self) -> usize {
        self.completed + self.panicked + self.abandoned
    }
}

/// A completion latch shared by all tasks of one batch.
///
/// Workers (and the shutdown path) record one [`TaskOutcome`] per task; the
/// submitting caller blocks in [`wait()`](Self::wait) until all `target`
/// tasks are accounted for. Created per batch, discarded when the submitting
/// call returns.
pub(crate) struct BatchLatch {
    /// Number of tasks in the batch.
    target: usize,
    /// Running tally, guarded by the monitor the submitter waits on.
    state: Monitor<LatchState>,
}

impl BatchLatch {
    /// Creates a latch for a batch of `target` tasks.
    pub fn new(target: usize) -> Self {
        Self {
            target,
            state: Monitor::new(LatchState::default()),
        }
    }

    /// Records the outcome of one task, waking the submitter if this was the
    /// last task of the batch.
    pub fn record(&self, outcome: TaskOutcome) {
        let settled = self.state.with_notify_one(|state| {
            match outcome {
                TaskOutcome::Completed => state.completed += 1,
                TaskOutcome::Panicked => state.panicked += 1,
                TaskOutcome::Abandoned => state.abandoned += 1,
            }
            state.settled()
        });
        debug_assert!(settled <= self.target);
        if settled == self.target {
            log_debug!("[latch] Batch of {} tasks fully settled.", self.target);
        }
    }

    /// Blocks until every task of the batch is accounted for.
    ///
    /// Returns `Ok(())` only if all tasks completed; a single panicked or
    /// abandoned task fails the whole batch.
    pub fn wait(&self) -> Result<(), Error> {
        let guard = self
            .state
            .wait_while(|state| state.settled() < self.target);
        if guard.panicked > 0 {
            Err(Error::TaskPanicked)
        } else if guard.abandoned > 0 {
            Err(Error::Interrupted)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn latch_with_zero_tasks_releases_immediately() {
        let latch = BatchLatch::new(0);
        assert_eq!(latch.wait(), Ok(()));
    }

    #[test]
    fn latch_releases_after_all_completions() {
        let latch = BatchLatch::new(8);
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| latch.record(TaskOutcome::Completed));
            }
            assert_eq!(latch.wait(), Ok(()));
        });
    }

    #[test]
    fn latch_reports_a_panicked_task() {
        let latch = BatchLatch::new(3);
        latch.record(TaskOutcome::Completed);
        latch.record(TaskOutcome::Panicked);
        latch.record(TaskOutcome::Completed);
        assert_eq!(latch.wait(), Err(Error::TaskPanicked));
    }

    #[test]
    fn latch_reports_an_abandoned_task() {
        let latch = BatchLatch::new(2);
        latch.record(TaskOutcome::Completed);
        latch.record(TaskOutcome::Abandoned);
        assert_eq!(latch.wait(), Err(Error::Interrupted));
    }

    #[test]
    fn panic_takes_precedence_over_abandonment() {
        let latch = BatchLatch::new(2);
        latch.record(TaskOutcome::Abandoned);
        latch.record(TaskOutcome::Panicked);
        assert_eq!(latch.wait(), Err(Error::TaskPanicked));
    }

    #[test]
    fn monitor_wait_while_observes_updates() {
        let monitor = Monitor::new(0);
        std::thread::scope(|scope| {
            scope.spawn(|| monitor.with_notify_all(|n| *n = 42));
            let guard = monitor.wait_while(|n| *n != 42);
            assert_eq!(*guard, 42);
        });
    }
}
