// Copyright 2025 the Blockfold authors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A reusable fixed-size pool of worker threads consuming batches of tasks
//! from one shared FIFO queue.

use crate::error::Error;
use crate::macros::{log_debug, log_error, log_warn};
use crate::sync::{BatchLatch, Monitor, TaskOutcome};
use crossbeam_utils::CachePadded;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// A type-erased unit of work, runnable by any worker thread.
type Job = Box<dyn FnOnce() + Send + 'static>;

/// One queued task: a job plus the completion latch of the batch it belongs
/// to. Consumed exactly once, by exactly one worker (or by the shutdown
/// drain).
struct Task {
    job: Job,
    latch: Arc<BatchLatch>,
}

/// The shared task queue. Tasks from concurrent batches may interleave here.
struct Queue {
    tasks: VecDeque<Task>,
    /// Cleared once `shutdown()` begins; nothing is admitted afterwards.
    open: bool,
}

/// A builder for [`ThreadPool`].
pub struct ThreadPoolBuilder {
    /// Number of worker threads to spawn in the pool.
    pub num_threads: usize,
}

impl ThreadPoolBuilder {
    /// Spawns a thread pool.
    ///
    /// ```
    /// # use blockfold::ThreadPoolBuilder;
    /// let pool = ThreadPoolBuilder { num_threads: 4 }.build().unwrap();
    ///
    /// let doubled = pool
    ///     .submit_batch((0..4).map(|i| move || i * 2).collect())
    ///     .unwrap();
    /// assert_eq!(doubled, vec![0, 2, 4, 6]);
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidThreadCount`] if `num_threads` is zero,
    /// before any thread is spawned.
    pub fn build(&self) -> Result<ThreadPool, Error> {
        if self.num_threads == 0 {
            return Err(Error::InvalidThreadCount);
        }

        let queue = Arc::new(Monitor::new(Queue {
            tasks: VecDeque::new(),
            open: true,
        }));

        let threads = (0..self.num_threads)
            .map(|_id| {
                let context = WorkerContext {
                    #[cfg(feature = "log")]
                    id: _id,
                    queue: queue.clone(),
                };
                WorkerThreadHandle {
                    handle: std::thread::spawn(move || context.run()),
                }
            })
            .collect();
        log_debug!("[pool] Spawned {} worker threads.", self.num_threads);

        Ok(ThreadPool {
            num_threads: self.num_threads,
            threads: Mutex::new(threads),
            queue,
        })
    }
}

/// A fixed set of long-lived worker threads sharing one FIFO task queue.
///
/// Batches submitted by concurrent callers interleave on the queue; each
/// caller blocks until its own batch has fully run. The pool is explicitly
/// closed with [`shutdown()`](Self::shutdown), or implicitly when dropped.
pub struct ThreadPool {
    /// Number of worker threads spawned in the pool.
    num_threads: usize,
    /// Handles to all the worker threads, taken out by `shutdown()`.
    threads: Mutex<Vec<WorkerThreadHandle>>,
    /// The task queue shared with all the worker threads.
    queue: Arc<Monitor<Queue>>,
}

/// Handle to a worker thread in the pool.
struct WorkerThreadHandle {
    /// Thread handle object.
    handle: JoinHandle<()>,
}

impl ThreadPool {
    /// Returns the number of worker threads spawned in this pool.
    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Submits the given closures as one batch and blocks until every one of
    /// them has run, returning their results in submission order.
    ///
    /// May be invoked concurrently from multiple threads: batches are
    /// admitted to the queue atomically and in FIFO order, but no ordering is
    /// guaranteed between tasks of different concurrent batches. The tasks
    /// may borrow from the submitting stack frame.
    ///
    /// # Errors
    ///
    /// - [`Error::PoolShutDown`] if the pool is already shutting down or shut
    ///   down; nothing is enqueued.
    /// - [`Error::Interrupted`] if a concurrent
    ///   [`shutdown()`](Self::shutdown) abandoned part of the batch.
    /// - [`Error::TaskPanicked`] if one of the tasks panicked. The worker
    ///   survives and the pool stays usable.
    pub fn submit_batch<'env, R, F>(&self, tasks: Vec<F>) -> Result<Vec<R>, Error>
    where
        R: Send + 'env,
        F: FnOnce() -> R + Send + 'env,
    {
        let num_tasks = tasks.len();
        let latch = Arc::new(BatchLatch::new(num_tasks));
        // One result slot per task, index-addressed so that out-of-order
        // completion cannot corrupt positional correspondence. Each slot is
        // written exactly once, by the worker that runs the corresponding
        // task; the padding keeps concurrent writes off shared cache lines.
        let slots = (0..num_tasks)
            .map(|_| CachePadded::new(Mutex::new(None)))
            .collect::<Arc<[_]>>();

        let admitted = self.queue.with_notify_all(|queue| {
            if !queue.open {
                return false;
            }
            for (index, task) in tasks.into_iter().enumerate() {
                let slots = slots.clone();
                let job: Box<dyn FnOnce() + Send + 'env> = Box::new(move || {
                    let result = task();
                    *slots[index].lock().unwrap() = Some(result);
                });
                // SAFETY: The transmute only erases the `'env` bound of the
                // closure. Every enqueued job is either consumed by a worker
                // or dropped by the shutdown drain, and its outcome is
                // recorded on the batch latch only afterwards. Since this
                // function cannot return before the latch has accounted for
                // all `num_tasks` tasks, everything the closure borrows
                // outlives every access to it.
                let job: Job = unsafe { std::mem::transmute(job) };
                queue.tasks.push_back(Task {
                    job,
                    latch: latch.clone(),
                });
            }
            true
        });
        if !admitted {
            return Err(Error::PoolShutDown);
        }
        log_debug!("[pool] Submitted a batch of {num_tasks} tasks.");

        latch.wait()?;

        Ok(slots
            .iter()
            .map(|slot| slot.lock().unwrap().take().unwrap())
            .collect())
    }

    /// Applies `f` to every element of `items` as one batch, one task per
    /// element, returning the results in input order.
    ///
    /// # Errors
    ///
    /// Same as [`submit_batch()`](Self::submit_batch).
    pub fn map<T, R>(&self, f: impl Fn(&T) -> R + Sync, items: &[T]) -> Result<Vec<R>, Error>
    where
        T: Sync,
        R: Send,
    {
        let f = &f;
        self.submit_batch(items.iter().map(|item| move || f(item)).collect())
    }

    /// Shuts the pool down: closes the queue, abandons every task not yet
    /// picked up by a worker (failing their submitters' batches with
    /// [`Error::Interrupted`]), lets tasks already running complete, and
    /// joins all worker threads. Idempotent.
    ///
    /// Callers with a batch in flight when the shutdown starts get no
    /// completion guarantee and must treat their pending result as unusable.
    pub fn shutdown(&self) {
        let (was_open, drained) = self.queue.with_notify_all(|queue| {
            let was_open = queue.open;
            queue.open = false;
            (was_open, queue.tasks.drain(..).collect::<Vec<_>>())
        });
        if !was_open {
            log_warn!("[pool] Shutdown requested on an already closed pool.");
        }
        log_debug!("[pool] Abandoning {} queued tasks.", drained.len());
        for task in drained {
            // The job (and the borrows it captures) must be gone before its
            // submitter is woken.
            drop(task.job);
            task.latch.record(TaskOutcome::Abandoned);
        }

        let threads = std::mem::take(&mut *self.threads.lock().unwrap());
        for (_i, t) in threads.into_iter().enumerate() {
            let result = t.handle.join();
            match result {
                Ok(_) => log_debug!("[pool] Worker {_i} joined with result: {result:?}"),
                Err(_) => log_error!("[pool] Worker {_i} joined with result: {result:?}"),
            }
        }
        log_debug!("[pool] Joined workers.");
    }
}

impl Drop for ThreadPool {
    /// Joins all the threads in the pool.
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Context object owned by a worker thread.
struct WorkerContext {
    /// Thread index.
    #[cfg(feature = "log")]
    id: usize,
    /// The task queue shared with the pool and the other workers.
    queue: Arc<Monitor<Queue>>,
}

impl WorkerContext {
    /// Main function run by this thread: pop tasks until the queue is closed
    /// and drained.
    fn run(&self) {
        loop {
            let task = {
                let mut guard = self.queue.wait_while(|queue| queue.tasks.is_empty() && queue.open);
                match guard.tasks.pop_front() {
                    Some(task) => task,
                    // Closed and drained.
                    None => break,
                }
            };
            log_debug!("[worker {}] Picked up a task.", self.id);

            let Task { job, latch } = task;
            let outcome = match catch_unwind(AssertUnwindSafe(job)) {
                Ok(()) => TaskOutcome::Completed,
                Err(_) => {
                    log_error!("[worker {}] A task panicked; failing its batch.", self.id);
                    TaskOutcome::Panicked
                }
            };
            latch.record(outcome);
        }
        log_debug!("[worker {}] Queue closed, exiting.", self.id);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn zero_threads_is_rejected() {
        assert!(matches!(
            ThreadPoolBuilder { num_threads: 0 }.build(),
            Err(Error::InvalidThreadCount)
        ));
    }

    #[test]
    fn num_threads_reports_the_spawned_count() {
        let pool = ThreadPoolBuilder { num_threads: 3 }.build().unwrap();
        assert_eq!(pool.num_threads(), 3);
    }

    #[test]
    fn batch_results_are_in_submission_order() {
        let pool = ThreadPoolBuilder { num_threads: 4 }.build().unwrap();
        let squares = pool
            .submit_batch((0..100).map(|i| move || i * i).collect())
            .unwrap();
        assert_eq!(squares, (0..100).map(|i| i * i).collect::<Vec<_>>());
    }

    #[test]
    fn empty_batch_returns_immediately() {
        let pool = ThreadPoolBuilder { num_threads: 2 }.build().unwrap();
        let results: Vec<i32> = pool.submit_batch(Vec::<fn() -> i32>::new()).unwrap();
        assert_eq!(results, Vec::<i32>::new());
    }

    #[test]
    fn tasks_may_borrow_from_the_submitting_frame() {
        let pool = ThreadPoolBuilder { num_threads: 2 }.build().unwrap();
        let data = vec![1, 2, 3, 4, 5];
        let tripled = pool.map(|x| x * 3, &data).unwrap();
        assert_eq!(tripled, vec![3, 6, 9, 12, 15]);
    }

    #[test]
    fn concurrent_batches_complete_independently() {
        let pool = ThreadPoolBuilder { num_threads: 4 }.build().unwrap();
        std::thread::scope(|scope| {
            for _ in 0..10 {
                let pool = &pool;
                scope.spawn(move || {
                    let counter = AtomicUsize::new(0);
                    let counter = &counter;
                    let results = pool
                        .submit_batch(
                            (0..5)
                                .map(|i| {
                                    move || {
                                        counter.fetch_add(1, Ordering::SeqCst);
                                        i
                                    }
                                })
                                .collect(),
                        )
                        .unwrap();
                    // This batch's caller is unblocked only once its own 5
                    // tasks have run, whatever the other batches are doing.
                    assert_eq!(counter.load(Ordering::SeqCst), 5);
                    assert_eq!(results, vec![0, 1, 2, 3, 4]);
                });
            }
        });
    }

    #[test]
    fn submit_after_shutdown_is_rejected() {
        let pool = ThreadPoolBuilder { num_threads: 2 }.build().unwrap();
        pool.shutdown();
        let result = pool.submit_batch((0..3).map(|i| move || i).collect());
        assert_eq!(result, Err(Error::PoolShutDown));
    }

    #[test]
    fn shutdown_is_idempotent() {
        let pool = ThreadPoolBuilder { num_threads: 2 }.build().unwrap();
        pool.shutdown();
        pool.shutdown();
    }

    #[test]
    fn task_panic_fails_the_batch_but_not_the_pool() {
        let pool = ThreadPoolBuilder { num_threads: 2 }.build().unwrap();

        let result = pool.submit_batch(
            (0..4)
                .map(|i| {
                    move || {
                        if i == 2 {
                            panic!("intentional test panic");
                        }
                        i
                    }
                })
                .collect(),
        );
        assert_eq!(result, Err(Error::TaskPanicked));

        // The worker survived the panic; the pool is still usable.
        let doubled = pool
            .submit_batch((0..4).map(|i| move || i * 2).collect())
            .unwrap();
        assert_eq!(doubled, vec![0, 2, 4, 6]);
    }

    #[test]
    fn shutdown_abandons_tasks_not_yet_picked_up() {
        let pool = ThreadPoolBuilder { num_threads: 1 }.build().unwrap();
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();

        std::thread::scope(|scope| {
            let pool = &pool;
            let submitter = scope.spawn(move || {
                let first = move || {
                    started_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                    1
                };
                let second = move || 2;
                pool.submit_batch(vec![
                    Box::new(first) as Box<dyn FnOnce() -> i32 + Send>,
                    Box::new(second),
                ])
            });

            // The single worker is now inside the first task; the second is
            // still queued.
            started_rx.recv().unwrap();
            let shutdown = scope.spawn(|| pool.shutdown());
            // Give the shutdown call time to drain the queue before the
            // worker becomes free again.
            std::thread::sleep(Duration::from_millis(200));
            release_tx.send(()).unwrap();

            assert_eq!(submitter.join().unwrap(), Err(Error::Interrupted));
            shutdown.join().unwrap();
        });
    }
}
