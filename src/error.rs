// Copyright 2025 the Blockfold authors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Errors surfaced by the partitioner, the thread pool and the reducer.

use thiserror::Error;

/// Errors returned by pool construction, batch submission and the aggregation
/// operations.
///
/// All errors are surfaced synchronously to the caller of the operation that
/// triggered them; nothing is retried internally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// The requested number of threads was zero. Reported before any thread
    /// is spawned or any task is dispatched.
    #[error("thread count must be at least 1")]
    InvalidThreadCount,

    /// [`maximum`](crate::BlockReducer::maximum) or
    /// [`minimum`](crate::BlockReducer::minimum) was called on an empty
    /// slice, for which no result exists.
    #[error("cannot reduce an empty sequence")]
    EmptySequence,

    /// The batch was broken off by a concurrent
    /// [`shutdown()`](crate::ThreadPool::shutdown): at least one of its tasks
    /// was abandoned before a worker picked it up. Any partial results are
    /// discarded.
    #[error("batch interrupted by thread pool shutdown")]
    Interrupted,

    /// A worker thread panicked while running one of the batch's tasks. The
    /// worker survives and the pool stays usable; the batch's results are
    /// discarded.
    #[error("a worker thread panicked while running a task")]
    TaskPanicked,

    /// The batch was submitted to a pool that is already shutting down or
    /// shut down. Nothing was enqueued.
    #[error("thread pool is already shut down")]
    PoolShutDown,
}
