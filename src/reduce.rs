// Copyright 2025 the Blockfold authors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Blockwise aggregation operations over slices, with two interchangeable
//! execution strategies.

use crate::error::Error;
use crate::macros::log_debug;
use crate::partition::partition;
use crate::thread_pool::ThreadPool;
use std::cmp::Ordering;

/// Computes scalar aggregates over slices by reducing contiguous blocks in
/// parallel, then reducing the per-block results with the same operation.
///
/// The two-phase reduce is exact for the operations exposed here because
/// every combiner involved (max, min, AND, OR) is associative and
/// commutative. Any operation added to this skeleton must supply an
/// aggregator/combiner pair with the same property.
///
/// A reducer built with [`new()`](Self::new) spawns its own scoped threads on
/// every call; one built with [`with_pool()`](Self::with_pool) submits all
/// per-block tasks as a single batch to the given pool.
///
/// ```
/// # use blockfold::BlockReducer;
/// let reducer = BlockReducer::new();
/// let values = [3, 1, 4, 1, 5, 9, 2, 6];
/// assert_eq!(reducer.maximum(3, &values, Ord::cmp), Ok(&9));
/// assert_eq!(reducer.minimum(3, &values, Ord::cmp), Ok(&1));
/// ```
pub struct BlockReducer<'pool> {
    executor: Executor<'pool>,
}

/// Execution strategy for the per-block tasks, selected at construction.
#[derive(Clone, Copy)]
enum Executor<'pool> {
    /// One freshly spawned scoped thread per block, all joined before the
    /// call returns. No state is shared across calls.
    Spawn,
    /// All per-block tasks submitted as one batch to a shared pool.
    Pool(&'pool ThreadPool),
}

impl<'pool> BlockReducer<'pool> {
    /// Creates a standalone reducer that spawns one ephemeral thread per
    /// block on every call.
    pub fn new() -> Self {
        Self {
            executor: Executor::Spawn,
        }
    }

    /// Creates a reducer that runs its per-block tasks on the given pool,
    /// blocking on the batch's completion instead of joining threads.
    pub fn with_pool(pool: &'pool ThreadPool) -> Self {
        Self {
            executor: Executor::Pool(pool),
        }
    }

    /// Returns the greatest element of `values` by the comparator, keeping
    /// the last of equal maxima.
    ///
    /// At most `num_threads` blocks are aggregated in parallel.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidThreadCount`] if `num_threads` is zero, before any
    ///   work is dispatched.
    /// - [`Error::EmptySequence`] if `values` is empty.
    /// - [`Error::Interrupted`], [`Error::TaskPanicked`] or
    ///   [`Error::PoolShutDown`] propagated from a pooled dispatch.
    pub fn maximum<'data, T: Sync>(
        &self,
        num_threads: usize,
        values: &'data [T],
        compare: impl Fn(&T, &T) -> Ordering + Sync,
    ) -> Result<&'data T, Error> {
        if num_threads == 0 {
            return Err(Error::InvalidThreadCount);
        }
        if values.is_empty() {
            return Err(Error::EmptySequence);
        }
        let compare = &compare;
        self.reduce_blocks(
            num_threads,
            values,
            move |block| greatest_by(block.iter(), compare),
            move |partials| greatest_by(partials.into_iter(), compare),
        )
    }

    /// Returns the smallest element of `values` by the comparator, keeping
    /// the first of equal minima.
    ///
    /// # Errors
    ///
    /// Same as [`maximum()`](Self::maximum).
    pub fn minimum<'data, T: Sync>(
        &self,
        num_threads: usize,
        values: &'data [T],
        compare: impl Fn(&T, &T) -> Ordering + Sync,
    ) -> Result<&'data T, Error> {
        if num_threads == 0 {
            return Err(Error::InvalidThreadCount);
        }
        if values.is_empty() {
            return Err(Error::EmptySequence);
        }
        let compare = &compare;
        self.reduce_blocks(
            num_threads,
            values,
            move |block| smallest_by(block.iter(), compare),
            move |partials| smallest_by(partials.into_iter(), compare),
        )
    }

    /// Returns whether every element of `values` satisfies the predicate, or
    /// `true` if `values` is empty.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidThreadCount`] if `num_threads` is zero.
    /// - [`Error::Interrupted`], [`Error::TaskPanicked`] or
    ///   [`Error::PoolShutDown`] propagated from a pooled dispatch.
    pub fn all<T: Sync>(
        &self,
        num_threads: usize,
        values: &[T],
        predicate: impl Fn(&T) -> bool + Sync,
    ) -> Result<bool, Error> {
        let predicate = &predicate;
        self.reduce_blocks(
            num_threads,
            values,
            move |block| block.iter().all(predicate),
            move |partials| partials.into_iter().all(|holds| holds),
        )
    }

    /// Returns whether any element of `values` satisfies the predicate, or
    /// `false` if `values` is empty.
    ///
    /// # Errors
    ///
    /// Same as [`all()`](Self::all).
    pub fn any<T: Sync>(
        &self,
        num_threads: usize,
        values: &[T],
        predicate: impl Fn(&T) -> bool + Sync,
    ) -> Result<bool, Error> {
        let predicate = &predicate;
        self.reduce_blocks(
            num_threads,
            values,
            move |block| block.iter().any(predicate),
            move |partials| partials.into_iter().any(|holds| holds),
        )
    }

    /// Common skeleton of all aggregation operations: partition `values`
    /// into blocks, compute `map` on every block via the selected execution
    /// strategy, and combine the per-block results with `fold`, in ascending
    /// block order.
    fn reduce_blocks<'data, T, R>(
        &self,
        num_threads: usize,
        values: &'data [T],
        map: impl Fn(&'data [T]) -> R + Sync,
        fold: impl FnOnce(Vec<R>) -> R,
    ) -> Result<R, Error>
    where
        T: Sync,
        R: Send,
    {
        let blocks = partition(values.len(), num_threads)?;
        log_debug!("[reducer] Dispatching {} blocks.", blocks.len());

        let partials = match self.executor {
            Executor::Spawn => std::thread::scope(|scope| {
                let handles = blocks
                    .iter()
                    .map(|block| {
                        let slice = &values[block.clone()];
                        let map = &map;
                        scope.spawn(move || map(slice))
                    })
                    .collect::<Vec<_>>();
                // Join everything before reporting, so that a panicked block
                // cannot leave threads running past the call.
                let joined = handles
                    .into_iter()
                    .map(|handle| handle.join())
                    .collect::<Vec<_>>();
                joined
                    .into_iter()
                    .map(|result| result.map_err(|_| Error::TaskPanicked))
                    .collect::<Result<Vec<R>, Error>>()
            })?,
            Executor::Pool(pool) => {
                let map = &map;
                pool.submit_batch(
                    blocks
                        .iter()
                        .map(|block| {
                            let slice = &values[block.clone()];
                            move || map(slice)
                        })
                        .collect(),
                )?
            }
        };

        Ok(fold(partials))
    }
}

impl Default for BlockReducer<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// Picks the greatest item by the comparator, keeping the last of equal
/// maxima. Used both per block and across the per-block results.
fn greatest_by<'a, T>(
    items: impl Iterator<Item = &'a T>,
    compare: impl Fn(&T, &T) -> Ordering,
) -> &'a T {
    items
        .max_by(|a, b| compare(*a, *b))
        .expect("the partitioner never emits an empty block")
}

/// Picks the smallest item by the comparator, keeping the first of equal
/// minima.
fn smallest_by<'a, T>(
    items: impl Iterator<Item = &'a T>,
    compare: impl Fn(&T, &T) -> Ordering,
) -> &'a T {
    items
        .min_by(|a, b| compare(*a, *b))
        .expect("the partitioner never emits an empty block")
}
