// Copyright 2025 the Blockfold authors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Splitting an index range into contiguous, balanced blocks.

use crate::error::Error;
use std::ops::Range;

/// Splits the index range `0..len` into at most `num_threads` contiguous
/// blocks of near-equal size.
///
/// The blocks are pairwise disjoint, cover `0..len` exactly once, are emitted
/// in index order, and no block holds more than one element more than any
/// other. When `len < num_threads`, one singleton block is produced per
/// element; when `len == 0`, no blocks are produced.
///
/// The partition depends only on `len` and `num_threads`, never on
/// scheduling.
///
/// ```
/// use blockfold::partition;
///
/// let blocks = partition(8, 3).unwrap();
/// assert_eq!(blocks, vec![0..3, 3..6, 6..8]);
/// ```
///
/// # Errors
///
/// Returns [`Error::InvalidThreadCount`] if `num_threads` is zero.
pub fn partition(len: usize, num_threads: usize) -> Result<Vec<Range<usize>>, Error> {
    if num_threads == 0 {
        return Err(Error::InvalidThreadCount);
    }
    if len == 0 {
        return Ok(Vec::new());
    }

    let num_blocks = num_threads.min(len);
    let block = len / num_blocks;
    let residue = len % num_blocks;

    // The first `residue` blocks absorb the remainder, one element each.
    let mut blocks = Vec::with_capacity(num_blocks);
    let mut start = 0;
    for i in 0..num_blocks {
        let end = start + block + usize::from(i < residue);
        blocks.push(start..end);
        start = end;
    }
    Ok(blocks)
}
