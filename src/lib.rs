// Copyright 2025 the Blockfold authors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

#![doc = include_str!("../README.md")]
#![forbid(missing_docs)]

mod error;
mod macros;
mod partition;
mod reduce;
mod sync;
mod thread_pool;

pub use error::Error;
pub use partition::partition;
pub use reduce::BlockReducer;
pub use thread_pool::{ThreadPool, ThreadPoolBuilder};
