//! Fork-join scheduling for the read pipeline: a thread pool with graceful
//! synchronous fallback, data-parallel iteration helpers, and a parallel
//! stable sort.

pub mod data_parallel;
pub mod sort;
pub mod thread_pool;

pub use thread_pool::{JoinHandle, Scope, ScopedJoinHandle, ThreadPool};
