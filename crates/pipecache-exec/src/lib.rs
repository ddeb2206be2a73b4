#![warn(missing_docs)]

//! pipecache execution harness: bounded parallel work runner and retry executor.
//!
//! Both the deduplicating transfer sessions and the fingerprint evaluator schedule
//! their per-file work through [`run_bounded`], and transfer sessions wrap whole
//! operations in a [`RetryExecutor`].

pub mod bounded;
pub mod retry;

pub use bounded::{default_parallelism, run_bounded, BoundedError, BoundedOptions};
pub use retry::{RetryConfig, RetryExecutor, RetryOn, RetryOutcome, Retryable};
pub use tokio_util::sync::CancellationToken;
