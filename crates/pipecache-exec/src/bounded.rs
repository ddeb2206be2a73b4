//! Bounded-concurrency work runner.
//!
//! Items are fed through a bounded channel to a fixed pool of worker tasks, so
//! scheduling millions of small items never fans out beyond `bounded_capacity`
//! queued items plus `max_degree_of_parallelism` in-flight ones. Every scheduled
//! item runs to completion; failures are collected and reported together.

use std::any::Any;
use std::fmt::Debug;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Parallelism and queue limits for [`run_bounded`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundedOptions {
    /// Number of worker tasks pulling from the queue.
    pub max_degree_of_parallelism: usize,
    /// Number of items that may wait in the queue ahead of the workers.
    pub bounded_capacity: usize,
}

impl BoundedOptions {
    /// Create options; both limits are clamped to at least 1.
    pub fn new(max_degree_of_parallelism: usize, bounded_capacity: usize) -> Self {
        Self {
            max_degree_of_parallelism: max_degree_of_parallelism.max(1),
            bounded_capacity: bounded_capacity.max(1),
        }
    }

    /// Options sized to the host: one worker per available core.
    pub fn for_host() -> Self {
        let cores = default_parallelism();
        Self::new(cores, cores * 2)
    }
}

impl Default for BoundedOptions {
    fn default() -> Self {
        Self::for_host()
    }
}

/// Number of cores the process may use, or 1 if it cannot be determined.
pub fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Failure of a bounded run.
#[derive(Debug, Error)]
pub enum BoundedError<E: Debug> {
    /// The cancellation token fired; remaining items were not scheduled.
    #[error("bounded run cancelled after {completed} completed work items")]
    Cancelled {
        /// Items that finished before cancellation was observed.
        completed: usize,
    },
    /// One or more items failed. Every scheduled item was still run.
    #[error("{failed} of {attempted} work items failed")]
    Failed {
        /// Items that were run.
        attempted: usize,
        /// Items that returned an error.
        failed: usize,
        /// The underlying errors, in input order.
        errors: Vec<E>,
    },
    /// A worker panicked while processing an item.
    #[error("work item {index} panicked: {message}")]
    Panicked {
        /// Input position of the item.
        index: usize,
        /// Panic payload, if it was a string.
        message: String,
    },
}

impl<E: Debug> BoundedError<E> {
    /// True if the run ended because of cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, BoundedError::Cancelled { .. })
    }

    /// Underlying item errors, empty for cancellation and panics.
    pub fn errors(&self) -> &[E] {
        match self {
            BoundedError::Failed { errors, .. } => errors,
            _ => &[],
        }
    }
}

enum ItemResult<R, E> {
    Done(R),
    Failed(E),
    Panicked(String),
}

/// Run `worker` over `items` with bounded parallelism and a bounded queue.
///
/// Results come back in input order. If the token is cancelled, no further items
/// are enqueued, in-flight items finish (they may observe the token themselves),
/// and the run returns [`BoundedError::Cancelled`].
pub async fn run_bounded<I, T, R, E, F, Fut>(
    items: I,
    options: BoundedOptions,
    worker: F,
    cancel: &CancellationToken,
) -> Result<Vec<R>, BoundedError<E>>
where
    I: IntoIterator<Item = T>,
    I::IntoIter: Send,
    T: Send + 'static,
    R: Send + 'static,
    E: Debug + Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
{
    let options = BoundedOptions::new(options.max_degree_of_parallelism, options.bounded_capacity);
    let (tx, rx) = mpsc::channel::<(usize, T)>(options.bounded_capacity);
    let rx = Arc::new(Mutex::new(rx));
    let worker = Arc::new(worker);

    let mut workers = JoinSet::new();
    for _ in 0..options.max_degree_of_parallelism {
        let rx = Arc::clone(&rx);
        let worker = Arc::clone(&worker);
        let cancel = cancel.clone();
        workers.spawn(async move {
            let mut finished = Vec::new();
            loop {
                let next = { rx.lock().await.recv().await };
                let Some((index, item)) = next else { break };
                if cancel.is_cancelled() {
                    break;
                }
                let outcome = AssertUnwindSafe(worker(item)).catch_unwind().await;
                let result = match outcome {
                    Ok(Ok(value)) => ItemResult::Done(value),
                    Ok(Err(e)) => ItemResult::Failed(e),
                    Err(payload) => ItemResult::Panicked(panic_message(payload)),
                };
                finished.push((index, result));
            }
            finished
        });
    }

    let producer_cancel = cancel.clone();
    let source = items.into_iter().enumerate();
    let producer = async move {
        let mut enqueued = 0usize;
        for (index, item) in source {
            tokio::select! {
                biased;
                _ = producer_cancel.cancelled() => break,
                sent = tx.send((index, item)) => {
                    if sent.is_err() {
                        break;
                    }
                    enqueued += 1;
                }
            }
        }
        enqueued
    };

    let collector = async {
        let mut finished = Vec::new();
        let mut join_failure = None;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(batch) => finished.extend(batch),
                Err(e) => join_failure = Some(e.to_string()),
            }
        }
        (finished, join_failure)
    };

    let (enqueued, (mut finished, join_failure)) = tokio::join!(producer, collector);
    finished.sort_by_key(|(index, _)| *index);
    debug!(enqueued, completed = finished.len(), "bounded run finished");

    if let Some(message) = join_failure {
        return Err(BoundedError::Panicked {
            index: finished.len(),
            message,
        });
    }
    if cancel.is_cancelled() {
        return Err(BoundedError::Cancelled {
            completed: finished.len(),
        });
    }

    let attempted = finished.len();
    let mut results = Vec::with_capacity(attempted);
    let mut errors = Vec::new();
    for (index, result) in finished {
        match result {
            ItemResult::Done(value) => results.push(value),
            ItemResult::Failed(e) => errors.push(e),
            ItemResult::Panicked(message) => return Err(BoundedError::Panicked { index, message }),
        }
    }

    if errors.is_empty() {
        Ok(results)
    } else {
        Err(BoundedError::Failed {
            attempted,
            failed: errors.len(),
            errors,
        })
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
