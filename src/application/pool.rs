//! Bounded concurrency pool.
//!
//! Runs a batch of futures with at most `limit` in flight at once and
//! returns one settlement per task, in input order. A failing or panicking
//! task never aborts the batch.

use std::any::Any;
use std::future::Future;
use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;

use futures::{FutureExt, StreamExt, stream};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TaskError<E> {
    #[error("task failed: {0}")]
    Failed(E),
    #[error("task panicked: {0}")]
    Panicked(String),
}

impl<E> TaskError<E> {
    pub fn into_failure(self) -> Option<E> {
        match self {
            TaskError::Failed(error) => Some(error),
            TaskError::Panicked(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BoundedPool {
    limit: NonZeroUsize,
}

impl BoundedPool {
    /// A limit of zero is clamped to one.
    pub fn new(limit: usize) -> Self {
        Self {
            limit: NonZeroUsize::new(limit).unwrap_or(NonZeroUsize::MIN),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit.get()
    }

    pub async fn run<I, F, T, E>(&self, tasks: I) -> Vec<Result<T, TaskError<E>>>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = Result<T, E>>,
    {
        let tasks: Vec<F> = tasks.into_iter().collect();
        let total = tasks.len();
        debug!(total, limit = self.limit.get(), "pool batch started");

        let mut settled: Vec<(usize, Result<T, TaskError<E>>)> = stream::iter(
            tasks.into_iter().enumerate().map(|(index, task)| async move {
                let outcome = match AssertUnwindSafe(task).catch_unwind().await {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(error)) => Err(TaskError::Failed(error)),
                    Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        warn!(task_index = index, panic = %message, "pool task panicked");
                        Err(TaskError::Panicked(message))
                    }
                };
                (index, outcome)
            }),
        )
        .buffer_unordered(self.limit.get())
        .collect()
        .await;

        settled.sort_by_key(|(index, _)| *index);
        settled.into_iter().map(|(_, outcome)| outcome).collect()
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_limit_and_preserves_order() {
        let pool = BoundedPool::new(3);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks = (0..10u64).map(|i| {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                // Later tasks finish first to shake up completion order.
                tokio::time::sleep(Duration::from_millis(100 - i * 7)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                if i == 4 {
                    Err(format!("task {i} failed"))
                } else {
                    Ok(i)
                }
            }
        });

        let results = pool.run(tasks).await;

        assert_eq!(results.len(), 10);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(peak.load(Ordering::SeqCst), 3);
        for (i, result) in results.iter().enumerate() {
            if i == 4 {
                assert_eq!(result, &Err(TaskError::Failed("task 4 failed".to_string())));
            } else {
                assert_eq!(result, &Ok(i as u64));
            }
        }
    }

    async fn explode() -> Result<u8, String> {
        panic!("renderer exploded")
    }

    #[tokio::test]
    async fn panics_are_captured_per_task() {
        let pool = BoundedPool::new(2);
        let tasks: Vec<futures::future::BoxFuture<'static, Result<u8, String>>> = vec![
            async { Ok(1) }.boxed(),
            explode().boxed(),
            async { Ok(3) }.boxed(),
        ];

        let results = pool.run(tasks).await;
        assert_eq!(results[0], Ok(1));
        assert_eq!(
            results[1],
            Err(TaskError::Panicked("renderer exploded".to_string()))
        );
        assert_eq!(results[2], Ok(3));
    }

    #[tokio::test]
    async fn zero_limit_is_clamped_and_empty_batch_is_fine() {
        let pool = BoundedPool::new(0);
        assert_eq!(pool.limit(), 1);
        let results = pool
            .run(Vec::<futures::future::Ready<Result<(), ()>>>::new())
            .await;
        assert!(results.is_empty());
    }
}
