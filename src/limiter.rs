//! Bounded-concurrency task admission.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::error::ConfigError;

/// Admits at most `limit` tasks at a time.
///
/// Tokio's semaphore is fair, so waiting tasks are admitted in the order they
/// called [`Limiter::run`]. A task that fails only fails for its own caller.
#[derive(Clone, Debug)]
pub struct Limiter {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

impl Limiter {
    pub fn new(limit: usize) -> Result<Self, ConfigError> {
        if limit == 0 {
            return Err(ConfigError::InvalidConcurrency);
        }
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
        })
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Wait for a slot, run `task` to completion, then release the slot
    pub async fn run<F, T>(&self, task: F) -> T
    where
        F: Future<Output = T>,
    {
        // The semaphore is never closed, so acquire only waits
        let _permit = self.semaphore.acquire().await;
        task.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[test]
    fn test_zero_limit_rejected() {
        assert_eq!(Limiter::new(0).unwrap_err(), ConfigError::InvalidConcurrency);
        assert_eq!(Limiter::new(2).unwrap().limit(), 2);
    }

    #[tokio::test]
    async fn test_never_exceeds_limit() {
        let limiter = &Limiter::new(2).unwrap();
        let active = &AtomicUsize::new(0);
        let peak = &AtomicUsize::new(0);

        let tasks = (0..6).map(move |_| {
            limiter.run(async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            })
        });
        join_all(tasks).await;

        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_admission_is_fifo() {
        let limiter = Limiter::new(1).unwrap();
        let order = Mutex::new(Vec::new());

        let tasks = (0..5).map(|i| {
            let limiter = &limiter;
            let order = &order;
            async move {
                limiter
                    .run(async move {
                        order.lock().unwrap().push(i);
                        tokio::time::sleep(Duration::from_millis(1)).await;
                    })
                    .await
            }
        });
        join_all(tasks).await;

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_failure_does_not_affect_siblings() {
        let limiter = &Limiter::new(1).unwrap();

        let results: Vec<Result<u32, String>> = join_all((0..3).map(move |i| {
            limiter.run(async move {
                if i == 1 {
                    Err("boom".to_string())
                } else {
                    Ok(i)
                }
            })
        }))
        .await;

        assert_eq!(results, vec![Ok(0), Err("boom".to_string()), Ok(2)]);
    }
}
