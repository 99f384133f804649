use std::{future::Future, sync::Arc, time::Duration};

use tokio::{
    sync::{Mutex, Semaphore},
    time::{sleep_until, Instant},
};
use tracing::debug;

use crate::error::AppError;

/// Spaces calls at least `interval` apart and runs them one at a time.
///
/// Callers beyond the running one wait in FIFO order; at most `queue_bound` may wait,
/// anyone past that is turned away with [`AppError::RateLimited`].
#[derive(Clone)]
pub struct GeocodeThrottle {
    inner: Arc<Inner>,
}

struct Inner {
    interval: Duration,
    queue_bound: usize,
    slots: Semaphore,
    last_call: Mutex<Option<Instant>>,
}

impl GeocodeThrottle {
    pub fn new(interval: Duration, queue_bound: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                interval,
                queue_bound,
                // one in flight plus the waiting room
                slots: Semaphore::new(queue_bound + 1),
                last_call: Mutex::new(None),
            }),
        }
    }

    pub async fn run<F, Fut, T>(&self, call: F) -> Result<T, AppError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let _slot = self.inner.slots.try_acquire().map_err(|_| {
            AppError::RateLimited(format!(
                "geocoding queue is full ({} waiting)",
                self.inner.queue_bound
            ))
        })?;

        let mut last_call = self.inner.last_call.lock().await;
        if let Some(previous) = *last_call {
            let ready_at = previous + self.inner.interval;
            if ready_at > Instant::now() {
                debug!(
                    wait_ms = (ready_at - Instant::now()).as_millis() as u64,
                    "delaying geocode request"
                );
                sleep_until(ready_at).await;
            }
        }
        *last_call = Some(Instant::now());
        call().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn bursts_are_spaced_by_the_interval() {
        let throttle = GeocodeThrottle::new(Duration::from_secs(1), 8);
        let seen = Arc::new(StdMutex::new(Vec::new()));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let throttle = throttle.clone();
            let seen = seen.clone();
            handles.push(tokio::spawn(async move {
                throttle
                    .run(|| async {
                        seen.lock().unwrap().push(Instant::now());
                        Ok::<_, AppError>(())
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 4);
        for pair in seen.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(1));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn first_call_is_not_delayed() {
        let throttle = GeocodeThrottle::new(Duration::from_secs(1), 8);
        let start = Instant::now();
        throttle.run(|| async { Ok::<_, AppError>(()) }).await.unwrap();
        assert_eq!(Instant::now(), start);
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_callers_beyond_the_queue_bound() {
        let throttle = GeocodeThrottle::new(Duration::from_secs(1), 1);
        throttle.run(|| async { Ok::<_, AppError>(()) }).await.unwrap();

        let mut waiting = Vec::new();
        for _ in 0..2 {
            let throttle = throttle.clone();
            waiting.push(tokio::spawn(async move {
                throttle.run(|| async { Ok::<_, AppError>(()) }).await
            }));
        }
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }

        let err = throttle
            .run(|| async { Ok::<_, AppError>(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::RateLimited(_)));

        for handle in waiting {
            handle.await.unwrap().unwrap();
        }
    }
}
