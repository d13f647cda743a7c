//! Process-wide spacing of outbound requests.
//!
//! Callers are admitted one at a time in arrival order; each admission waits
//! on a single-cell GCRA quota so two admitted operations never start closer
//! together than the configured interval.

use std::future::Future;
use std::time::{Duration, Instant};

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter as Gcra};
use tokio::sync::Mutex;

pub struct RateLimiter {
    gcra: Option<DefaultDirectRateLimiter>,
    // tokio's Mutex hands out the lock in FIFO order; holds the last admission
    queue: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl RateLimiter {
    /// A zero interval disables spacing entirely.
    pub fn new(min_interval: Duration) -> Self {
        let gcra = Quota::with_period(min_interval).map(Gcra::direct);
        Self {
            gcra,
            queue: Mutex::new(None),
            min_interval,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait for this caller's turn, then run `operation` and return its
    /// output unchanged.
    pub async fn schedule<F, T>(&self, operation: F) -> T
    where
        F: Future<Output = T>,
    {
        {
            let mut last = self.queue.lock().await;
            if let Some(gcra) = &self.gcra {
                gcra.until_ready().await;
                // governor runs on its own clock; hold the gap on std's as well
                if let Some(due) = last.map(|prev| prev + self.min_interval) {
                    let now = Instant::now();
                    if now < due {
                        tokio::time::sleep(due - now).await;
                    }
                }
            }
            *last = Some(Instant::now());
        }
        operation.await
    }
}
