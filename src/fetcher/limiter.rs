//! Process-wide limiter for traffic toward the video platform.
//!
//! All workers share one limiter: a global concurrency cap plus a minimum
//! spacing between request starts, to stay under upstream anti-automation
//! thresholds. The limiter is an explicitly passed object, not ambient
//! state; there is no per-user dimension here.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

/// Limiter knobs.
#[derive(Debug, Clone)]
pub struct LimiterSettings {
    /// Maximum simultaneous upstream requests across the whole process.
    pub max_concurrent: usize,
    /// Minimum delay between consecutive request starts.
    pub min_spacing_ms: u64,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            min_spacing_ms: 1500,
        }
    }
}

/// Held for the duration of one upstream request.
pub struct UpstreamPermit {
    _permit: OwnedSemaphorePermit,
}

/// Shared concurrency cap + spacing gate.
pub struct UpstreamLimiter {
    semaphore: Arc<Semaphore>,
    min_spacing: Duration,
    next_slot: Mutex<Instant>,
}

impl UpstreamLimiter {
    pub fn new(settings: LimiterSettings) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(settings.max_concurrent)),
            min_spacing: Duration::from_millis(settings.min_spacing_ms),
            next_slot: Mutex::new(Instant::now()),
        }
    }

    /// Wait for a concurrency slot and for the next start window, then
    /// return a permit. Drop the permit when the upstream request is done.
    pub async fn acquire(&self) -> UpstreamPermit {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("limiter semaphore closed");

        let wait = {
            let mut next_slot = self.next_slot.lock().await;
            let now = Instant::now();
            let wait = next_slot.saturating_duration_since(now);
            *next_slot = now.max(*next_slot) + self.min_spacing;
            wait
        };

        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }

        UpstreamPermit { _permit: permit }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_spacing_between_starts() {
        let limiter = UpstreamLimiter::new(LimiterSettings {
            max_concurrent: 10,
            min_spacing_ms: 1000,
        });

        let start = Instant::now();
        let _a = limiter.acquire().await;
        let _b = limiter.acquire().await;
        let _c = limiter.acquire().await;

        // Third start happens no earlier than two spacing intervals in.
        assert!(start.elapsed() >= Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_cap_blocks() {
        let limiter = Arc::new(UpstreamLimiter::new(LimiterSettings {
            max_concurrent: 2,
            min_spacing_ms: 0,
        }));

        let _a = limiter.acquire().await;
        let b = limiter.acquire().await;

        // Both slots taken: the third acquire must pend until one is freed.
        let third = tokio::time::timeout(Duration::from_secs(1), limiter.acquire()).await;
        assert!(third.is_err());

        drop(b);
        let third = tokio::time::timeout(Duration::from_secs(1), limiter.acquire()).await;
        assert!(third.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_spacing_does_not_wait() {
        let limiter = UpstreamLimiter::new(LimiterSettings {
            max_concurrent: 1,
            min_spacing_ms: 0,
        });

        let start = Instant::now();
        drop(limiter.acquire().await);
        drop(limiter.acquire().await);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
