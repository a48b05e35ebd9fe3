//! Per-source request gating: a concurrency cap plus a minimum spacing between request starts

use std::time::Duration;

use tokio::sync::{Mutex, Semaphore, SemaphorePermit};
use tokio::time::{sleep_until, Instant};
use tracing::debug;

use crate::error::SourceError;

/// Bounds in-flight requests and paces request starts for one source
#[derive(Debug)]
pub struct RequestGate {
    permits: Semaphore,
    max_concurrent: usize,
    min_interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RequestGate {
    pub fn new(max_concurrent: usize, min_interval: Duration) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            permits: Semaphore::new(max_concurrent),
            max_concurrent,
            min_interval,
            next_slot: Mutex::new(None),
        }
    }

    /// Wait for a concurrency permit and then for the next free start slot.
    ///
    /// The returned permit must be held for the duration of the request.
    pub async fn acquire(&self) -> Result<SemaphorePermit<'_>, SourceError> {
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| SourceError::TaskAborted("request gate closed".to_string()))?;

        let slot = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = match *next {
                Some(reserved) if reserved > now => reserved,
                _ => now,
            };
            *next = Some(slot + self.min_interval);
            slot
        };

        if slot > Instant::now() {
            debug!(wait_ms = (slot - Instant::now()).as_millis() as u64, "Pacing upstream request");
            sleep_until(slot).await;
        }

        Ok(permit)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_request_starts_are_spaced() {
        let gate = RequestGate::new(4, Duration::from_millis(100));
        let started = Instant::now();

        let mut starts = Vec::new();
        for _ in 0..3 {
            let _permit = gate.acquire().await.unwrap();
            starts.push(Instant::now() - started);
        }

        assert_eq!(starts[0], Duration::ZERO);
        assert!(starts[1] >= Duration::from_millis(100));
        assert!(starts[2] >= Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_capped() {
        let gate = Arc::new(RequestGate::new(2, Duration::ZERO));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..6 {
            let gate = Arc::clone(&gate);
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            tasks.push(tokio::spawn(async move {
                let _permit = gate.acquire().await.unwrap();
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(gate.available_permits(), 2);
    }

    #[test]
    fn test_zero_cap_is_clamped() {
        let gate = RequestGate::new(0, Duration::ZERO);
        assert_eq!(gate.max_concurrent(), 1);
    }
}
