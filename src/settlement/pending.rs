use std::collections::VecDeque;
use tokio::task::JoinHandle;

use crate::error::AppResult;

/// Bounded set of sent-but-unverified transactions.
///
/// Each entry is the verification task of one sent transaction, keyed by its
/// nonce. Entries are drained oldest first, so a failure always surfaces for
/// the lowest outstanding nonce. Dropping the window aborts whatever is left.
pub struct PendingWindow<T> {
    capacity: usize,
    in_flight: VecDeque<(u64, JoinHandle<AppResult<T>>)>,
}

impl<T> PendingWindow<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            in_flight: VecDeque::with_capacity(capacity),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.in_flight.len() >= self.capacity
    }

    /// Track a verification task. The caller drains first when the window is full.
    pub fn enqueue(&mut self, nonce: u64, verification: JoinHandle<AppResult<T>>) {
        debug_assert!(!self.is_full(), "pending window over capacity");
        self.in_flight.push_back((nonce, verification));
    }

    /// Wait for the oldest verification. `None` when nothing is in flight.
    pub async fn drain_one(&mut self) -> AppResult<Option<(u64, T)>> {
        let Some((nonce, verification)) = self.in_flight.pop_front() else {
            return Ok(None);
        };
        let verified = verification.await??;
        Ok(Some((nonce, verified)))
    }
}

impl<T> Drop for PendingWindow<T> {
    fn drop(&mut self) {
        for (_, verification) in &self.in_flight {
            verification.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_drains_oldest_first() {
        let mut window = PendingWindow::new(3);
        // later nonces finish first
        for (nonce, delay) in [(0u64, 30u64), (1, 20), (2, 10)] {
            window.enqueue(
                nonce,
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs(delay)).await;
                    Ok(nonce * 10)
                }),
            );
        }
        assert!(window.is_full());

        assert_eq!(window.drain_one().await.unwrap(), Some((0, 0)));
        assert!(!window.is_full());
        assert_eq!(window.drain_one().await.unwrap(), Some((1, 10)));
        assert_eq!(window.drain_one().await.unwrap(), Some((2, 20)));
        assert!(window.is_empty());
        assert_eq!(window.drain_one().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_failure_stops_draining() {
        let mut window = PendingWindow::new(4);
        window.enqueue(0, tokio::spawn(async { Ok(()) }));
        window.enqueue(
            1,
            tokio::spawn(async { Err(AppError::Internal("reverted".to_string())) }),
        );
        window.enqueue(2, tokio::spawn(async { Ok(()) }));

        assert!(window.drain_one().await.unwrap().is_some());
        let result = window.drain_one().await;

        assert!(matches!(result, Err(AppError::Internal(_))));
        assert!(!window.is_empty());
    }

    #[tokio::test]
    async fn test_panicked_verification_is_an_error() {
        let mut window: PendingWindow<()> = PendingWindow::new(1);
        window.enqueue(
            0,
            tokio::spawn(async {
                if window_panics() {
                    panic!("boom");
                }
                Ok(())
            }),
        );

        assert!(window.drain_one().await.is_err());
    }

    fn window_panics() -> bool {
        true
    }

    #[tokio::test]
    async fn test_capacity_is_at_least_one() {
        let mut window: PendingWindow<()> = PendingWindow::new(0);
        assert!(!window.is_full());
        window.enqueue(0, tokio::spawn(async { Ok(()) }));
        assert!(window.is_full());
    }
}
