//! Async test helpers

use std::future::Future;
use tokio::time::{sleep, timeout, Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutError {
    Elapsed,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "operation timed out")
    }
}

impl std::error::Error for TimeoutError {}

/// Run a future with a timeout
pub async fn with_timeout<F, T>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    timeout(duration, future)
        .await
        .map_err(|_| TimeoutError::Elapsed)
}

/// Poll an async condition until it holds or `deadline` passes
pub async fn wait_until<F, Fut>(deadline: Duration, mut condition: F) -> Result<(), TimeoutError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = Instant::now();
    loop {
        if condition().await {
            return Ok(());
        }
        if start.elapsed() >= deadline {
            return Err(TimeoutError::Elapsed);
        }
        sleep(Duration::from_millis(5)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_with_timeout() {
        assert_eq!(with_timeout(Duration::from_secs(1), async { 7 }).await, Ok(7));

        let slow = with_timeout(Duration::from_millis(10), sleep(Duration::from_secs(5))).await;
        assert_eq!(slow, Err(TimeoutError::Elapsed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until() {
        let polls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&polls);
        wait_until(Duration::from_secs(1), || {
            let counter = Arc::clone(&counter);
            async move { counter.fetch_add(1, Ordering::SeqCst) >= 3 }
        })
        .await
        .unwrap();
        assert!(polls.load(Ordering::SeqCst) >= 4);

        let never = wait_until(Duration::from_millis(50), || async { false }).await;
        assert_eq!(never, Err(TimeoutError::Elapsed));
    }
}
