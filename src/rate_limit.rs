//! Sliding-window admission control for outbound registry requests.
//!
//! A single [`RateLimiter`] is shared by every concurrent page fetch of a
//! client. It never admits more than `max_requests_per_second` requests in
//! any trailing one-second window.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

const WINDOW: Duration = Duration::from_secs(1);

/// Shared request budget over a trailing one-second window.
///
/// The mutex only guards eviction, the capacity check and the insert; a
/// caller that has to wait sleeps without holding it and re-checks on wake.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: usize,
    margin: Duration,
    window: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Create a limiter admitting `capacity` requests per second.
    ///
    /// `margin` is added past the computed wait so a woken caller does not
    /// land exactly on the window boundary.
    pub fn new(capacity: usize, margin: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            margin,
            window: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Wait until one more request fits in the window, then reserve it.
    pub async fn acquire(&self) {
        loop {
            let wait = match self.try_reserve(Instant::now()) {
                None => return,
                Some(wait) => wait,
            };
            tracing::trace!(wait_ms = wait.as_millis() as u64, "request window full");
            tokio::time::sleep(wait).await;
        }
    }

    /// Reserve a slot at `now`, or return how long to wait before retrying.
    fn try_reserve(&self, now: Instant) -> Option<Duration> {
        let mut window = self.lock();
        while let Some(&oldest) = window.front() {
            if now.saturating_duration_since(oldest) >= WINDOW {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() < self.capacity {
            window.push_back(now);
            return None;
        }

        let oldest = window.front().copied().unwrap_or(now);
        let age = now.saturating_duration_since(oldest);
        Some(WINDOW.saturating_sub(age) + self.margin)
    }

    /// Forget every recorded request, starting a fresh budget.
    pub fn reset(&self) {
        self.lock().clear();
    }

    /// Number of requests recorded inside the current window.
    pub fn in_flight_window(&self) -> usize {
        let now = Instant::now();
        self.lock()
            .iter()
            .filter(|t| now.saturating_duration_since(**t) < WINDOW)
            .count()
    }

    /// Requests admitted per trailing second.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Instant>> {
        // A panic while holding the lock cannot leave the deque inconsistent.
        match self.window.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn admits_up_to_capacity_without_waiting() {
        let limiter = RateLimiter::new(3, Duration::from_millis(10));
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(limiter.in_flight_window(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn blocks_when_window_is_full() {
        let limiter = RateLimiter::new(2, Duration::from_millis(10));
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(1));
        assert!(start.elapsed() < Duration::from_millis(1_100));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_frees_the_budget() {
        let limiter = RateLimiter::new(1, Duration::from_millis(10));
        limiter.acquire().await;
        limiter.reset();
        assert_eq!(limiter.in_flight_window(), 0);

        let start = Instant::now();
        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_never_exceed_capacity_in_any_window() {
        let capacity = 4;
        let limiter = Arc::new(RateLimiter::new(capacity, Duration::from_millis(5)));
        let admitted = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for _ in 0..25 {
            let limiter = Arc::clone(&limiter);
            let admitted = Arc::clone(&admitted);
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
                admitted.lock().expect("lock").push(Instant::now());
            }));
        }
        for handle in handles {
            handle.await.expect("task");
        }

        let mut times = admitted.lock().expect("lock").clone();
        times.sort();
        assert_eq!(times.len(), 25);
        for (i, start) in times.iter().enumerate() {
            let in_window = times[i..]
                .iter()
                .take_while(|t| t.duration_since(*start) < WINDOW)
                .count();
            assert!(
                in_window <= capacity,
                "{in_window} admissions within one second of admission {i}"
            );
        }
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let limiter = RateLimiter::new(0, Duration::ZERO);
        assert_eq!(limiter.capacity(), 1);
    }
}
