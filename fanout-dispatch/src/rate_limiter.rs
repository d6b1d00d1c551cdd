//! Admission control for outbound sends
//!
//! Two independent knobs, both optional except the first:
//!
//! - **Concurrency ceiling**: at most `max_in_flight` sends hold a permit at
//!   any time. Protects local resources.
//! - **Pacing**: a minimum spacing between admissions and/or a fixed-window
//!   token budget. Protects the provider's abuse thresholds.
//!
//! # Fixed window budget
//!
//! ```text
//! Budget: 3 tokens per 10s
//! t=0s:  admit, admit, admit        (window [0s, 10s) spent)
//! t=1s:  4th caller waits until t=10s
//! t=10s: window rolls over, 3 fresh tokens
//! ```
//!
//! Admission never rejects a caller; it only delays it.

use std::time::Duration;

use fanout_common::internal;
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{Semaphore, SemaphorePermit},
    time::Instant,
};

/// Configuration for admission control
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum number of sends in flight at once
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Minimum time between two admissions (milliseconds)
    #[serde(default)]
    pub min_interval_ms: Option<u64>,

    /// Token budget refilled at fixed window boundaries
    #[serde(default)]
    pub window: Option<WindowBudget>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            min_interval_ms: None,
            window: None,
        }
    }
}

const fn default_max_in_flight() -> usize {
    5
}

/// `tokens` admissions per `window_ms`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowBudget {
    pub tokens: u32,
    pub window_ms: u64,
}

#[derive(Debug)]
struct TokenWindow {
    capacity: u32,
    remaining: u32,
    window: Duration,
    window_start: Instant,
}

impl TokenWindow {
    fn new(budget: WindowBudget, now: Instant) -> Self {
        let capacity = budget.tokens.max(1);
        Self {
            capacity,
            remaining: capacity,
            window: Duration::from_millis(budget.window_ms),
            window_start: now,
        }
    }

    /// Refill when `now` has crossed into a later window, keeping windows
    /// aligned to the first one
    fn roll(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < self.window {
            return;
        }

        let into_current =
            u64::try_from(elapsed.as_nanos() % self.window.as_nanos()).unwrap_or_default();
        self.window_start = now - Duration::from_nanos(into_current);
        self.remaining = self.capacity;
    }

    /// Take a token, or report how long until the next window opens
    fn try_consume(&mut self, now: Instant) -> Result<(), Duration> {
        self.roll(now);

        if self.remaining > 0 {
            self.remaining -= 1;
            Ok(())
        } else {
            Err((self.window_start + self.window).saturating_duration_since(now))
        }
    }
}

/// Admission gate shared by every send of a job
#[derive(Debug)]
pub struct RateLimiter {
    max_in_flight: usize,
    in_flight: Semaphore,
    min_interval: Option<Duration>,
    /// Earliest instant the next admission may start
    next_slot: parking_lot::Mutex<Option<Instant>>,
    window: Option<parking_lot::Mutex<TokenWindow>>,
}

/// Authorization for one send. Capacity returns to the limiter on drop, on
/// every path.
#[derive(Debug)]
pub struct Permit<'a> {
    /// `None` only if the admission semaphore was closed, which this
    /// limiter never does
    _slot: Option<SemaphorePermit<'a>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(config: &RateLimitConfig) -> Self {
        let max_in_flight = config.max_in_flight.max(1);

        Self {
            max_in_flight,
            in_flight: Semaphore::new(max_in_flight),
            min_interval: config
                .min_interval_ms
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis),
            next_slot: parking_lot::Mutex::new(None),
            window: config
                .window
                .filter(|budget| budget.window_ms > 0)
                .map(|budget| parking_lot::Mutex::new(TokenWindow::new(budget, Instant::now()))),
        }
    }

    /// Wait until a send may start.
    ///
    /// The concurrency slot is taken first, then pacing is applied, so a
    /// paced caller already counts as in flight.
    pub async fn admit(&self) -> Permit<'_> {
        // Acquire only fails on a closed semaphore; `in_flight` is private
        // and never closed
        let slot = self.in_flight.acquire().await.ok();
        if slot.is_none() {
            internal!(level = ERROR, "Admission semaphore closed, admitting without a slot");
        }

        if let Some(window) = &self.window {
            loop {
                let wait = window.lock().try_consume(Instant::now());
                match wait {
                    Ok(()) => break,
                    Err(wait) => {
                        internal!("Window budget spent, waiting {}ms", wait.as_millis());
                        tokio::time::sleep(wait).await;
                    }
                }
            }
        }

        if let Some(interval) = self.min_interval {
            let start = {
                let mut next_slot = self.next_slot.lock();
                let now = Instant::now();
                let start = next_slot.map_or(now, |slot| slot.max(now));
                *next_slot = Some(start + interval);
                start
            };
            tokio::time::sleep_until(start).await;
        }

        Permit { _slot: slot }
    }

    /// Number of permits currently held
    pub fn in_flight(&self) -> usize {
        self.max_in_flight - self.in_flight.available_permits()
    }

    pub const fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn limiter(
        max_in_flight: usize,
        min_interval_ms: Option<u64>,
        window: Option<WindowBudget>,
    ) -> RateLimiter {
        RateLimiter::new(&RateLimitConfig {
            max_in_flight,
            min_interval_ms,
            window,
        })
    }

    #[test]
    fn test_token_window_rolls_at_boundaries() {
        let start = Instant::now();
        let mut window = TokenWindow::new(
            WindowBudget {
                tokens: 2,
                window_ms: 1000,
            },
            start,
        );

        assert!(window.try_consume(start).is_ok());
        assert!(window.try_consume(start + Duration::from_millis(10)).is_ok());
        assert_eq!(
            window.try_consume(start + Duration::from_millis(400)),
            Err(Duration::from_millis(600))
        );

        // 2.5 windows later: the current window began at +2000ms
        let later = start + Duration::from_millis(2500);
        assert!(window.try_consume(later).is_ok());
        assert!(window.try_consume(later).is_ok());
        assert_eq!(window.try_consume(later), Err(Duration::from_millis(500)));
    }

    #[tokio::test]
    async fn test_permit_release_returns_capacity() {
        let limiter = limiter(2, None, None);

        let first = limiter.admit().await;
        let second = limiter.admit().await;
        assert!(first._slot.is_some() && second._slot.is_some());
        assert_eq!(limiter.in_flight(), 2);

        drop(first);
        assert_eq!(limiter.in_flight(), 1);
        drop(second);
        assert_eq!(limiter.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ceiling_delays_but_never_rejects() {
        let limiter = Arc::new(limiter(1, None, None));
        let held = limiter.admit().await;

        let waiter = {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move {
                let _permit = limiter.admit().await;
                Instant::now()
            })
        };

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!waiter.is_finished());

        let released_at = Instant::now();
        drop(held);
        assert!(waiter.await.unwrap() >= released_at);
    }

    #[tokio::test(start_paused = true)]
    async fn test_min_interval_spaces_admissions() {
        let limiter = limiter(10, Some(100), None);
        let start = Instant::now();

        let mut admitted = Vec::new();
        for _ in 0..4 {
            let _permit = limiter.admit().await;
            admitted.push(Instant::now() - start);
        }

        assert_eq!(
            admitted,
            [0, 100, 200, 300].map(Duration::from_millis).to_vec()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_budget_waits_for_next_window() {
        let limiter = limiter(
            10,
            None,
            Some(WindowBudget {
                tokens: 3,
                window_ms: 1000,
            }),
        );
        let start = Instant::now();

        let mut admitted = Vec::new();
        for _ in 0..7 {
            let _permit = limiter.admit().await;
            admitted.push((Instant::now() - start).as_millis());
        }

        assert_eq!(admitted, [0, 0, 0, 1000, 1000, 1000, 2000]);
    }

    #[test]
    fn test_zero_ceiling_is_raised_to_one() {
        let limiter = limiter(0, Some(0), None);
        assert_eq!(limiter.max_in_flight(), 1);
        assert!(limiter.min_interval.is_none());
    }
}
