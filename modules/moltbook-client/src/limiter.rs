use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Widened spacing never exceeds this, so one bad throttling episode cannot
/// stall the pipeline for minutes per request.
const MAX_GAP: Duration = Duration::from_secs(60);

/// Global request pacer. Every outbound Moltbook call acquires a slot here,
/// across all jobs sharing the client. Slots are handed out strictly one
/// spacing interval apart, so concurrent callers serialize rather than burst.
pub struct RateLimiter {
    base_gap: Duration,
    state: Mutex<LimiterState>,
}

struct LimiterState {
    gap: Duration,
    next_slot: Instant,
}

impl RateLimiter {
    pub fn new(requests_per_minute: u32) -> Self {
        let base_gap = Duration::from_secs_f64(60.0 / requests_per_minute.max(1) as f64);
        Self {
            base_gap,
            state: Mutex::new(LimiterState {
                gap: base_gap,
                next_slot: Instant::now(),
            }),
        }
    }

    /// Wait until a request slot is free under the global budget.
    /// Requests are delayed, never dropped.
    pub async fn acquire(&self) {
        let slot = {
            let mut state = self.state.lock().await;
            let now = Instant::now();
            let slot = if state.next_slot > now {
                state.next_slot
            } else {
                now
            };
            state.next_slot = slot + state.gap;
            slot
        };
        tokio::time::sleep_until(slot).await;
    }

    /// The remote rejected a request for rate limiting. Doubles the spacing
    /// (bounded) and, when the remote supplied a retry hint, blocks all
    /// subsequent acquisitions for at least that long.
    pub async fn report_throttled(&self, retry_after: Option<Duration>) {
        let mut state = self.state.lock().await;
        state.gap = (state.gap * 2).min(MAX_GAP);
        let hold = retry_after.unwrap_or(state.gap);
        let resume = Instant::now() + hold;
        if resume > state.next_slot {
            state.next_slot = resume;
        }
        warn!(
            gap_ms = state.gap.as_millis() as u64,
            hold_ms = hold.as_millis() as u64,
            "Remote throttled, widening request spacing"
        );
    }

    /// A request went through. Decay any widened spacing back toward the
    /// base budget so a long-running process recovers after an episode.
    pub async fn report_success(&self) {
        let mut state = self.state.lock().await;
        if state.gap > self.base_gap {
            let decayed = state.gap.mul_f64(0.9);
            state.gap = decayed.max(self.base_gap);
            debug!(gap_ms = state.gap.as_millis() as u64, "Request spacing decaying toward base");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn dispatch_stays_within_rolling_minute_budget() {
        let limiter = RateLimiter::new(60);
        let mut dispatched = Vec::with_capacity(200);
        for _ in 0..200 {
            limiter.acquire().await;
            dispatched.push(Instant::now());
        }

        for (i, start) in dispatched.iter().enumerate() {
            let window_end = *start + Duration::from_secs(60);
            let in_window = dispatched[i..]
                .iter()
                .take_while(|t| **t < window_end)
                .count();
            assert!(
                in_window <= 60,
                "{in_window} dispatches in the rolling window starting at request {i}"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retry_hint_blocks_subsequent_acquires() {
        let limiter = RateLimiter::new(60);
        limiter.acquire().await;
        limiter
            .report_throttled(Some(Duration::from_secs(30)))
            .await;

        let before = Instant::now();
        limiter.acquire().await;
        assert!(Instant::now() - before >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_doubles_spacing() {
        let limiter = RateLimiter::new(60);
        limiter.acquire().await;
        limiter.report_throttled(None).await;

        limiter.acquire().await;
        let first = Instant::now();
        limiter.acquire().await;
        let second = Instant::now();
        assert!(second - first >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn success_decays_spacing_back_to_base() {
        let limiter = RateLimiter::new(60);
        limiter.report_throttled(None).await;
        for _ in 0..100 {
            limiter.report_success().await;
        }

        limiter.acquire().await;
        let first = Instant::now();
        limiter.acquire().await;
        let second = Instant::now();
        assert_eq!(second - first, Duration::from_secs(1));
    }
}
