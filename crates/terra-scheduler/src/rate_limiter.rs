use std::collections::VecDeque;
use std::time::{Duration, Instant};
use terra_core::QuadId;

// Absorbs float drift so a release scheduled by `next_release_at` is honoured.
const TOKEN_EPSILON: f64 = 1e-9;

/// Token bucket between admission and assembly.
///
/// Holds up to `max(1, rate)` tokens, refills continuously at `rate` per
/// second and starts full. Releases are strictly FIFO, and a quad that stops
/// being needed while waiting here is still released. The caller owns time:
/// every method takes `now` and nothing reads a clock.
#[derive(Debug)]
pub struct RateLimiter {
    rate: f64,
    capacity: f64,
    tokens: f64,
    refilled_at: Option<Instant>,
    pending: VecDeque<QuadId>,
}

impl RateLimiter {
    pub fn new(max_requests_per_second: f64) -> Self {
        let rate = if max_requests_per_second.is_finite() && max_requests_per_second > 0.0 {
            max_requests_per_second
        } else {
            1.0
        };
        let capacity = rate.max(1.0);
        Self {
            rate,
            capacity,
            tokens: capacity,
            refilled_at: None,
            pending: VecDeque::new(),
        }
    }

    pub fn request(&mut self, quad: QuadId) {
        self.pending.push_back(quad);
    }

    /// Releases as many waiting quads as the bucket allows at `now`.
    pub fn poll(&mut self, now: Instant) -> Vec<QuadId> {
        self.refill(now);
        let mut released = Vec::new();
        while self.tokens + TOKEN_EPSILON >= 1.0 {
            let Some(quad) = self.pending.pop_front() else {
                break;
            };
            self.tokens -= 1.0;
            released.push(quad);
        }
        released
    }

    /// When the next waiting quad can be released, `None` if nothing waits.
    pub fn next_release_at(&self, now: Instant) -> Option<Instant> {
        if self.pending.is_empty() {
            return None;
        }
        let tokens = self.tokens_at(now);
        if tokens + TOKEN_EPSILON >= 1.0 {
            return Some(now);
        }
        Some(now + Duration::from_secs_f64((1.0 - tokens) / self.rate))
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn refill(&mut self, now: Instant) {
        self.tokens = self.tokens_at(now);
        self.refilled_at = Some(match self.refilled_at {
            Some(last) => last.max(now),
            None => now,
        });
    }

    fn tokens_at(&self, now: Instant) -> f64 {
        match self.refilled_at {
            Some(last) => {
                let elapsed = now.saturating_duration_since(last).as_secs_f64();
                (self.tokens + elapsed * self.rate).min(self.capacity)
            }
            None => self.tokens,
        }
    }
}
