//! Per-user, per-action fixed-window rate limiting.
//!
//! Counters are keyed by `(user_id, action)`. A counter is reset lazily by
//! the first call after its window expires; `prune_expired` only reclaims
//! memory and never changes an answer.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::config::MAX_DURATION;

/// Action name used for inbound chat messages.
pub const ACTION_MESSAGE: &str = "message";

#[derive(Debug, Clone, Copy)]
struct RateLimitCounter {
    count: u32,
    window_expires_at: Instant,
}

/// Atomic increment-and-check counters.
#[derive(Default)]
pub struct RateLimiter {
    counters: Mutex<HashMap<(String, String), RateLimitCounter>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one attempt and report whether it is within `limit` for the
    /// current window.
    ///
    /// Rejected attempts are not counted.
    pub async fn allow(&self, user_id: &str, action: &str, limit: u32, window: Duration) -> bool {
        let now = Instant::now();
        let expires_at = window_end(now, window);
        let mut counters = self.counters.lock().await;
        let counter = counters
            .entry((user_id.to_string(), action.to_string()))
            .or_insert(RateLimitCounter {
                count: 0,
                window_expires_at: expires_at,
            });

        if now >= counter.window_expires_at {
            counter.count = 0;
            counter.window_expires_at = expires_at;
        }

        if counter.count >= limit {
            debug!(user_id, action, limit, "Rate limit reached");
            return false;
        }
        counter.count += 1;
        true
    }

    /// Attempts left in the current window, without counting one.
    pub async fn remaining(&self, user_id: &str, action: &str, limit: u32) -> u32 {
        let counters = self.counters.lock().await;
        match counters.get(&(user_id.to_string(), action.to_string())) {
            Some(counter) if Instant::now() < counter.window_expires_at => {
                limit.saturating_sub(counter.count)
            }
            _ => limit,
        }
    }

    /// Drop counters whose window has elapsed. Returns how many were removed.
    pub async fn prune_expired(&self) -> usize {
        let now = Instant::now();
        let mut counters = self.counters.lock().await;
        let before = counters.len();
        counters.retain(|_, counter| now < counter.window_expires_at);
        before - counters.len()
    }

    /// Number of live counters (expired ones included until pruned).
    pub async fn tracked_keys(&self) -> usize {
        self.counters.lock().await.len()
    }
}

/// End of a window starting at `now`. Windows longer than [`MAX_DURATION`]
/// are capped.
fn window_end(now: Instant, window: Duration) -> Instant {
    now.checked_add(window.min(MAX_DURATION)).unwrap_or(now)
}
