// src/core/rate_limiter.rs

use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Requests counted for one client in its current window.
#[derive(Debug, Clone, Copy)]
struct RateBudget {
    window_start: Instant,
    count: u32,
}

/// Fixed-window request counter per client key.
pub struct RateLimiter {
    window: Duration,
    limit: u32,
    budgets: DashMap<String, RateBudget>,
}

impl RateLimiter {
    pub fn new(window: Duration, limit: u32) -> Self {
        Self { window, limit, budgets: DashMap::new() }
    }

    /// Counts one request for `client` and says whether it may proceed.
    pub fn allow(&self, client: &str) -> bool {
        let now = Instant::now();
        // The entry guard locks only this key's shard for the update.
        let mut budget = self
            .budgets
            .entry(client.to_string())
            .or_insert(RateBudget { window_start: now, count: 0 });

        if now.duration_since(budget.window_start) >= self.window {
            budget.window_start = now;
            budget.count = 0;
        }
        budget.count = budget.count.saturating_add(1);

        if budget.count > self.limit {
            warn!(client, count = budget.count, limit = self.limit, "Rate limit exceeded.");
            return false;
        }
        debug!(client, count = budget.count, "Request admitted.");
        true
    }

    /// Time left in `client`'s current window; zero when it has none.
    pub fn retry_after(&self, client: &str) -> Duration {
        let now = Instant::now();
        self.budgets
            .get(client)
            .map(|budget| self.window.saturating_sub(now.duration_since(budget.window_start)))
            .unwrap_or_default()
    }

    /// Forgets clients whose window has elapsed; returns how many were dropped.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.budgets.len();
        self.budgets.retain(|_, budget| now.duration_since(budget.window_start) < self.window);
        before.saturating_sub(self.budgets.len())
    }
}
