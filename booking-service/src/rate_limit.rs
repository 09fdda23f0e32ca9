//! Per-client request budget over a fixed window.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::RateLimitConfig;

/// Windows are pruned once this many clients are tracked.
const PRUNE_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

#[derive(Debug, Clone)]
pub struct RateLimiter {
    windows: Arc<DashMap<String, Window>>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            windows: Arc::new(DashMap::new()),
            config,
        }
    }

    /// Counts one request for `client`. Once the window's budget is spent,
    /// returns how long until the window resets.
    pub fn check_and_record(&self, client: &str) -> Result<(), Duration> {
        let now = Instant::now();
        if self.windows.len() >= PRUNE_THRESHOLD {
            self.prune(now);
        }

        let mut window = self.windows.entry(client.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });
        let elapsed = now.duration_since(window.started);
        if elapsed >= self.config.window {
            *window = Window {
                started: now,
                count: 0,
            };
        }
        if window.count >= self.config.max_requests {
            return Err(self.config.window.saturating_sub(now.duration_since(window.started)));
        }
        window.count += 1;
        Ok(())
    }

    fn prune(&self, now: Instant) {
        let window = self.config.window;
        self.windows
            .retain(|_, w| now.duration_since(w.started) < window);
    }
}
