//! Fixed-window rate limiting for the submission path.
//!
//! The trait is the seam: an in-memory window map is correct for a single
//! server instance only. A horizontally-scaled deployment swaps in an
//! implementation backed by a shared counter store.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Check-and-increment over a bounded window.
pub trait RateLimiter: Send + Sync {
    /// Record one request for `key`. Returns false when the key has
    /// exhausted its budget for the current window.
    fn check(&self, key: &str) -> bool;
}

/// In-memory fixed-window limiter keyed by caller identity (client IP).
///
/// Windows are epoch-minute buckets; a bucket rollover resets every
/// counter. Single-instance only.
pub struct FixedWindowLimiter {
    max_per_window: u32,
    window_secs: u64,
    state: Mutex<WindowState>,
}

struct WindowState {
    window_start: u64,
    counts: HashMap<String, u32>,
}

impl FixedWindowLimiter {
    pub fn new(max_per_window: u32, window_secs: u64) -> Self {
        Self {
            max_per_window,
            window_secs,
            state: Mutex::new(WindowState {
                window_start: 0,
                counts: HashMap::new(),
            }),
        }
    }

    fn check_at(&self, key: &str, now_secs: u64) -> bool {
        let window = now_secs - (now_secs % self.window_secs);
        let mut state = self.state.lock();

        if state.window_start != window {
            state.window_start = window;
            state.counts.clear();
        }

        let count = state.counts.entry(key.to_string()).or_insert(0);
        if *count >= self.max_per_window {
            return false;
        }
        *count += 1;
        true
    }
}

impl RateLimiter for FixedWindowLimiter {
    fn check(&self, key: &str) -> bool {
        let now_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.check_at(key, now_secs)
    }
}

/// Limiter that admits everything. Used when rate limiting is disabled.
pub struct UnlimitedLimiter;

impl RateLimiter for UnlimitedLimiter {
    fn check(&self, _key: &str) -> bool {
        true
    }
}
