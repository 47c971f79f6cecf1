//! Per-IP sliding-window rate limiter for allocation calls.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Sliding-window limiter keyed by client IP.
#[derive(Debug)]
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    requests: Mutex<HashMap<String, Vec<Instant>>>,
}

impl RateLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            requests: Mutex::new(HashMap::new()),
        }
    }

    /// Record an attempt for `client_ip` and report whether it fits the
    /// budget. Attempts older than the window are dropped first.
    pub fn is_allowed(&self, client_ip: &str) -> bool {
        let now = Instant::now();
        let mut requests = self.requests.lock().unwrap();

        let entry = requests.entry(client_ip.to_string()).or_default();
        entry.retain(|t| now.duration_since(*t) < self.window);

        if entry.len() >= self.limit {
            return false;
        }
        entry.push(now);
        true
    }
}

impl Default for RateLimiter {
    /// The allocation-path default: 10 requests per minute per IP.
    fn default() -> Self {
        Self::new(10, Duration::from_secs(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allows_up_to_limit() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        assert!(limiter.is_allowed("1.1.1.1"));
        assert!(limiter.is_allowed("1.1.1.1"));
        assert!(limiter.is_allowed("1.1.1.1"));
        assert!(!limiter.is_allowed("1.1.1.1"));
    }

    #[test]
    fn test_ips_are_independent() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.is_allowed("1.1.1.1"));
        assert!(limiter.is_allowed("2.2.2.2"));
        assert!(!limiter.is_allowed("1.1.1.1"));
    }

    #[test]
    fn test_window_expiry() {
        let limiter = RateLimiter::new(1, Duration::from_millis(10));
        assert!(limiter.is_allowed("1.1.1.1"));
        assert!(!limiter.is_allowed("1.1.1.1"));
        std::thread::sleep(Duration::from_millis(20));
        assert!(limiter.is_allowed("1.1.1.1"));
    }
}
