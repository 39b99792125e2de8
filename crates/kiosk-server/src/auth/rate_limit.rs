//! Sliding-window limiter for login attempts.
//!
//! Each key (the client IP) may make `max_attempts` attempts within
//! `window`; older attempts fall out of the window as time passes.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct RateLimiter {
    /// Maximum attempts allowed within the window (0 disables limiting).
    max_attempts: u32,
    /// How far back attempts are counted.
    window: Duration,
    /// key → attempt timestamps, oldest first.
    entries: HashMap<IpAddr, VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_attempts: u32, window: Duration) -> Self {
        Self {
            max_attempts,
            window,
            entries: HashMap::new(),
        }
    }

    /// Record an attempt for `key` at `now`. Returns `false` when the key is
    /// over its budget; rejected attempts are not recorded.
    pub fn check_and_record(&mut self, key: IpAddr, now: Instant) -> bool {
        if self.max_attempts == 0 {
            return true;
        }
        let attempts = self.entries.entry(key).or_default();
        expire(attempts, now, self.window);
        if attempts.len() as u32 >= self.max_attempts {
            return false;
        }
        attempts.push_back(now);
        true
    }

    /// Drop keys whose attempts have all expired.
    pub fn gc(&mut self, now: Instant) {
        let window = self.window;
        self.entries.retain(|_, attempts| {
            expire(attempts, now, window);
            !attempts.is_empty()
        });
    }

    #[cfg(test)]
    pub fn tracked_keys(&self) -> usize {
        self.entries.len()
    }
}

fn expire(attempts: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&oldest) = attempts.front() {
        if now.duration_since(oldest) >= window {
            attempts.pop_front();
        } else {
            break;
        }
    }
}

/// Limits shared by the HTTP and WebSocket login paths.
#[derive(Debug)]
pub struct LoginLimits {
    /// Attempts keyed by client IP.
    login: RateLimiter,
}

impl LoginLimits {
    pub fn new(max_attempts: u32, window_secs: u64) -> Self {
        Self {
            login: RateLimiter::new(max_attempts, Duration::from_secs(window_secs)),
        }
    }

    /// Check if a login attempt from the given IP is allowed.
    pub fn check_login(&mut self, ip: IpAddr) -> bool {
        self.login.check_and_record(ip, Instant::now())
    }

    pub fn gc(&mut self) {
        self.login.gc(Instant::now());
    }
}

impl Default for LoginLimits {
    fn default() -> Self {
        Self::new(10, 60)
    }
}
