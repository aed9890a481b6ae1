//! Per-address login throttling over a sliding window

use dashmap::DashMap;
use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Sliding-log limiter: an address may make `max_attempts` login calls per `window`.
#[derive(Debug, Clone)]
pub struct LoginRateLimiter {
    attempts: Arc<DashMap<IpAddr, VecDeque<Instant>>>,
    max_attempts: usize,
    window: Duration,
}

impl LoginRateLimiter {
    pub fn new(max_attempts: usize, window: Duration) -> Self {
        Self {
            attempts: Arc::new(DashMap::new()),
            max_attempts: max_attempts.max(1),
            window,
        }
    }

    /// Count an attempt from `ip`. `Err` carries how long until the oldest attempt ages out.
    pub fn check(&self, ip: IpAddr) -> Result<(), Duration> {
        self.check_at(ip, Instant::now())
    }

    pub fn check_at(&self, ip: IpAddr, now: Instant) -> Result<(), Duration> {
        let mut log = self.attempts.entry(ip).or_default();

        while let Some(oldest) = log.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                log.pop_front();
            } else {
                break;
            }
        }

        if log.len() >= self.max_attempts {
            let retry_after = log
                .front()
                .map(|oldest| self.window.saturating_sub(now.saturating_duration_since(*oldest)))
                .unwrap_or(self.window);
            return Err(retry_after.max(Duration::from_secs(1)));
        }

        log.push_back(now);
        Ok(())
    }

    /// Forget addresses whose whole log has aged out.
    pub fn prune(&self) {
        let now = Instant::now();
        self.attempts.retain(|_, log| {
            log.back()
                .is_some_and(|latest| now.saturating_duration_since(*latest) < self.window)
        });
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn tracked_addresses(&self) -> usize {
        self.attempts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn fourth_attempt_in_window_is_blocked() {
        let limiter = LoginRateLimiter::new(3, Duration::from_secs(86_400));
        let start = Instant::now();
        let client = ip("203.0.113.5");

        for i in 0..3 {
            assert!(limiter.check_at(client, start + Duration::from_secs(i)).is_ok());
        }
        let retry = limiter
            .check_at(client, start + Duration::from_secs(10))
            .unwrap_err();
        assert!(retry > Duration::from_secs(86_000));
    }

    #[test]
    fn addresses_are_limited_independently() {
        let limiter = LoginRateLimiter::new(1, Duration::from_secs(60));
        let now = Instant::now();

        assert!(limiter.check_at(ip("10.0.0.1"), now).is_ok());
        assert!(limiter.check_at(ip("10.0.0.1"), now).is_err());
        assert!(limiter.check_at(ip("10.0.0.2"), now).is_ok());
    }

    #[test]
    fn window_slides() {
        let limiter = LoginRateLimiter::new(2, Duration::from_secs(60));
        let start = Instant::now();
        let client = ip("2001:db8::1");

        assert!(limiter.check_at(client, start).is_ok());
        assert!(limiter.check_at(client, start + Duration::from_secs(30)).is_ok());
        assert!(limiter.check_at(client, start + Duration::from_secs(59)).is_err());
        // First attempt has aged out
        assert!(limiter.check_at(client, start + Duration::from_secs(61)).is_ok());
    }

    #[test]
    fn prune_drops_idle_addresses() {
        let limiter = LoginRateLimiter::new(3, Duration::from_millis(1));
        limiter.check(ip("10.0.0.1")).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        limiter.prune();
        assert_eq!(limiter.tracked_addresses(), 0);
    }
}
