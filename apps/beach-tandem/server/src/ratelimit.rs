use std::{
    collections::VecDeque,
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::{Duration, Instant},
};

use axum::http::HeaderMap;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::debug;

/// Sliding-window request limiter keyed by client IP.
///
/// Each key keeps the instants of its accepted requests inside the window, so
/// a burst straddling a window boundary is still counted against one limit.
#[derive(Debug)]
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    buckets: DashMap<IpAddr, VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            buckets: DashMap::new(),
        }
    }

    /// Records a request from `key` and returns whether it is within the limit.
    pub fn check(&self, key: IpAddr, now: Instant) -> bool {
        let mut bucket = self.buckets.entry(key).or_default();
        expire(&mut bucket, now, self.window);
        if bucket.len() >= self.limit {
            return false;
        }
        bucket.push_back(now);
        true
    }

    /// Drops keys with no requests left inside the window. Returns how many
    /// keys were removed.
    pub fn prune(&self, now: Instant) -> usize {
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| {
            expire(bucket, now, self.window);
            !bucket.is_empty()
        });
        before.saturating_sub(self.buckets.len())
    }

    pub fn tracked_keys(&self) -> usize {
        self.buckets.len()
    }

    pub fn spawn_pruner(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        let mut interval = tokio::time::interval(every);
        tokio::spawn(async move {
            loop {
                interval.tick().await;
                let removed = limiter.prune(Instant::now());
                if removed > 0 {
                    debug!(removed, "pruned idle rate limit buckets");
                }
            }
        })
    }
}

fn expire(bucket: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(front) = bucket.front() {
        if now.duration_since(*front) >= window {
            bucket.pop_front();
        } else {
            break;
        }
    }
}

/// First `X-Forwarded-For` entry when it parses, otherwise the socket peer.
pub fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> IpAddr {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(|first| first.trim().parse().ok())
        .unwrap_or_else(|| peer.ip())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([10, 0, 0, last])
    }

    #[test]
    fn allows_up_to_limit_within_window() {
        let limiter = RateLimiter::new(3, Duration::from_secs(1));
        let now = Instant::now();

        assert!(limiter.check(ip(1), now));
        assert!(limiter.check(ip(1), now));
        assert!(limiter.check(ip(1), now));
        assert!(!limiter.check(ip(1), now));
        assert!(limiter.check(ip(2), now));
    }

    #[test]
    fn window_slides_forward() {
        let limiter = RateLimiter::new(2, Duration::from_secs(1));
        let start = Instant::now();

        assert!(limiter.check(ip(1), start));
        assert!(limiter.check(ip(1), start + Duration::from_millis(600)));
        assert!(!limiter.check(ip(1), start + Duration::from_millis(900)));
        assert!(limiter.check(ip(1), start + Duration::from_millis(1_000)));
        assert!(!limiter.check(ip(1), start + Duration::from_millis(1_100)));
    }

    #[test]
    fn rejected_requests_do_not_extend_the_window() {
        let limiter = RateLimiter::new(1, Duration::from_secs(1));
        let start = Instant::now();

        assert!(limiter.check(ip(1), start));
        assert!(!limiter.check(ip(1), start + Duration::from_millis(500)));
        assert!(limiter.check(ip(1), start + Duration::from_millis(1_000)));
    }

    #[test]
    fn prune_drops_idle_keys() {
        let limiter = RateLimiter::new(5, Duration::from_secs(1));
        let start = Instant::now();
        limiter.check(ip(1), start);
        limiter.check(ip(2), start + Duration::from_millis(800));

        let removed = limiter.prune(start + Duration::from_millis(1_200));

        assert_eq!(removed, 1);
        assert_eq!(limiter.tracked_keys(), 1);
    }

    #[test]
    fn client_ip_prefers_first_forwarded_entry() {
        let peer: SocketAddr = "192.168.1.9:5000".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, peer), peer.ip());

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(client_ip(&headers, peer), "203.0.113.7".parse::<IpAddr>().unwrap());

        headers.insert("x-forwarded-for", HeaderValue::from_static("garbage"));
        assert_eq!(client_ip(&headers, peer), peer.ip());
    }
}
