//! Tracks Reddit's rate-limit headers and holds requests back once the
//! current window's budget is spent.

use reqwest::header::HeaderMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, warn};

const REMAINING_HEADER: &str = "x-ratelimit-remaining";
const RESET_HEADER: &str = "x-ratelimit-reset";
const USED_HEADER: &str = "x-ratelimit-used";

/// Values from a single response's rate-limit headers.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitHeaders {
    pub remaining: f64,
    pub reset_after: Duration,
    pub used: Option<u32>,
}

impl RateLimitHeaders {
    /// `None` when the response carries no (or unparseable) remaining/reset
    /// headers.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let value = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim);

        let remaining = value(REMAINING_HEADER)?.parse::<f64>().ok()?;
        let reset_secs = value(RESET_HEADER)?
            .parse::<f64>()
            .ok()
            .filter(|secs| secs.is_finite())?;
        let used = value(USED_HEADER).and_then(|v| v.parse::<u32>().ok());

        Some(Self {
            remaining,
            reset_after: Duration::from_secs_f64(reset_secs.max(0.0)),
            used,
        })
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitStatus {
    pub remaining: Option<f64>,
    pub used: Option<u32>,
    pub resets_at: Option<Instant>,
    pub requests_sent: u64,
    pub rate_limited_responses: u64,
}

impl RateLimitStatus {
    pub fn is_exhausted(&self) -> bool {
        matches!(self.remaining, Some(remaining) if remaining < 1.0)
    }

    /// How long to wait before the next request, if at all.
    pub fn wait_time(&self, now: Instant) -> Option<Duration> {
        if !self.is_exhausted() {
            return None;
        }
        self.resets_at
            .map(|reset| reset.saturating_duration_since(now))
            .filter(|wait| !wait.is_zero())
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    state: Mutex<RateLimitStatus>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RateLimitStatus {
                remaining: None,
                used: None,
                resets_at: None,
                requests_sent: 0,
                rate_limited_responses: 0,
            }),
        }
    }

    /// Sleeps until the window resets when the last response reported no
    /// remaining budget, then counts the request.
    pub async fn acquire(&self) {
        let wait = {
            let state = self.state.lock().await;
            state.wait_time(Instant::now())
        };

        if let Some(wait) = wait {
            warn!("Reddit rate limit budget exhausted, waiting {:?}", wait);
            sleep(wait).await;
            let mut state = self.state.lock().await;
            state.remaining = None;
            state.resets_at = None;
        }

        self.state.lock().await.requests_sent += 1;
    }

    pub async fn update_from_headers(&self, headers: &HeaderMap) {
        let Some(limits) = RateLimitHeaders::from_headers(headers) else {
            return;
        };

        debug!(
            "Rate limit: {} remaining, resets in {:?}",
            limits.remaining, limits.reset_after
        );

        let mut state = self.state.lock().await;
        state.remaining = Some(limits.remaining);
        state.used = limits.used;
        state.resets_at = Some(Instant::now() + limits.reset_after);
    }

    pub async fn record_rate_limited(&self) {
        self.state.lock().await.rate_limited_responses += 1;
    }

    pub async fn get_rate_limit_status(&self) -> RateLimitStatus {
        self.state.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers(remaining: &str, reset: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(REMAINING_HEADER, HeaderValue::from_str(remaining).unwrap());
        headers.insert(RESET_HEADER, HeaderValue::from_str(reset).unwrap());
        headers.insert(USED_HEADER, HeaderValue::from_static("4"));
        headers
    }

    #[test]
    fn test_parse_headers() {
        let parsed = RateLimitHeaders::from_headers(&headers("596.0", "412")).unwrap();
        assert_eq!(parsed.remaining, 596.0);
        assert_eq!(parsed.reset_after, Duration::from_secs(412));
        assert_eq!(parsed.used, Some(4));
    }

    #[test]
    fn test_missing_headers() {
        assert!(RateLimitHeaders::from_headers(&HeaderMap::new()).is_none());

        let mut partial = HeaderMap::new();
        partial.insert(REMAINING_HEADER, HeaderValue::from_static("10"));
        assert!(RateLimitHeaders::from_headers(&partial).is_none());

        assert!(RateLimitHeaders::from_headers(&headers("lots", "10")).is_none());
    }

    #[test]
    fn test_wait_time_only_when_exhausted() {
        let now = Instant::now();
        let mut status = RateLimitStatus {
            remaining: Some(5.0),
            used: None,
            resets_at: Some(now + Duration::from_secs(30)),
            requests_sent: 0,
            rate_limited_responses: 0,
        };
        assert_eq!(status.wait_time(now), None);

        status.remaining = Some(0.0);
        assert_eq!(status.wait_time(now), Some(Duration::from_secs(30)));

        // Reset already passed
        assert_eq!(status.wait_time(now + Duration::from_secs(31)), None);
    }

    #[tokio::test]
    async fn test_limiter_tracks_headers() {
        let limiter = RateLimiter::new();
        limiter.acquire().await;
        limiter.update_from_headers(&headers("0", "0")).await;
        limiter.record_rate_limited().await;

        let status = limiter.get_rate_limit_status().await;
        assert_eq!(status.requests_sent, 1);
        assert_eq!(status.rate_limited_responses, 1);
        assert!(status.is_exhausted());

        // A zero-second reset never blocks
        limiter.acquire().await;
        assert_eq!(limiter.get_rate_limit_status().await.requests_sent, 2);
    }
}
