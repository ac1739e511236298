//! Per-client request limiting
//!
//! Fixed windows keyed by client IP: the first request opens a window, and
//! once `max_requests` have been admitted the client gets 429 until it ends.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

use crate::error::ApiError;

/// Windows are swept once the map grows past this many clients.
const SWEEP_THRESHOLD: usize = 10_000;

/// Rate limit config
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window: Duration::from_secs(15 * 60),
        }
    }
}

/// Outcome of one [`RateLimiter::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed { remaining: u32, reset_in: Duration },
    Limited { retry_after: Duration },
}

struct Window {
    admitted: u32,
    resets_at: Instant,
}

pub struct RateLimiter {
    windows: RwLock<HashMap<String, Window>>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            windows: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn check(&self, key: &str) -> RateLimitDecision {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> RateLimitDecision {
        let mut windows = self.windows.write();
        if windows.len() > SWEEP_THRESHOLD {
            windows.retain(|_, w| w.resets_at > now);
        }

        let window = windows.entry(key.to_owned()).or_insert_with(|| Window {
            admitted: 0,
            resets_at: now + self.config.window,
        });
        if window.resets_at <= now {
            window.admitted = 0;
            window.resets_at = now + self.config.window;
        }

        let reset_in = window.resets_at - now;
        if window.admitted >= self.config.max_requests {
            return RateLimitDecision::Limited {
                retry_after: reset_in,
            };
        }
        window.admitted += 1;
        RateLimitDecision::Allowed {
            remaining: self.config.max_requests - window.admitted,
            reset_in,
        }
    }
}

/// Peer address when the server was started with connect info, else the first
/// `X-Forwarded-For` hop.
fn client_key(connect_info: Option<ConnectInfo<SocketAddr>>, headers: &HeaderMap) -> String {
    connect_info
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .or_else(|| {
            headers
                .get("x-forwarded-for")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.split(',').next())
                .map(|s| s.trim().to_owned())
        })
        .unwrap_or_else(|| "unknown".to_owned())
}

fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

/// Rate limit middleware; adds `RateLimit-*` headers to admitted responses.
pub async fn enforce(
    State(limiter): State<Arc<RateLimiter>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let key = client_key(connect_info, req.headers());

    match limiter.check(&key) {
        RateLimitDecision::Limited { retry_after } => {
            warn!(client = %key, "rate limit exceeded");
            Err(ApiError::RateLimited {
                retry_after_secs: ceil_secs(retry_after),
            })
        }
        RateLimitDecision::Allowed { remaining, reset_in } => {
            let mut response = next.run(req).await;
            let headers = response.headers_mut();
            for (name, value) in [
                ("ratelimit-limit", u64::from(limiter.config.max_requests)),
                ("ratelimit-remaining", u64::from(remaining)),
                ("ratelimit-reset", ceil_secs(reset_in)),
            ] {
                headers.insert(HeaderName::from_static(name), HeaderValue::from(value));
            }
            Ok(response)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_requests: u32) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            max_requests,
            window: Duration::from_secs(60),
        })
    }

    #[test]
    fn test_limits_after_max_requests() {
        let limiter = limiter(2);
        let now = Instant::now();
        assert!(matches!(
            limiter.check_at("1.2.3.4", now),
            RateLimitDecision::Allowed { remaining: 1, .. }
        ));
        assert!(matches!(
            limiter.check_at("1.2.3.4", now),
            RateLimitDecision::Allowed { remaining: 0, .. }
        ));
        assert_eq!(
            limiter.check_at("1.2.3.4", now + Duration::from_secs(10)),
            RateLimitDecision::Limited {
                retry_after: Duration::from_secs(50)
            }
        );
    }

    #[test]
    fn test_clients_are_counted_separately() {
        let limiter = limiter(1);
        let now = Instant::now();
        assert!(matches!(limiter.check_at("a", now), RateLimitDecision::Allowed { .. }));
        assert!(matches!(limiter.check_at("b", now), RateLimitDecision::Allowed { .. }));
        assert!(matches!(limiter.check_at("a", now), RateLimitDecision::Limited { .. }));
    }

    #[test]
    fn test_window_resets() {
        let limiter = limiter(1);
        let now = Instant::now();
        limiter.check_at("a", now);
        assert!(matches!(limiter.check_at("a", now), RateLimitDecision::Limited { .. }));
        assert!(matches!(
            limiter.check_at("a", now + Duration::from_secs(60)),
            RateLimitDecision::Allowed { remaining: 0, .. }
        ));
    }

    #[test]
    fn test_client_key_prefers_peer_address() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("9.9.9.9, 10.0.0.1"));
        let peer: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        assert_eq!(client_key(Some(ConnectInfo(peer)), &headers), "127.0.0.1");
        assert_eq!(client_key(None, &headers), "9.9.9.9");
        assert_eq!(client_key(None, &HeaderMap::new()), "unknown");
    }
}
