//! Per-caller request throttle.
//!
//! Fixed-window counter keyed by caller. The caller is the socket peer
//! address. When the peer is a configured trusted proxy, the nearest
//! untrusted `X-Forwarded-For` hop is used instead. Requests without
//! connection info share the `"anonymous"` bucket.

use crate::config::RateLimitConfig;
use crate::protocol::models::ApiResponse;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

/// Upper bound on tracked callers. Expired windows go first, then the
/// oldest window.
const MAX_BUCKETS: usize = 10_000;

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u64,
    started: Instant,
}

/// Shared rate limiter state.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Arc<Mutex<HashMap<String, Window>>>,
}

impl RateLimiter {
    /// Create a new rate limiter with the given config.
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Count a request from `caller`, returning whether it is allowed.
    pub fn check(&self, caller: &str) -> bool {
        self.check_at(caller, Instant::now())
    }

    fn check_at(&self, caller: &str, now: Instant) -> bool {
        let mut windows = self.windows.lock();

        if windows.len() >= MAX_BUCKETS && !windows.contains_key(caller) {
            let span = self.config.window;
            windows.retain(|_, w| now.duration_since(w.started) < span);
            if windows.len() >= MAX_BUCKETS {
                let oldest = windows
                    .iter()
                    .min_by_key(|(_, w)| w.started)
                    .map(|(key, _)| key.clone());
                if let Some(key) = oldest {
                    windows.remove(&key);
                }
            }
        }

        let window = windows.entry(caller.to_string()).or_insert(Window {
            count: 0,
            started: now,
        });

        if now.duration_since(window.started) >= self.config.window {
            window.count = 0;
            window.started = now;
        }

        if window.count >= self.config.max_requests {
            false
        } else {
            window.count += 1;
            true
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.windows.lock().len()
    }
}

/// Nearest `X-Forwarded-For` hop that is not itself a trusted proxy.
fn forwarded_client(headers: &HeaderMap, trusted: &[IpAddr]) -> Option<IpAddr> {
    let hops: Vec<&str> = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .collect();

    for hop in hops.into_iter().rev() {
        match hop.parse::<IpAddr>() {
            Ok(ip) if trusted.contains(&ip) => continue,
            Ok(ip) => return Some(ip),
            Err(_) => return None,
        }
    }
    None
}

/// Throttle key for a request.
///
/// Forwarding headers are ignored unless `peer` is in `trusted`.
pub fn caller_key(headers: &HeaderMap, peer: Option<SocketAddr>, trusted: &[IpAddr]) -> String {
    match peer {
        Some(addr) if trusted.contains(&addr.ip()) => forwarded_client(headers, trusted)
            .unwrap_or_else(|| addr.ip())
            .to_string(),
        Some(addr) => addr.ip().to_string(),
        None => "anonymous".to_string(),
    }
}

/// Middleware rejecting callers over their budget with 429.
pub async fn throttle(State(limiter): State<RateLimiter>, request: Request, next: Next) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let caller = caller_key(request.headers(), peer, &limiter.config.trusted_proxies);

    if !limiter.check(&caller) {
        tracing::warn!(caller = %caller, "rate limit exceeded");
        let body = ApiResponse::<()>::failure("Too Many Attempts.".to_string());
        return (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    }

    next.run(request).await
}
