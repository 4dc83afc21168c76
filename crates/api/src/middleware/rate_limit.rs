//! Fixed-window rate limiting for the ML proxy routes.
//!
//! Each client IP gets a window that opens on its first request. Within the
//! window requests are counted; once the count exceeds the limit, further
//! requests get 429 until the window expires and a new one opens. A sweeper
//! task drops expired windows once per window length.
//!
//! Clients are keyed by the socket peer address. Proxy headers are only
//! consulted when the limiter is built with
//! [`with_proxy_headers(true)`](WindowRateLimiter::with_proxy_headers), since
//! any client can set them.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use axum::{
    Json,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tokio::task::JoinHandle;

/// Body returned when a client is over its limit.
pub const RATE_LIMITED_MESSAGE: &str = "Too many ML requests. Try again later.";

#[derive(Debug, Clone, Copy)]
struct Window {
    opened_at: Instant,
    count: u32,
}

/// Per-IP fixed-window request counter.
#[derive(Debug, Clone)]
pub struct WindowRateLimiter {
    windows: Arc<Mutex<HashMap<IpAddr, Window>>>,
    window: Duration,
    max_requests: u32,
    trust_proxy_headers: bool,
}

impl WindowRateLimiter {
    #[must_use]
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            windows: Arc::new(Mutex::new(HashMap::new())),
            window,
            max_requests,
            trust_proxy_headers: false,
        }
    }

    /// Key clients by proxy headers (`X-Forwarded-For` and friends) instead
    /// of the peer address. Only for deployments behind a proxy that
    /// overwrites them.
    #[must_use]
    pub const fn with_proxy_headers(mut self, trust: bool) -> Self {
        self.trust_proxy_headers = trust;
        self
    }

    /// Count a request from `ip`; `false` means it is over the limit.
    #[must_use]
    pub fn check(&self, ip: IpAddr) -> bool {
        self.check_at(ip, Instant::now())
    }

    /// [`check`](Self::check) as of `now`.
    #[must_use]
    pub fn check_at(&self, ip: IpAddr, now: Instant) -> bool {
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);

        let entry = windows.entry(ip).or_insert(Window {
            opened_at: now,
            count: 0,
        });

        if now.saturating_duration_since(entry.opened_at) >= self.window {
            *entry = Window {
                opened_at: now,
                count: 0,
            };
        }

        entry.count = entry.count.saturating_add(1);
        entry.count <= self.max_requests
    }

    /// Drop windows that have expired as of `now`. Returns how many were removed.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        let before = windows.len();
        windows.retain(|_, w| now.saturating_duration_since(w.opened_at) < self.window);
        before - windows.len()
    }

    /// Number of tracked clients.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Spawn the background sweeper. Runs once per window length.
    #[must_use]
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let limiter = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(limiter.window);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = limiter.sweep_at(Instant::now());
                if removed > 0 {
                    tracing::debug!(removed, "Swept expired rate limit windows");
                }
            }
        })
    }
}

// =============================================================================
// Client IP extraction
// =============================================================================

fn header_ip(headers: &HeaderMap, name: &str) -> Option<IpAddr> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .and_then(|s| s.trim().parse().ok())
}

/// Client IP for rate limiting: the peer address, or when `trust_proxy_headers`
/// is set, the first of Cloudflare, `X-Forwarded-For`, `X-Real-IP` and Fly.io
/// headers that parses.
#[must_use]
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy_headers: bool) -> IpAddr {
    let forwarded = if trust_proxy_headers {
        ["cf-connecting-ip", "x-forwarded-for", "x-real-ip", "fly-client-ip"]
            .into_iter()
            .find_map(|name| header_ip(headers, name))
    } else {
        None
    };

    forwarded
        .or_else(|| peer.map(|addr| addr.ip()))
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

/// Middleware applying a [`WindowRateLimiter`] to every request it wraps.
pub async fn ml_rate_limit(
    State(limiter): State<WindowRateLimiter>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip = client_ip(request.headers(), peer, limiter.trust_proxy_headers);

    if !limiter.check(ip) {
        tracing::warn!(client_ip = %ip, path = %request.uri().path(), "ML rate limit exceeded");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "error": RATE_LIMITED_MESSAGE })),
        )
            .into_response();
    }

    next.run(request).await
}
