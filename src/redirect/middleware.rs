use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::RateLimitConfig;
use crate::error::Error;

/// Per-IP fixed-window rate limiter for the resolve path.
#[derive(Clone)]
pub struct RateLimiter {
    windows: Arc<DashMap<IpAddr, Window>>,
    max_requests: u32,
    window: Duration,
}

struct Window {
    started: Instant,
    count: u32,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            windows: Arc::new(DashMap::new()),
            max_requests: config.requests,
            window: config.duration,
        }
    }

    /// Count one request from `ip`; false means over budget.
    pub fn check(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let mut entry = self.windows.entry(ip).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.duration_since(entry.started) >= self.window {
            entry.started = now;
            entry.count = 0;
        }
        entry.count += 1;
        let allowed = entry.count <= self.max_requests;
        drop(entry);

        // Bound the table: drop windows that have already rolled over.
        if self.windows.len() > 10_000 {
            let window = self.window;
            self.windows
                .retain(|_, entry| now.duration_since(entry.started) < window);
        }

        allowed
    }
}

pub async fn enforce_rate_limit(
    State(limiter): State<RateLimiter>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    if !limiter.check(addr.ip()) {
        return Error::RateLimited.into_response();
    }
    next.run(request).await
}
