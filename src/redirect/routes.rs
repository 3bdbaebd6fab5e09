use axum::routing::get;
use axum::{middleware, Router};
use std::sync::Arc;

use crate::engine::RedirectEngine;

use super::handlers::{health_check, redirect_url, RedirectState};
use super::middleware::{enforce_rate_limit, RateLimiter};

pub fn create_redirect_router(engine: Arc<RedirectEngine>, limiter: RateLimiter) -> Router {
    let state = Arc::new(RedirectState { engine });

    Router::new()
        .route("/{code}", get(redirect_url))
        .layer(middleware::from_fn_with_state(limiter, enforce_rate_limit))
        // Health stays outside the rate limit.
        .route("/health", get(health_check))
        .with_state(state)
}
