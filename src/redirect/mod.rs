mod handlers;
mod middleware;
mod routes;

pub use handlers::RedirectState;
pub use middleware::RateLimiter;
pub use routes::create_redirect_router;
