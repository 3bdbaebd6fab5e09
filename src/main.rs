use anyhow::Result;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

use linkhop::api::{self, AppState};
use linkhop::config::{Config, ServerMode};
use linkhop::engine::RedirectEngine;
use linkhop::geo::RegionResolver;
use linkhop::redirect::{self, RateLimiter};
use linkhop::storage::{CachedStorage, LinkStore, PostgresStorage};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    info!("Loaded configuration");

    // Durable store
    let postgres: Arc<dyn LinkStore> = Arc::new(
        PostgresStorage::new(&config.database.url(), config.database.max_connections).await?,
    );
    info!("Initializing database...");
    postgres.init().await?;
    info!("Database schema ready");

    // Fast KV
    let redis = deadpool_redis::Config::from_url(config.redis.url())
        .create_pool(Some(deadpool_redis::Runtime::Tokio1))?;
    if config.server.mode == ServerMode::Debug {
        let mut conn = redis.get().await?;
        let _: () = deadpool_redis::redis::cmd("FLUSHDB")
            .query_async(&mut conn)
            .await?;
        info!("Flushed fast KV (debug mode)");
    }

    // Geo databases are optional: a failed open degrades to UNKNOWN lookups.
    let regions = match RegionResolver::new(
        config.geoip.city_db_path.as_deref(),
        config.geoip.asn_db_path.as_deref(),
    ) {
        Ok(resolver) => Arc::new(resolver),
        Err(err) => {
            warn!(error = %err, "geo databases unavailable, region lookups disabled");
            Arc::new(RegionResolver::disabled())
        }
    };

    let cached = Arc::new(CachedStorage::new(Arc::clone(&postgres), redis.clone()));
    let store: Arc<dyn LinkStore> = cached.clone();

    let engine = Arc::new(RedirectEngine::new(
        Arc::clone(&store),
        Arc::clone(&regions),
    ));
    let limiter = RateLimiter::new(&config.ratelimit);

    let api_state = Arc::new(AppState {
        store: Arc::clone(&store),
        shortlink: config.shortlink.clone(),
    });

    let app = Router::new()
        .merge(redirect::create_redirect_router(engine, limiter))
        .nest("/api/v1", api::create_api_router(api_state));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("🚀 Listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // Push any buffered counters to the durable store before exiting.
    cached.shutdown().await;
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            warn!("failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
