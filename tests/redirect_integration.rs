//! End-to-end tests for the resolve path, driving the routers over the
//! in-memory store.

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::{Duration as ChronoDuration, Utc};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use linkhop::api::{create_api_router, AppState};
use linkhop::config::{RateLimitConfig, ShortlinkConfig};
use linkhop::engine::RedirectEngine;
use linkhop::geo::RegionResolver;
use linkhop::models::{RedirectKind, ShortLink};
use linkhop::redirect::{create_redirect_router, RateLimiter};
use linkhop::storage::{LinkStore, MemoryStorage};

fn test_app_with_limit(requests: u32) -> (Router, Arc<MemoryStorage>) {
    let store = Arc::new(MemoryStorage::new());
    let dyn_store: Arc<dyn LinkStore> = store.clone();

    let engine = Arc::new(RedirectEngine::new(
        Arc::clone(&dyn_store),
        Arc::new(RegionResolver::disabled()),
    ));
    let limiter = RateLimiter::new(&RateLimitConfig {
        requests,
        duration: Duration::from_secs(3600),
    });
    let api_state = Arc::new(AppState {
        store: dyn_store,
        shortlink: ShortlinkConfig {
            length: 6,
            expiration: Duration::from_secs(86_400),
        },
    });

    let app = Router::new()
        .merge(create_redirect_router(engine, limiter))
        .nest("/api/v1", create_api_router(api_state));
    (app, store)
}

fn test_app() -> (Router, Arc<MemoryStorage>) {
    test_app_with_limit(10_000)
}

async fn response_json(body: Body) -> Value {
    let bytes = body.collect().await.expect("read body").to_bytes();
    serde_json::from_slice(&bytes).expect("parse JSON")
}

fn peer() -> ConnectInfo<SocketAddr> {
    ConnectInfo(SocketAddr::from(([8, 8, 8, 8], 443)))
}

fn resolve_request(code: &str, user_agent: &str) -> Request<Body> {
    Request::builder()
        .uri(format!("/{code}"))
        .header(header::USER_AGENT, user_agent)
        .extension(peer())
        .body(Body::empty())
        .unwrap()
}

async fn create_link(app: &Router, payload: Value) -> Value {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/links")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    response_json(response.into_body()).await
}

async fn put_rules(app: &Router, code: &str, rules: Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri(format!("/api/v1/links/{code}/rules"))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(rules.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn minted_code_redirects_permanently_and_counts_the_click() {
    let (app, store) = test_app();

    let created = create_link(&app, json!({ "long_url": "https://example.com/landing" })).await;
    let code = created["short_code"].as_str().unwrap().to_string();
    assert_eq!(code.len(), 6);

    let response = app
        .clone()
        .oneshot(resolve_request(&code, "Mozilla/5.0 (X11; Linux x86_64)"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        "https://example.com/landing"
    );

    let link = store.get_by_code(&code).await.unwrap();
    assert_eq!(link.clicks, 1);
}

#[tokio::test]
async fn configured_redirect_kind_controls_the_status() {
    let (app, _store) = test_app();

    let created = create_link(
        &app,
        json!({ "long_url": "https://example.com", "default_redirect": 2 }),
    )
    .await;
    let code = created["short_code"].as_str().unwrap();

    let response = app
        .clone()
        .oneshot(resolve_request(code, "curl/8"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
}

#[tokio::test]
async fn unknown_codes_return_404_with_the_documented_body() {
    let (app, _store) = test_app();

    let response = app
        .clone()
        .oneshot(resolve_request("zzzzzz", "curl/8"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body = response_json(response.into_body()).await;
    assert_eq!(body["code"], 404001);
    assert!(body["message"].is_string());
    assert!(body["details"].is_string());
}

#[tokio::test]
async fn expired_links_return_410() {
    let (app, store) = test_app();

    let now = Utc::now();
    store
        .create_link(&ShortLink {
            id: 0,
            short_code: "oldone".to_string(),
            long_url: "https://example.com".to_string(),
            user_id: None,
            clicks: 0,
            max_visits: None,
            expires_at: now - ChronoDuration::seconds(2),
            never_expire: false,
            default_redirect: RedirectKind::Permanent,
            created_at: now - ChronoDuration::days(1),
            updated_at: now - ChronoDuration::days(1),
        })
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(resolve_request("oldone", "curl/8"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::GONE);
    let body = response_json(response.into_body()).await;
    assert_eq!(body["code"], 410001);
}

#[tokio::test]
async fn visit_cap_returns_403_after_exhaustion() {
    let (app, _store) = test_app();

    let created = create_link(
        &app,
        json!({ "long_url": "https://example.com", "max_visits": 3 }),
    )
    .await;
    let code = created["short_code"].as_str().unwrap();

    for _ in 0..3 {
        let response = app
            .clone()
            .oneshot(resolve_request(code, "curl/8"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
    }

    let response = app
        .clone()
        .oneshot(resolve_request(code, "curl/8"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = response_json(response.into_body()).await;
    assert_eq!(body["code"], 403001);
}

#[tokio::test]
async fn device_scoped_rule_routes_mobile_traffic() {
    let (app, _store) = test_app();

    let created = create_link(&app, json!({ "long_url": "https://example.com/desktop" })).await;
    let code = created["short_code"].as_str().unwrap();

    put_rules(
        &app,
        code,
        json!([{
            "name": "mobile traffic",
            "priority": 10,
            "type": 2,
            "target_url": "https://m.example.com",
            "device": 1
        }]),
    )
    .await;

    let response = app
        .clone()
        .oneshot(resolve_request(
            code,
            "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0) Mobile/15E148",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        "https://m.example.com"
    );

    let response = app
        .clone()
        .oneshot(resolve_request(code, "Mozilla/5.0 (X11; Linux x86_64)"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        "https://example.com/desktop"
    );
}

#[tokio::test]
async fn highest_priority_rule_with_full_percentage_takes_all_traffic() {
    let (app, _store) = test_app();

    let created = create_link(&app, json!({ "long_url": "https://example.com" })).await;
    let code = created["short_code"].as_str().unwrap();

    put_rules(
        &app,
        code,
        json!([
            {
                "name": "experiment",
                "priority": 20,
                "type": 1,
                "target_url": "https://x.example.com",
                "percentage": 100
            },
            {
                "name": "control",
                "priority": 10,
                "type": 1,
                "target_url": "https://y.example.com"
            }
        ]),
    )
    .await;

    for _ in 0..50 {
        let response = app
            .clone()
            .oneshot(resolve_request(code, "curl/8"))
            .await
            .unwrap();
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "https://x.example.com"
        );
    }
}

#[tokio::test]
async fn requests_over_the_rate_budget_get_429() {
    let (app, _store) = test_app_with_limit(2);

    let created = create_link(&app, json!({ "long_url": "https://example.com" })).await;
    let code = created["short_code"].as_str().unwrap();

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(resolve_request(code, "curl/8"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
    }

    let response = app
        .clone()
        .oneshot(resolve_request(code, "curl/8"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = response_json(response.into_body()).await;
    assert_eq!(body["code"], 429001);
}

#[tokio::test]
async fn health_endpoint_is_always_open() {
    let (app, _store) = test_app_with_limit(1);

    for _ in 0..5 {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .extension(peer())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
