use axum::routing::{get, put};
use axum::Router;
use std::sync::Arc;

use super::handlers::{
    create_link, create_rule, delete_link, delete_rule, get_link, get_rules, list_click_logs,
    list_links, replace_rules, update_link, update_rule, AppState,
};

pub fn create_api_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/links", get(list_links).post(create_link))
        .route(
            "/links/{code}",
            get(get_link).put(update_link).delete(delete_link),
        )
        .route(
            "/links/{code}/rules",
            get(get_rules).post(create_rule).put(replace_rules),
        )
        .route(
            "/links/{code}/rules/{rule_id}",
            put(update_rule).delete(delete_rule),
        )
        .route("/links/{code}/logs", get(list_click_logs))
        .with_state(state)
}
