use anyhow::anyhow;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use url::Url;

use crate::config::ShortlinkConfig;
use crate::error::{Error, Result};
use crate::mint;
use crate::models::{
    ClickLog, ClickLogFilter, ClickLogQuery, CreateLinkRequest, CreateRuleRequest, DeviceType,
    LinkFilter, LinkQuery, Page, RedirectRule, ShortLink, SortDirection, UpdateLinkRequest,
};
use crate::storage::LinkStore;

pub struct AppState {
    pub store: Arc<dyn LinkStore>,
    pub shortlink: ShortlinkConfig,
}

const MAX_URL_LENGTH: usize = 2048;
const MINT_ATTEMPTS: usize = 3;
/// "Never expire" is stored as a far-future expiry (~100 years).
const NEVER_EXPIRE_DAYS: i64 = 36_525;

/// A link together with its rule chain, as returned by the read endpoints.
#[derive(Serialize)]
pub struct LinkDetail {
    #[serde(flatten)]
    pub link: ShortLink,
    pub rules: Vec<RedirectRule>,
}

fn validate_long_url(raw: &str) -> Result<()> {
    if raw.len() > MAX_URL_LENGTH {
        return Err(Error::InvalidUrl(format!(
            "URL exceeds {MAX_URL_LENGTH} characters"
        )));
    }
    let parsed = Url::parse(raw).map_err(|err| Error::InvalidUrl(err.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(Error::InvalidUrl(format!("unsupported scheme: {other}"))),
    }
}

fn validate_code_param(code: &str) -> Result<()> {
    if code.is_empty() || code.len() > 16 {
        return Err(Error::InvalidInput("invalid short code".to_string()));
    }
    Ok(())
}

async fn code_available(store: &Arc<dyn LinkStore>, code: &str) -> Result<bool> {
    match store.get_by_code(code).await {
        Ok(_) => Ok(false),
        Err(Error::NotFound) => Ok(true),
        Err(other) => Err(other),
    }
}

async fn mint_unique_code(store: &Arc<dyn LinkStore>, length: usize) -> Result<String> {
    // Collisions are vanishingly rare at the default length; probe anyway and
    // retry a bounded number of times.
    for _ in 0..MINT_ATTEMPTS {
        let code = mint::generate(length)?;
        if code_available(store, &code).await? {
            return Ok(code);
        }
    }
    Err(Error::Other(anyhow!(
        "failed to mint a unique short code after {MINT_ATTEMPTS} attempts"
    )))
}

/// Fetch a link that must still be resolvable.
async fn get_live_link(store: &Arc<dyn LinkStore>, code: &str) -> Result<ShortLink> {
    validate_code_param(code)?;
    let link = store.get_by_code(code).await?;
    if link.is_expired(Utc::now()) {
        return Err(Error::Expired);
    }
    Ok(link)
}

pub async fn create_link(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateLinkRequest>,
) -> Result<(StatusCode, Json<ShortLink>)> {
    validate_long_url(&req.long_url)?;

    let now = Utc::now();
    if let Some(expires_at) = req.expires_at {
        if !req.never_expire && expires_at < now {
            return Err(Error::InvalidInput(
                "expiration time cannot be in the past".to_string(),
            ));
        }
    }

    let short_code = match req.custom_code.as_deref() {
        Some(code) if !code.is_empty() => {
            if !mint::validate_custom(code) {
                return Err(Error::InvalidCustomCode);
            }
            if !code_available(&state.store, code).await? {
                return Err(Error::CustomCodeExists);
            }
            code.to_string()
        }
        _ => mint_unique_code(&state.store, state.shortlink.length).await?,
    };

    let expires_at = if req.never_expire {
        now + Duration::days(NEVER_EXPIRE_DAYS)
    } else {
        req.expires_at.unwrap_or_else(|| {
            now + Duration::from_std(state.shortlink.expiration)
                .unwrap_or_else(|_| Duration::days(30))
        })
    };

    let link = ShortLink {
        id: 0,
        short_code,
        long_url: req.long_url,
        user_id: req.user_id,
        clicks: 0,
        max_visits: req.max_visits,
        expires_at,
        never_expire: req.never_expire,
        default_redirect: req.default_redirect.unwrap_or_default(),
        created_at: now,
        updated_at: now,
    };

    let created = state.store.create_link(&link).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn get_link(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Result<Json<LinkDetail>> {
    let link = get_live_link(&state.store, &code).await?;
    let rules = state.store.get_rules(link.id).await?;
    Ok(Json(LinkDetail { link, rules }))
}

pub async fn update_link(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    Json(req): Json<UpdateLinkRequest>,
) -> Result<Json<ShortLink>> {
    validate_code_param(&code)?;
    let mut link = state.store.get_by_code(&code).await?;
    let now = Utc::now();

    if let Some(long_url) = req.long_url {
        validate_long_url(&long_url)?;
        link.long_url = long_url;
    }
    if let Some(max_visits) = req.max_visits {
        link.max_visits = Some(max_visits);
    }
    if let Some(expires_at) = req.expires_at {
        if expires_at < now {
            return Err(Error::InvalidInput(
                "expiration time cannot be in the past".to_string(),
            ));
        }
        link.expires_at = expires_at;
    }
    if let Some(never_expire) = req.never_expire {
        link.never_expire = never_expire;
        if never_expire {
            link.expires_at = now + Duration::days(NEVER_EXPIRE_DAYS);
        }
    }
    if let Some(kind) = req.default_redirect {
        link.default_redirect = kind;
    }

    let updated = state.store.update_link(&link).await?;
    Ok(Json(updated))
}

pub async fn delete_link(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Result<StatusCode> {
    validate_code_param(&code)?;
    state.store.delete_link(&code).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct ListLinksParams {
    #[serde(default = "default_page")]
    page: i64,
    #[serde(default = "default_page_size")]
    page_size: i64,
    user_id: Option<i64>,
    is_expired: Option<bool>,
    min_clicks: Option<i64>,
    max_clicks: Option<i64>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    sort_field: Option<String>,
    sort_direction: Option<SortDirection>,
}

fn default_page() -> i64 {
    1
}

fn default_page_size() -> i64 {
    10
}

pub async fn list_links(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListLinksParams>,
) -> Result<Json<Page<LinkDetail>>> {
    let query = LinkQuery {
        page: params.page,
        page_size: params.page_size,
        filter: LinkFilter {
            user_id: params.user_id,
            is_expired: params.is_expired,
            created_after: params.start_time,
            created_before: params.end_time,
            min_clicks: params.min_clicks,
            max_clicks: params.max_clicks,
        },
        sort_field: params.sort_field,
        sort_direction: params.sort_direction.unwrap_or_default(),
    };
    query.validate()?;

    let page = state.store.list_links(&query).await?;

    // Attach the (cached) rule chain to each row.
    let mut detailed = Vec::with_capacity(page.data.len());
    for link in &page.data {
        let rules = state.store.get_rules(link.id).await.unwrap_or_default();
        detailed.push(LinkDetail {
            link: link.clone(),
            rules,
        });
    }

    Ok(Json(Page::new(
        page.total,
        page.current_page,
        page.page_size,
        detailed,
    )))
}

fn validate_rule_input(req: &CreateRuleRequest) -> Result<()> {
    if req.name.is_empty() {
        return Err(Error::InvalidInput("rule name is required".to_string()));
    }
    if let (Some(start), Some(end)) = (req.start_time, req.end_time) {
        if end < start {
            return Err(Error::InvalidInput(
                "end time cannot be earlier than start time".to_string(),
            ));
        }
    }
    if let Some(percentage) = req.percentage {
        if !(1..=100).contains(&percentage) {
            return Err(Error::InvalidInput(
                "percentage must be between 1 and 100".to_string(),
            ));
        }
    }
    if !req.target_url.is_empty() {
        validate_long_url(&req.target_url)?;
    }
    Ok(())
}

fn build_rule(link_id: i64, req: CreateRuleRequest, now: DateTime<Utc>) -> RedirectRule {
    RedirectRule {
        id: 0,
        short_link_id: link_id,
        name: req.name,
        description: req.description,
        priority: req.priority,
        kind: req.kind,
        target_url: req.target_url,
        device: req.device,
        start_time: req.start_time,
        end_time: req.end_time,
        countries: req.countries,
        provinces: req.provinces,
        cities: req.cities,
        percentage: req.percentage,
        max_visits: req.max_visits,
        created_at: now,
        updated_at: now,
    }
}

pub async fn create_rule(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    Json(req): Json<CreateRuleRequest>,
) -> Result<(StatusCode, Json<RedirectRule>)> {
    let link = get_live_link(&state.store, &code).await?;
    validate_rule_input(&req)?;

    let rule = build_rule(link.id, req, Utc::now());
    let created = state.store.create_rule(&rule).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn get_rules(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Result<Json<Vec<RedirectRule>>> {
    let link = get_live_link(&state.store, &code).await?;
    let rules = state.store.get_rules(link.id).await?;
    Ok(Json(rules))
}

pub async fn update_rule(
    State(state): State<Arc<AppState>>,
    Path((code, rule_id)): Path<(String, i64)>,
    Json(req): Json<CreateRuleRequest>,
) -> Result<Json<RedirectRule>> {
    let link = get_live_link(&state.store, &code).await?;
    validate_rule_input(&req)?;

    let mut rule = build_rule(link.id, req, Utc::now());
    rule.id = rule_id;
    let updated = state.store.update_rule(&rule).await?;
    Ok(Json(updated))
}

pub async fn delete_rule(
    State(state): State<Arc<AppState>>,
    Path((code, rule_id)): Path<(String, i64)>,
) -> Result<StatusCode> {
    let link = get_live_link(&state.store, &code).await?;
    state.store.delete_rule(link.id, rule_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn replace_rules(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    Json(reqs): Json<Vec<CreateRuleRequest>>,
) -> Result<Json<Vec<RedirectRule>>> {
    let link = get_live_link(&state.store, &code).await?;
    for req in &reqs {
        validate_rule_input(req)?;
    }

    let now = Utc::now();
    let rules: Vec<RedirectRule> = reqs
        .into_iter()
        .map(|req| build_rule(link.id, req, now))
        .collect();
    let created = state.store.replace_all_rules(link.id, &rules).await?;
    Ok(Json(created))
}

#[derive(Debug, Deserialize)]
pub struct ListClickLogsParams {
    #[serde(default = "default_page")]
    page: i64,
    #[serde(default = "default_page_size")]
    page_size: i64,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    ip: Option<String>,
    country: Option<String>,
    device: Option<i32>,
    rule_id: Option<i64>,
    sort_field: Option<String>,
    sort_direction: Option<SortDirection>,
}

pub async fn list_click_logs(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    Query(params): Query<ListClickLogsParams>,
) -> Result<Json<Page<ClickLog>>> {
    validate_code_param(&code)?;
    let link = state.store.get_by_code(&code).await?;

    let device = params
        .device
        .map(DeviceType::try_from)
        .transpose()
        .map_err(|err| Error::InvalidInput(err.to_string()))?;

    let query = ClickLogQuery {
        page: params.page,
        page_size: params.page_size,
        filter: ClickLogFilter {
            from: params.start_time,
            until: params.end_time,
            ip: params.ip,
            country: params.country,
            device,
            rule_id: params.rule_id,
        },
        sort_field: params.sort_field,
        sort_direction: params.sort_direction.unwrap_or_default(),
    };
    query.validate()?;

    let page = state.store.list_click_logs(link.id, &query).await?;
    Ok(Json(page))
}
