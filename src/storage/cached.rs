//! Redis-backed caching layer over a durable [`LinkStore`].
//!
//! Link records are cached write-through under `link:<code>` with a TTL equal
//! to their remaining lifetime; durable misses leave an empty-string negative
//! sentinel for five minutes. Rule sets live under `rules:<id>` and are
//! invalidated on every mutation. Click counters are buffered under
//! `clicks:<code>` and drained to the durable store by [`ClickDrainer`].
//!
//! Cache failures are never fatal: they are logged and the durable path
//! answers instead.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_redis::redis::{AsyncCommands, RedisResult};
use deadpool_redis::{Connection, Pool};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::models::{
    ClickLog, ClickLogQuery, LinkQuery, Page, RedirectKind, RedirectRule, ShortLink,
};
use crate::storage::clicks::ClickDrainer;
use crate::storage::LinkStore;

/// Deadline for cache operations on the request path.
const OP_TIMEOUT: Duration = Duration::from_secs(2);
/// Negative sentinel lifetime, guarding the durable store against miss storms.
const NEGATIVE_TTL_SECS: u64 = 300;
/// Rule cache lifetime.
const RULES_TTL_SECS: u64 = 300;

pub(crate) fn link_key(code: &str) -> String {
    format!("link:{code}")
}

pub(crate) fn rules_key(link_id: i64) -> String {
    format!("rules:{link_id}")
}

pub(crate) fn clicks_key(code: &str) -> String {
    format!("clicks:{code}")
}

pub(crate) fn sync_key(code: &str) -> String {
    format!("clicks_sync:{code}")
}

/// Canonical cached representation of a link. This is the one payload written
/// to the fast KV; the durable row is never serialized directly.
#[derive(Debug, Serialize, Deserialize)]
struct CachedLink {
    id: i64,
    long_url: String,
    expires_at: DateTime<Utc>,
    clicks: i64,
    max_visits: Option<i64>,
    default_redirect: i32,
    never_expire: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl CachedLink {
    fn from_link(link: &ShortLink) -> Self {
        Self {
            id: link.id,
            long_url: link.long_url.clone(),
            expires_at: link.expires_at,
            clicks: link.clicks,
            max_visits: link.max_visits,
            default_redirect: i32::from(link.default_redirect),
            never_expire: link.never_expire,
            created_at: link.created_at,
            updated_at: link.updated_at,
        }
    }

    fn into_link(self, code: &str) -> ShortLink {
        ShortLink {
            id: self.id,
            short_code: code.to_string(),
            long_url: self.long_url,
            user_id: None,
            clicks: self.clicks,
            max_visits: self.max_visits,
            expires_at: self.expires_at,
            never_expire: self.never_expire,
            default_redirect: RedirectKind::try_from(self.default_redirect).unwrap_or_default(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

enum CacheHit {
    Negative,
    Link(ShortLink),
}

async fn with_deadline<T>(fut: impl Future<Output = RedisResult<T>>) -> Result<T> {
    match tokio::time::timeout(OP_TIMEOUT, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(Error::Cache(err.to_string())),
        Err(_) => Err(Error::Cache("redis deadline exceeded".to_string())),
    }
}

async fn write_rules_cache(pool: Pool, link_id: i64, rules: &[RedirectRule]) -> Result<()> {
    let payload = serde_json::to_string(rules).map_err(|err| Error::Cache(err.to_string()))?;
    let mut conn = acquire(&pool).await?;
    with_deadline(conn.set_ex::<_, _, ()>(rules_key(link_id), payload, RULES_TTL_SECS)).await
}

async fn acquire(pool: &Pool) -> Result<Connection> {
    match tokio::time::timeout(OP_TIMEOUT, pool.get()).await {
        Ok(Ok(conn)) => Ok(conn),
        Ok(Err(err)) => Err(Error::Cache(err.to_string())),
        Err(_) => Err(Error::Cache("redis pool deadline exceeded".to_string())),
    }
}

pub struct CachedStorage {
    inner: Arc<dyn LinkStore>,
    redis: Pool,
    drainer: ClickDrainer,
}

impl CachedStorage {
    pub fn new(inner: Arc<dyn LinkStore>, redis: Pool) -> Self {
        let drainer = ClickDrainer::spawn(Arc::clone(&inner), redis.clone());
        Self {
            inner,
            redis,
            drainer,
        }
    }

    /// Stop the drainer after a final counter sweep. Called on shutdown.
    pub async fn shutdown(&self) {
        self.drainer.shutdown().await;
    }

    async fn conn(&self) -> Result<Connection> {
        acquire(&self.redis).await
    }

    async fn read_link_cache(&self, code: &str) -> Result<Option<CacheHit>> {
        let mut conn = self.conn().await?;
        let value: Option<String> = with_deadline(conn.get(link_key(code))).await?;
        match value {
            None => Ok(None),
            Some(raw) if raw.is_empty() => Ok(Some(CacheHit::Negative)),
            Some(raw) => match serde_json::from_str::<CachedLink>(&raw) {
                Ok(payload) => Ok(Some(CacheHit::Link(payload.into_link(code)))),
                Err(err) => {
                    debug!(code, error = %err, "unreadable link cache payload, reloading");
                    Ok(None)
                }
            },
        }
    }

    async fn write_link_cache(&self, link: &ShortLink) -> Result<()> {
        let ttl = (link.expires_at - Utc::now()).num_seconds();
        if ttl <= 0 {
            return Ok(());
        }
        let payload = serde_json::to_string(&CachedLink::from_link(link))
            .map_err(|err| Error::Cache(err.to_string()))?;
        let mut conn = self.conn().await?;
        with_deadline(conn.set_ex::<_, _, ()>(link_key(&link.short_code), payload, ttl as u64))
            .await
    }

    async fn write_negative(&self, code: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        with_deadline(conn.set_ex::<_, _, ()>(link_key(code), "", NEGATIVE_TTL_SECS)).await
    }

    async fn evict(&self, key: String) {
        match self.conn().await {
            Ok(mut conn) => {
                if let Err(err) = with_deadline(conn.del::<_, ()>(&key)).await {
                    warn!(key = %key, error = %err, "cache eviction failed");
                }
            }
            Err(err) => warn!(key = %key, error = %err, "cache eviction failed"),
        }
    }

    async fn invalidate_rules(&self, link_id: i64) {
        self.evict(rules_key(link_id)).await;
    }

    /// Bump the `clicks` field of the cached payload in place, preserving the
    /// remaining TTL. A bump lost to a concurrent writer is reconciled by the
    /// next full reload; the durable counter stays the ground truth.
    async fn bump_cached_clicks(&self, code: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        let raw: Option<String> = with_deadline(conn.get(link_key(code))).await?;
        let Some(raw) = raw.filter(|raw| !raw.is_empty()) else {
            return Ok(());
        };
        let mut payload: CachedLink = match serde_json::from_str(&raw) {
            Ok(payload) => payload,
            Err(_) => return Ok(()),
        };
        payload.clicks += 1;

        let ttl: i64 = with_deadline(conn.ttl(link_key(code))).await?;
        if ttl <= 0 {
            return Ok(());
        }
        let body =
            serde_json::to_string(&payload).map_err(|err| Error::Cache(err.to_string()))?;
        with_deadline(conn.set_ex::<_, _, ()>(link_key(code), body, ttl as u64)).await
    }

    async fn read_rules_cache(&self, link_id: i64) -> Result<Option<Vec<RedirectRule>>> {
        let mut conn = self.conn().await?;
        let raw: Option<String> = with_deadline(conn.get(rules_key(link_id))).await?;
        match raw {
            None => Ok(None),
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(rules) => Ok(Some(rules)),
                Err(err) => {
                    debug!(link_id, error = %err, "unreadable rules cache payload, reloading");
                    Ok(None)
                }
            },
        }
    }
}

#[async_trait]
impl LinkStore for CachedStorage {
    async fn init(&self) -> Result<()> {
        self.inner.init().await
    }

    async fn create_link(&self, link: &ShortLink) -> Result<ShortLink> {
        let created = self.inner.create_link(link).await?;
        if let Err(err) = self.write_link_cache(&created).await {
            warn!(code = %created.short_code, error = %err, "failed to cache new link");
        }
        Ok(created)
    }

    async fn get_by_code(&self, code: &str) -> Result<ShortLink> {
        match self.read_link_cache(code).await {
            Ok(Some(CacheHit::Negative)) => return Err(Error::NotFound),
            Ok(Some(CacheHit::Link(link))) => return Ok(link),
            Ok(None) => {}
            Err(err) => debug!(code, error = %err, "link cache read failed"),
        }

        match self.inner.get_by_code(code).await {
            Ok(link) => {
                if let Err(err) = self.write_link_cache(&link).await {
                    debug!(code, error = %err, "failed to cache link");
                }
                Ok(link)
            }
            Err(Error::NotFound) => {
                if let Err(err) = self.write_negative(code).await {
                    debug!(code, error = %err, "failed to write negative cache entry");
                }
                Err(Error::NotFound)
            }
            Err(other) => Err(other),
        }
    }

    async fn update_link(&self, link: &ShortLink) -> Result<ShortLink> {
        let updated = self.inner.update_link(link).await?;
        if let Err(err) = self.write_link_cache(&updated).await {
            warn!(code = %updated.short_code, error = %err, "failed to refresh link cache");
        }
        Ok(updated)
    }

    async fn delete_link(&self, code: &str) -> Result<()> {
        let link = self.inner.get_by_code(code).await?;
        self.inner.delete_link(code).await?;
        self.evict(link_key(code)).await;
        self.invalidate_rules(link.id).await;
        Ok(())
    }

    async fn increment_clicks(&self, code: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: i64 = with_deadline(conn.incr(clicks_key(code), 1i64)).await?;

        if let Err(err) = self.bump_cached_clicks(code).await {
            debug!(code, error = %err, "failed to bump cached click count");
        }

        self.drainer.touch(code);
        Ok(())
    }

    async fn add_clicks(&self, code: &str, count: i64) -> Result<()> {
        self.inner.add_clicks(code, count).await
    }

    async fn log_click(&self, entry: &ClickLog) -> Result<()> {
        // Click logs are observability, not a source of truth: append off the
        // request path and only log failures.
        let inner = Arc::clone(&self.inner);
        let entry = entry.clone();
        tokio::spawn(async move {
            if let Err(err) = inner.log_click(&entry).await {
                warn!(short_link_id = entry.short_link_id, error = %err, "failed to append click log");
            }
        });
        Ok(())
    }

    async fn get_rules(&self, link_id: i64) -> Result<Vec<RedirectRule>> {
        match self.read_rules_cache(link_id).await {
            Ok(Some(rules)) => return Ok(rules),
            Ok(None) => {}
            Err(err) => debug!(link_id, error = %err, "rules cache read failed"),
        }

        let rules = self.inner.get_rules(link_id).await?;

        // Populate the cache off the request path.
        let pool = self.redis.clone();
        let to_cache = rules.clone();
        tokio::spawn(async move {
            if let Err(err) = write_rules_cache(pool, link_id, &to_cache).await {
                debug!(link_id, error = %err, "failed to cache rules");
            }
        });

        Ok(rules)
    }

    async fn create_rule(&self, rule: &RedirectRule) -> Result<RedirectRule> {
        let created = self.inner.create_rule(rule).await?;
        self.invalidate_rules(created.short_link_id).await;
        Ok(created)
    }

    async fn update_rule(&self, rule: &RedirectRule) -> Result<RedirectRule> {
        let updated = self.inner.update_rule(rule).await?;
        self.invalidate_rules(updated.short_link_id).await;
        Ok(updated)
    }

    async fn delete_rule(&self, link_id: i64, rule_id: i64) -> Result<()> {
        self.inner.delete_rule(link_id, rule_id).await?;
        self.invalidate_rules(link_id).await;
        Ok(())
    }

    async fn replace_all_rules(
        &self,
        link_id: i64,
        rules: &[RedirectRule],
    ) -> Result<Vec<RedirectRule>> {
        let created = self.inner.replace_all_rules(link_id, rules).await?;
        self.invalidate_rules(link_id).await;
        Ok(created)
    }

    async fn list_links(&self, query: &LinkQuery) -> Result<Page<ShortLink>> {
        // Listings are uncached: they are large and change constantly.
        self.inner.list_links(query).await
    }

    async fn list_click_logs(
        &self,
        link_id: i64,
        query: &ClickLogQuery,
    ) -> Result<Page<ClickLog>> {
        self.inner.list_click_logs(link_id, query).await
    }
}
