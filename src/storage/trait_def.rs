use async_trait::async_trait;

use crate::error::Result;
use crate::models::{
    ClickLog, ClickLogQuery, LinkQuery, Page, RedirectRule, ShortLink,
};

/// Durable record of links, rules and click logs.
///
/// `PostgresStorage` is the production implementation; `CachedStorage` wraps
/// any store with the Redis cache and counter buffer; `MemoryStorage` backs
/// tests and local development.
#[async_trait]
pub trait LinkStore: Send + Sync {
    /// Prepare the schema (run DDL, create indexes).
    async fn init(&self) -> Result<()>;

    /// Persist a new link. Fails with `CustomCodeExists` when the short code
    /// is already taken.
    async fn create_link(&self, link: &ShortLink) -> Result<ShortLink>;

    /// Fetch a link by its short code. Fails with `NotFound` on a miss.
    async fn get_by_code(&self, code: &str) -> Result<ShortLink>;

    /// Persist changed link fields. The click counter is owned by the
    /// increment/drain path and is never written here.
    async fn update_link(&self, link: &ShortLink) -> Result<ShortLink>;

    async fn delete_link(&self, code: &str) -> Result<()>;

    /// Best-effort single click bump for one resolve.
    async fn increment_clicks(&self, code: &str) -> Result<()>;

    /// Apply an aggregated click delta (the drain target).
    async fn add_clicks(&self, code: &str, count: i64) -> Result<()>;

    /// Best-effort append of one click log entry.
    async fn log_click(&self, entry: &ClickLog) -> Result<()>;

    /// Rules for a link, ordered by priority descending with stable ties.
    async fn get_rules(&self, link_id: i64) -> Result<Vec<RedirectRule>>;

    async fn create_rule(&self, rule: &RedirectRule) -> Result<RedirectRule>;

    async fn update_rule(&self, rule: &RedirectRule) -> Result<RedirectRule>;

    async fn delete_rule(&self, link_id: i64, rule_id: i64) -> Result<()>;

    /// Atomically swap the whole rule set of a link.
    async fn replace_all_rules(
        &self,
        link_id: i64,
        rules: &[RedirectRule],
    ) -> Result<Vec<RedirectRule>>;

    async fn list_links(&self, query: &LinkQuery) -> Result<Page<ShortLink>>;

    async fn list_click_logs(
        &self,
        link_id: i64,
        query: &ClickLogQuery,
    ) -> Result<Page<ClickLog>>;
}
