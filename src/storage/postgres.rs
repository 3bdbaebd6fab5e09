use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::error::{Error, Result};
use crate::models::{
    ClickLog, ClickLogFilter, ClickLogQuery, LinkFilter, LinkQuery, Page, RedirectRule, ShortLink,
};
use crate::storage::LinkStore;

/// Durable store backed by PostgreSQL. The schema is created on `init`.
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }
}

fn map_insert_error(err: sqlx::Error) -> Error {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return Error::CustomCodeExists;
        }
    }
    Error::from(err)
}

fn link_sort_column(field: Option<&str>) -> &'static str {
    // The whitelist is validated up front; this maps to static SQL so no
    // caller-supplied text ever reaches the query.
    match field {
        Some("expires_at") => "expires_at",
        Some("clicks") => "clicks",
        Some("short_code") => "short_code",
        _ => "created_at",
    }
}

fn click_log_sort_column(field: Option<&str>) -> &'static str {
    match field {
        Some("ip") => "ip",
        Some("country") => "country",
        Some("device") => "device",
        Some("rule_id") => "rule_id",
        _ => "created_at",
    }
}

fn push_link_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &LinkFilter) {
    let mut sep = " WHERE ";
    if let Some(user_id) = filter.user_id {
        qb.push(sep).push("user_id = ").push_bind(user_id);
        sep = " AND ";
    }
    if let Some(expired) = filter.is_expired {
        qb.push(sep).push(if expired {
            "expires_at < now()"
        } else {
            "expires_at >= now()"
        });
        sep = " AND ";
    }
    if let Some(after) = filter.created_after {
        qb.push(sep).push("created_at >= ").push_bind(after);
        sep = " AND ";
    }
    if let Some(before) = filter.created_before {
        qb.push(sep).push("created_at <= ").push_bind(before);
        sep = " AND ";
    }
    if let Some(min) = filter.min_clicks {
        qb.push(sep).push("clicks >= ").push_bind(min);
        sep = " AND ";
    }
    if let Some(max) = filter.max_clicks {
        qb.push(sep).push("clicks <= ").push_bind(max);
    }
}

fn push_click_log_filters(
    qb: &mut QueryBuilder<'_, Postgres>,
    link_id: i64,
    filter: &ClickLogFilter,
) {
    qb.push(" WHERE short_link_id = ").push_bind(link_id);
    if let Some(from) = filter.from {
        qb.push(" AND created_at >= ").push_bind(from);
    }
    if let Some(until) = filter.until {
        qb.push(" AND created_at <= ").push_bind(until);
    }
    if let Some(ip) = &filter.ip {
        qb.push(" AND ip = ").push_bind(ip.clone());
    }
    if let Some(country) = &filter.country {
        qb.push(" AND country = ").push_bind(country.clone());
    }
    if let Some(device) = filter.device {
        qb.push(" AND device = ").push_bind(i32::from(device));
    }
    if let Some(rule_id) = filter.rule_id {
        qb.push(" AND rule_id = ").push_bind(rule_id);
    }
}

#[async_trait]
impl LinkStore for PostgresStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS short_links (
                id BIGSERIAL PRIMARY KEY,
                short_code TEXT NOT NULL UNIQUE,
                long_url TEXT NOT NULL,
                user_id BIGINT,
                clicks BIGINT NOT NULL DEFAULT 0,
                max_visits BIGINT,
                expires_at TIMESTAMPTZ NOT NULL,
                never_expire BOOLEAN NOT NULL DEFAULT FALSE,
                default_redirect INTEGER NOT NULL DEFAULT 1,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS redirect_rules (
                id BIGSERIAL PRIMARY KEY,
                short_link_id BIGINT NOT NULL REFERENCES short_links(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                priority INTEGER NOT NULL DEFAULT 0,
                type INTEGER NOT NULL DEFAULT 1,
                target_url TEXT NOT NULL DEFAULT '',
                device INTEGER NOT NULL DEFAULT 0,
                start_time TIMESTAMPTZ,
                end_time TIMESTAMPTZ,
                countries TEXT[] NOT NULL DEFAULT '{}',
                provinces TEXT[] NOT NULL DEFAULT '{}',
                cities TEXT[] NOT NULL DEFAULT '{}',
                percentage INTEGER,
                max_visits INTEGER,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS click_logs (
                id BIGSERIAL PRIMARY KEY,
                short_link_id BIGINT NOT NULL,
                rule_id BIGINT,
                ip TEXT NOT NULL DEFAULT '',
                user_agent TEXT NOT NULL DEFAULT '',
                referer TEXT NOT NULL DEFAULT '',
                country TEXT NOT NULL DEFAULT '',
                device INTEGER NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_redirect_rules_link ON redirect_rules(short_link_id)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_click_logs_link ON click_logs(short_link_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn create_link(&self, link: &ShortLink) -> Result<ShortLink> {
        let row = sqlx::query_as::<_, ShortLink>(
            r#"
            INSERT INTO short_links
                (short_code, long_url, user_id, max_visits, expires_at,
                 never_expire, default_redirect, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(&link.short_code)
        .bind(&link.long_url)
        .bind(link.user_id)
        .bind(link.max_visits)
        .bind(link.expires_at)
        .bind(link.never_expire)
        .bind(i32::from(link.default_redirect))
        .bind(link.created_at)
        .bind(link.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_insert_error)?;

        Ok(row)
    }

    async fn get_by_code(&self, code: &str) -> Result<ShortLink> {
        sqlx::query_as::<_, ShortLink>("SELECT * FROM short_links WHERE short_code = $1")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(Error::NotFound)
    }

    async fn update_link(&self, link: &ShortLink) -> Result<ShortLink> {
        sqlx::query_as::<_, ShortLink>(
            r#"
            UPDATE short_links
            SET long_url = $2, user_id = $3, max_visits = $4, expires_at = $5,
                never_expire = $6, default_redirect = $7, updated_at = $8
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(link.id)
        .bind(&link.long_url)
        .bind(link.user_id)
        .bind(link.max_visits)
        .bind(link.expires_at)
        .bind(link.never_expire)
        .bind(i32::from(link.default_redirect))
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(Error::NotFound)
    }

    async fn delete_link(&self, code: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM short_links WHERE short_code = $1")
            .bind(code)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    async fn increment_clicks(&self, code: &str) -> Result<()> {
        sqlx::query("UPDATE short_links SET clicks = clicks + 1 WHERE short_code = $1")
            .bind(code)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn add_clicks(&self, code: &str, count: i64) -> Result<()> {
        sqlx::query("UPDATE short_links SET clicks = clicks + $2 WHERE short_code = $1")
            .bind(code)
            .bind(count)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn log_click(&self, entry: &ClickLog) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO click_logs
                (short_link_id, rule_id, ip, user_agent, referer, country, device, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(entry.short_link_id)
        .bind(entry.rule_id)
        .bind(&entry.ip)
        .bind(&entry.user_agent)
        .bind(&entry.referer)
        .bind(&entry.country)
        .bind(i32::from(entry.device))
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_rules(&self, link_id: i64) -> Result<Vec<RedirectRule>> {
        // `id ASC` pins priority ties to insertion order.
        let rules = sqlx::query_as::<_, RedirectRule>(
            r#"
            SELECT * FROM redirect_rules
            WHERE short_link_id = $1
            ORDER BY priority DESC, id ASC
            "#,
        )
        .bind(link_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rules)
    }

    async fn create_rule(&self, rule: &RedirectRule) -> Result<RedirectRule> {
        let row = sqlx::query_as::<_, RedirectRule>(
            r#"
            INSERT INTO redirect_rules
                (short_link_id, name, description, priority, type, target_url,
                 device, start_time, end_time, countries, provinces, cities,
                 percentage, max_visits, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            RETURNING *
            "#,
        )
        .bind(rule.short_link_id)
        .bind(&rule.name)
        .bind(&rule.description)
        .bind(rule.priority)
        .bind(i32::from(rule.kind))
        .bind(&rule.target_url)
        .bind(i32::from(rule.device))
        .bind(rule.start_time)
        .bind(rule.end_time)
        .bind(&rule.countries)
        .bind(&rule.provinces)
        .bind(&rule.cities)
        .bind(rule.percentage)
        .bind(rule.max_visits)
        .bind(rule.created_at)
        .bind(rule.updated_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn update_rule(&self, rule: &RedirectRule) -> Result<RedirectRule> {
        sqlx::query_as::<_, RedirectRule>(
            r#"
            UPDATE redirect_rules
            SET name = $3, description = $4, priority = $5, type = $6, target_url = $7,
                device = $8, start_time = $9, end_time = $10, countries = $11,
                provinces = $12, cities = $13, percentage = $14, max_visits = $15,
                updated_at = $16
            WHERE id = $1 AND short_link_id = $2
            RETURNING *
            "#,
        )
        .bind(rule.id)
        .bind(rule.short_link_id)
        .bind(&rule.name)
        .bind(&rule.description)
        .bind(rule.priority)
        .bind(i32::from(rule.kind))
        .bind(&rule.target_url)
        .bind(i32::from(rule.device))
        .bind(rule.start_time)
        .bind(rule.end_time)
        .bind(&rule.countries)
        .bind(&rule.provinces)
        .bind(&rule.cities)
        .bind(rule.percentage)
        .bind(rule.max_visits)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(Error::NotFound)
    }

    async fn delete_rule(&self, link_id: i64, rule_id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM redirect_rules WHERE id = $1 AND short_link_id = $2")
            .bind(rule_id)
            .bind(link_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    async fn replace_all_rules(
        &self,
        link_id: i64,
        rules: &[RedirectRule],
    ) -> Result<Vec<RedirectRule>> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM redirect_rules WHERE short_link_id = $1")
            .bind(link_id)
            .execute(&mut *tx)
            .await?;

        let mut created = Vec::with_capacity(rules.len());
        for rule in rules {
            let row = sqlx::query_as::<_, RedirectRule>(
                r#"
                INSERT INTO redirect_rules
                    (short_link_id, name, description, priority, type, target_url,
                     device, start_time, end_time, countries, provinces, cities,
                     percentage, max_visits, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
                RETURNING *
                "#,
            )
            .bind(link_id)
            .bind(&rule.name)
            .bind(&rule.description)
            .bind(rule.priority)
            .bind(i32::from(rule.kind))
            .bind(&rule.target_url)
            .bind(i32::from(rule.device))
            .bind(rule.start_time)
            .bind(rule.end_time)
            .bind(&rule.countries)
            .bind(&rule.provinces)
            .bind(&rule.cities)
            .bind(rule.percentage)
            .bind(rule.max_visits)
            .bind(rule.created_at)
            .bind(rule.updated_at)
            .fetch_one(&mut *tx)
            .await?;
            created.push(row);
        }

        tx.commit().await?;
        Ok(created)
    }

    async fn list_links(&self, query: &LinkQuery) -> Result<Page<ShortLink>> {
        let mut count_qb = QueryBuilder::<Postgres>::new("SELECT count(*) FROM short_links");
        push_link_filters(&mut count_qb, &query.filter);
        let total: i64 = count_qb.build_query_scalar().fetch_one(&self.pool).await?;

        let mut qb = QueryBuilder::<Postgres>::new("SELECT * FROM short_links");
        push_link_filters(&mut qb, &query.filter);
        qb.push(" ORDER BY ")
            .push(link_sort_column(query.sort_field.as_deref()))
            .push(" ")
            .push(query.sort_direction.as_sql())
            .push(" LIMIT ")
            .push_bind(query.page_size)
            .push(" OFFSET ")
            .push_bind(query.offset());

        let links = qb
            .build_query_as::<ShortLink>()
            .fetch_all(&self.pool)
            .await?;

        Ok(Page::new(total, query.page, query.page_size, links))
    }

    async fn list_click_logs(
        &self,
        link_id: i64,
        query: &ClickLogQuery,
    ) -> Result<Page<ClickLog>> {
        let mut count_qb = QueryBuilder::<Postgres>::new("SELECT count(*) FROM click_logs");
        push_click_log_filters(&mut count_qb, link_id, &query.filter);
        let total: i64 = count_qb.build_query_scalar().fetch_one(&self.pool).await?;

        let mut qb = QueryBuilder::<Postgres>::new("SELECT * FROM click_logs");
        push_click_log_filters(&mut qb, link_id, &query.filter);
        qb.push(" ORDER BY ")
            .push(click_log_sort_column(query.sort_field.as_deref()))
            .push(" ")
            .push(query.sort_direction.as_sql())
            .push(" LIMIT ")
            .push_bind(query.page_size)
            .push(" OFFSET ")
            .push_bind(query.offset());

        let logs = qb.build_query_as::<ClickLog>().fetch_all(&self.pool).await?;

        Ok(Page::new(total, query.page, query.page_size, logs))
    }
}
