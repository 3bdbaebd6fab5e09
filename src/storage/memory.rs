//! In-memory store used by the integration tests and local development.
//!
//! Mirrors the Postgres semantics: duplicate codes conflict, rules iterate
//! priority-descending with insertion-order ties, and listings honor the same
//! filters, sort whitelist and 1-based pagination.

use anyhow::anyhow;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;

use crate::error::{Error, Result};
use crate::models::{
    ClickLog, ClickLogQuery, LinkQuery, Page, RedirectRule, ShortLink, SortDirection,
};
use crate::storage::LinkStore;

#[derive(Default)]
pub struct MemoryStorage {
    links: Mutex<HashMap<String, ShortLink>>,
    rules: Mutex<HashMap<i64, Vec<RedirectRule>>>,
    logs: Mutex<Vec<ClickLog>>,
    next_link_id: AtomicI64,
    next_rule_id: AtomicI64,
    next_log_id: AtomicI64,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            next_link_id: AtomicI64::new(1),
            next_rule_id: AtomicI64::new(1),
            next_log_id: AtomicI64::new(1),
            ..Default::default()
        }
    }

    fn lock<'a, T>(&self, mutex: &'a Mutex<T>) -> Result<MutexGuard<'a, T>> {
        mutex
            .lock()
            .map_err(|_| Error::Other(anyhow!("storage mutex poisoned")))
    }

    fn build_rule(&self, rule: &RedirectRule, link_id: i64) -> RedirectRule {
        let mut created = rule.clone();
        created.id = self.next_rule_id.fetch_add(1, Ordering::Relaxed);
        created.short_link_id = link_id;
        created
    }
}

fn sort_rules(rules: &mut [RedirectRule]) {
    rules.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
}

fn paginate<T>(items: Vec<T>, page: i64, page_size: i64) -> Page<T> {
    let total = items.len() as i64;
    let offset = ((page - 1) * page_size).max(0);
    let data: Vec<T> = items
        .into_iter()
        .skip(offset as usize)
        .take(page_size.max(0) as usize)
        .collect();
    Page::new(total, page, page_size, data)
}

#[async_trait]
impl LinkStore for MemoryStorage {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn create_link(&self, link: &ShortLink) -> Result<ShortLink> {
        let mut links = self.lock(&self.links)?;
        if links.contains_key(&link.short_code) {
            return Err(Error::CustomCodeExists);
        }
        let mut created = link.clone();
        created.id = self.next_link_id.fetch_add(1, Ordering::Relaxed);
        links.insert(created.short_code.clone(), created.clone());
        Ok(created)
    }

    async fn get_by_code(&self, code: &str) -> Result<ShortLink> {
        let links = self.lock(&self.links)?;
        links.get(code).cloned().ok_or(Error::NotFound)
    }

    async fn update_link(&self, link: &ShortLink) -> Result<ShortLink> {
        let mut links = self.lock(&self.links)?;
        let stored = links.get_mut(&link.short_code).ok_or(Error::NotFound)?;
        stored.long_url = link.long_url.clone();
        stored.user_id = link.user_id;
        stored.max_visits = link.max_visits;
        stored.expires_at = link.expires_at;
        stored.never_expire = link.never_expire;
        stored.default_redirect = link.default_redirect;
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn delete_link(&self, code: &str) -> Result<()> {
        let mut links = self.lock(&self.links)?;
        let removed = links.remove(code).ok_or(Error::NotFound)?;
        drop(links);
        self.lock(&self.rules)?.remove(&removed.id);
        Ok(())
    }

    async fn increment_clicks(&self, code: &str) -> Result<()> {
        if let Some(link) = self.lock(&self.links)?.get_mut(code) {
            link.clicks += 1;
        }
        Ok(())
    }

    async fn add_clicks(&self, code: &str, count: i64) -> Result<()> {
        if let Some(link) = self.lock(&self.links)?.get_mut(code) {
            link.clicks += count;
        }
        Ok(())
    }

    async fn log_click(&self, entry: &ClickLog) -> Result<()> {
        let mut logs = self.lock(&self.logs)?;
        let mut entry = entry.clone();
        entry.id = self.next_log_id.fetch_add(1, Ordering::Relaxed);
        logs.push(entry);
        Ok(())
    }

    async fn get_rules(&self, link_id: i64) -> Result<Vec<RedirectRule>> {
        let rules = self.lock(&self.rules)?;
        let mut rules = rules.get(&link_id).cloned().unwrap_or_default();
        sort_rules(&mut rules);
        Ok(rules)
    }

    async fn create_rule(&self, rule: &RedirectRule) -> Result<RedirectRule> {
        let created = self.build_rule(rule, rule.short_link_id);
        let mut rules = self.lock(&self.rules)?;
        rules
            .entry(rule.short_link_id)
            .or_default()
            .push(created.clone());
        Ok(created)
    }

    async fn update_rule(&self, rule: &RedirectRule) -> Result<RedirectRule> {
        let mut rules = self.lock(&self.rules)?;
        let set = rules.get_mut(&rule.short_link_id).ok_or(Error::NotFound)?;
        let stored = set
            .iter_mut()
            .find(|candidate| candidate.id == rule.id)
            .ok_or(Error::NotFound)?;
        let created_at = stored.created_at;
        *stored = rule.clone();
        stored.created_at = created_at;
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn delete_rule(&self, link_id: i64, rule_id: i64) -> Result<()> {
        let mut rules = self.lock(&self.rules)?;
        let set = rules.get_mut(&link_id).ok_or(Error::NotFound)?;
        let before = set.len();
        set.retain(|rule| rule.id != rule_id);
        if set.len() == before {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    async fn replace_all_rules(
        &self,
        link_id: i64,
        rules: &[RedirectRule],
    ) -> Result<Vec<RedirectRule>> {
        let created: Vec<RedirectRule> = rules
            .iter()
            .map(|rule| self.build_rule(rule, link_id))
            .collect();
        let mut stored = self.lock(&self.rules)?;
        stored.insert(link_id, created.clone());
        Ok(created)
    }

    async fn list_links(&self, query: &LinkQuery) -> Result<Page<ShortLink>> {
        let now = Utc::now();
        let filter = &query.filter;
        let links = self.lock(&self.links)?;
        let mut matching: Vec<ShortLink> = links
            .values()
            .filter(|link| {
                if let Some(user_id) = filter.user_id {
                    if link.user_id != Some(user_id) {
                        return false;
                    }
                }
                if let Some(expired) = filter.is_expired {
                    if link.is_expired(now) != expired {
                        return false;
                    }
                }
                if let Some(after) = filter.created_after {
                    if link.created_at < after {
                        return false;
                    }
                }
                if let Some(before) = filter.created_before {
                    if link.created_at > before {
                        return false;
                    }
                }
                if let Some(min) = filter.min_clicks {
                    if link.clicks < min {
                        return false;
                    }
                }
                if let Some(max) = filter.max_clicks {
                    if link.clicks > max {
                        return false;
                    }
                }
                true
            })
            .cloned()
            .collect();
        drop(links);

        matching.sort_by(|a, b| {
            let ord = match query.sort_field.as_deref() {
                Some("expires_at") => a.expires_at.cmp(&b.expires_at),
                Some("clicks") => a.clicks.cmp(&b.clicks),
                Some("short_code") => a.short_code.cmp(&b.short_code),
                _ => a.created_at.cmp(&b.created_at),
            };
            match query.sort_direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            }
        });

        Ok(paginate(matching, query.page, query.page_size))
    }

    async fn list_click_logs(
        &self,
        link_id: i64,
        query: &ClickLogQuery,
    ) -> Result<Page<ClickLog>> {
        let filter = &query.filter;
        let logs = self.lock(&self.logs)?;
        let mut matching: Vec<ClickLog> = logs
            .iter()
            .filter(|entry| {
                if entry.short_link_id != link_id {
                    return false;
                }
                if let Some(from) = filter.from {
                    if entry.created_at < from {
                        return false;
                    }
                }
                if let Some(until) = filter.until {
                    if entry.created_at > until {
                        return false;
                    }
                }
                if let Some(ip) = &filter.ip {
                    if &entry.ip != ip {
                        return false;
                    }
                }
                if let Some(country) = &filter.country {
                    if &entry.country != country {
                        return false;
                    }
                }
                if let Some(device) = filter.device {
                    if entry.device != device {
                        return false;
                    }
                }
                if let Some(rule_id) = filter.rule_id {
                    if entry.rule_id != Some(rule_id) {
                        return false;
                    }
                }
                true
            })
            .cloned()
            .collect();
        drop(logs);

        matching.sort_by(|a, b| {
            let ord = match query.sort_field.as_deref() {
                Some("ip") => a.ip.cmp(&b.ip),
                Some("country") => a.country.cmp(&b.country),
                Some("device") => i32::from(a.device).cmp(&i32::from(b.device)),
                Some("rule_id") => a.rule_id.cmp(&b.rule_id),
                _ => a.created_at.cmp(&b.created_at),
            };
            match query.sort_direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            }
        });

        Ok(paginate(matching, query.page, query.page_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RedirectKind;
    use chrono::Duration;

    fn sample_link(code: &str) -> ShortLink {
        let now = Utc::now();
        ShortLink {
            id: 0,
            short_code: code.to_string(),
            long_url: "https://example.com".to_string(),
            user_id: None,
            clicks: 0,
            max_visits: None,
            expires_at: now + Duration::days(30),
            never_expire: false,
            default_redirect: RedirectKind::Permanent,
            created_at: now,
            updated_at: now,
        }
    }

    fn sample_rule(link_id: i64, priority: i32) -> RedirectRule {
        let now = Utc::now();
        RedirectRule {
            id: 0,
            short_link_id: link_id,
            name: format!("rule-{priority}"),
            description: String::new(),
            priority,
            kind: RedirectKind::Temporary,
            target_url: String::new(),
            device: Default::default(),
            start_time: None,
            end_time: None,
            countries: Vec::new(),
            provinces: Vec::new(),
            cities: Vec::new(),
            percentage: None,
            max_visits: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn duplicate_codes_conflict() {
        let store = MemoryStorage::new();
        store.create_link(&sample_link("same")).await.unwrap();
        let err = store.create_link(&sample_link("same")).await.unwrap_err();
        assert!(matches!(err, Error::CustomCodeExists));
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = MemoryStorage::new();
        let created = store.create_link(&sample_link("abc123")).await.unwrap();
        let fetched = store.get_by_code("abc123").await.unwrap();
        assert_eq!(fetched.id, created.id);
        assert_eq!(fetched.long_url, created.long_url);
        assert_eq!(fetched.expires_at, created.expires_at);
    }

    #[tokio::test]
    async fn rules_iterate_priority_desc_with_stable_ties() {
        let store = MemoryStorage::new();
        let link = store.create_link(&sample_link("abc123")).await.unwrap();
        store.create_rule(&sample_rule(link.id, 10)).await.unwrap();
        store.create_rule(&sample_rule(link.id, 30)).await.unwrap();
        let tied_first = store.create_rule(&sample_rule(link.id, 20)).await.unwrap();
        store.create_rule(&sample_rule(link.id, 20)).await.unwrap();

        let rules = store.get_rules(link.id).await.unwrap();
        let priorities: Vec<i32> = rules.iter().map(|r| r.priority).collect();
        assert_eq!(priorities, vec![30, 20, 20, 10]);
        assert_eq!(rules[1].id, tied_first.id);
    }

    #[tokio::test]
    async fn replace_all_rules_swaps_the_set() {
        let store = MemoryStorage::new();
        let link = store.create_link(&sample_link("abc123")).await.unwrap();
        store.create_rule(&sample_rule(link.id, 1)).await.unwrap();

        let replacement = vec![sample_rule(link.id, 5), sample_rule(link.id, 7)];
        store
            .replace_all_rules(link.id, &replacement)
            .await
            .unwrap();

        let rules = store.get_rules(link.id).await.unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].priority, 7);
    }

    #[tokio::test]
    async fn counters_accumulate_per_code() {
        let store = MemoryStorage::new();
        store.create_link(&sample_link("abc123")).await.unwrap();
        store.increment_clicks("abc123").await.unwrap();
        store.increment_clicks("abc123").await.unwrap();
        store.add_clicks("abc123", 5).await.unwrap();
        let link = store.get_by_code("abc123").await.unwrap();
        assert_eq!(link.clicks, 7);
    }

    #[tokio::test]
    async fn listing_filters_and_paginates() {
        let store = MemoryStorage::new();
        for i in 0..25 {
            let mut link = sample_link(&format!("code{i:02}"));
            link.user_id = Some(if i < 10 { 1 } else { 2 });
            store.create_link(&link).await.unwrap();
        }

        let mut query = LinkQuery {
            page: 2,
            page_size: 10,
            ..Default::default()
        };
        query.sort_field = Some("short_code".to_string());
        query.sort_direction = SortDirection::Asc;

        let page = store.list_links(&query).await.unwrap();
        assert_eq!(page.total, 25);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.data.len(), 10);
        assert_eq!(page.data[0].short_code, "code10");

        query.filter.user_id = Some(1);
        query.page = 1;
        let page = store.list_links(&query).await.unwrap();
        assert_eq!(page.total, 10);
    }
}
