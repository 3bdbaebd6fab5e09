use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::DeviceType;

pub const MIN_PAGE_SIZE: i64 = 1;
pub const MAX_PAGE_SIZE: i64 = 100;

/// Sortable columns for link listings. Anything else is rejected before a
/// query is built.
pub const LINK_SORT_FIELDS: &[&str] = &["created_at", "expires_at", "clicks", "short_code"];

/// Sortable columns for click-log listings.
pub const CLICK_LOG_SORT_FIELDS: &[&str] = &["created_at", "ip", "country", "device", "rule_id"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LinkFilter {
    pub user_id: Option<i64>,
    pub is_expired: Option<bool>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub min_clicks: Option<i64>,
    pub max_clicks: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct LinkQuery {
    /// 1-based page number.
    pub page: i64,
    pub page_size: i64,
    pub filter: LinkFilter,
    pub sort_field: Option<String>,
    pub sort_direction: SortDirection,
}

impl Default for LinkQuery {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 10,
            filter: LinkFilter::default(),
            sort_field: None,
            sort_direction: SortDirection::Desc,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClickLogFilter {
    pub from: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub ip: Option<String>,
    pub country: Option<String>,
    pub device: Option<DeviceType>,
    pub rule_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct ClickLogQuery {
    pub page: i64,
    pub page_size: i64,
    pub filter: ClickLogFilter,
    pub sort_field: Option<String>,
    pub sort_direction: SortDirection,
}

impl Default for ClickLogQuery {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 10,
            filter: ClickLogFilter::default(),
            sort_field: None,
            sort_direction: SortDirection::Desc,
        }
    }
}

fn validate_paging(page: i64, page_size: i64) -> Result<()> {
    if page < 1 {
        return Err(Error::InvalidInput(
            "page must be a positive integer".to_string(),
        ));
    }
    if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size) {
        return Err(Error::InvalidInput(format!(
            "page_size must be between {MIN_PAGE_SIZE} and {MAX_PAGE_SIZE}"
        )));
    }
    Ok(())
}

fn validate_sort(field: Option<&str>, whitelist: &[&str]) -> Result<()> {
    match field {
        Some(field) if !whitelist.contains(&field) => Err(Error::InvalidInput(format!(
            "invalid sort field: {field}"
        ))),
        _ => Ok(()),
    }
}

impl LinkQuery {
    pub fn validate(&self) -> Result<()> {
        validate_paging(self.page, self.page_size)?;
        validate_sort(self.sort_field.as_deref(), LINK_SORT_FIELDS)
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.page_size
    }
}

impl ClickLogQuery {
    pub fn validate(&self) -> Result<()> {
        validate_paging(self.page, self.page_size)?;
        validate_sort(self.sort_field.as_deref(), CLICK_LOG_SORT_FIELDS)
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.page_size
    }
}

/// One page of a listing, with totals computed by the store.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub total: i64,
    pub total_pages: i64,
    pub current_page: i64,
    pub page_size: i64,
    pub data: Vec<T>,
}

impl<T> Page<T> {
    pub fn new(total: i64, current_page: i64, page_size: i64, data: Vec<T>) -> Self {
        let total_pages = if page_size > 0 {
            (total + page_size - 1) / page_size
        } else {
            0
        };
        Self {
            total,
            total_pages,
            current_page,
            page_size,
            data,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            total: self.total,
            total_pages: self.total_pages,
            current_page: self.current_page,
            page_size: self.page_size,
            data: self.data.into_iter().map(f).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paging_bounds_are_enforced() {
        let mut q = LinkQuery::default();
        assert!(q.validate().is_ok());

        q.page = 0;
        assert!(matches!(q.validate(), Err(Error::InvalidInput(_))));

        q.page = 1;
        q.page_size = 0;
        assert!(matches!(q.validate(), Err(Error::InvalidInput(_))));
        q.page_size = 101;
        assert!(matches!(q.validate(), Err(Error::InvalidInput(_))));
        q.page_size = 100;
        assert!(q.validate().is_ok());
    }

    #[test]
    fn unknown_sort_fields_are_rejected() {
        let mut q = LinkQuery::default();
        q.sort_field = Some("long_url".to_string());
        assert!(matches!(q.validate(), Err(Error::InvalidInput(_))));
        q.sort_field = Some("clicks".to_string());
        assert!(q.validate().is_ok());

        let mut lq = ClickLogQuery::default();
        lq.sort_field = Some("user_agent".to_string());
        assert!(matches!(lq.validate(), Err(Error::InvalidInput(_))));
        lq.sort_field = Some("created_at".to_string());
        assert!(lq.validate().is_ok());
    }

    #[test]
    fn page_totals_round_up() {
        let page = Page::new(11, 1, 10, vec![1, 2]);
        assert_eq!(page.total_pages, 2);
        let page = Page::new(0, 1, 10, Vec::<i32>::new());
        assert_eq!(page.total_pages, 0);
    }
}
