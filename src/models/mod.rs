mod link;
mod query;
mod rule;

pub use link::{CreateLinkRequest, OutOfRange, RedirectKind, ShortLink, UpdateLinkRequest};
pub use query::{
    ClickLogFilter, ClickLogQuery, LinkFilter, LinkQuery, Page, SortDirection,
    CLICK_LOG_SORT_FIELDS, LINK_SORT_FIELDS,
};
pub use rule::{ClickLog, CreateRuleRequest, DeviceType, RedirectRule};
