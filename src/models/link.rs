use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;

/// An integer code outside the domain of one of the wire enums.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct OutOfRange(pub String);

/// HTTP redirect semantics for a resolved short link.
///
/// Stored as an integer column; the wire encoding matches it. A value of 0
/// (unset rows from older writers) decodes as `Permanent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum RedirectKind {
    /// 301: Moved Permanently. May change method from POST to GET.
    #[default]
    Permanent,
    /// 302: Found. May change method from POST to GET.
    Temporary,
    /// 307: Temporary Redirect. Method and body are preserved.
    TemporaryKeepMethod,
    /// 308: Permanent Redirect. Method and body are preserved.
    PermanentKeepMethod,
}

impl TryFrom<i32> for RedirectKind {
    type Error = OutOfRange;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 | 1 => Ok(RedirectKind::Permanent),
            2 => Ok(RedirectKind::Temporary),
            3 => Ok(RedirectKind::TemporaryKeepMethod),
            4 => Ok(RedirectKind::PermanentKeepMethod),
            other => Err(OutOfRange(format!(
                "invalid redirect kind: {other}. Allowed: 1 (301), 2 (302), 3 (307), 4 (308)"
            ))),
        }
    }
}

impl From<RedirectKind> for i32 {
    fn from(kind: RedirectKind) -> Self {
        match kind {
            RedirectKind::Permanent => 1,
            RedirectKind::Temporary => 2,
            RedirectKind::TemporaryKeepMethod => 3,
            RedirectKind::PermanentKeepMethod => 4,
        }
    }
}

impl From<RedirectKind> for StatusCode {
    fn from(kind: RedirectKind) -> Self {
        match kind {
            RedirectKind::Permanent => StatusCode::MOVED_PERMANENTLY, // 301
            RedirectKind::Temporary => StatusCode::FOUND,             // 302
            RedirectKind::TemporaryKeepMethod => StatusCode::TEMPORARY_REDIRECT, // 307
            RedirectKind::PermanentKeepMethod => StatusCode::PERMANENT_REDIRECT, // 308
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ShortLink {
    pub id: i64,
    pub short_code: String,
    pub long_url: String,
    #[serde(default)]
    pub user_id: Option<i64>,
    pub clicks: i64,
    #[serde(default)]
    pub max_visits: Option<i64>,
    pub expires_at: DateTime<Utc>,
    pub never_expire: bool,
    #[sqlx(try_from = "i32")]
    pub default_redirect: RedirectKind,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ShortLink {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// The link-level visit cap: once `clicks` catches up with `max_visits`
    /// the link stops resolving.
    pub fn is_exhausted(&self) -> bool {
        matches!(self.max_visits, Some(max) if self.clicks >= max)
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateLinkRequest {
    pub long_url: String,
    #[serde(default)]
    pub custom_code: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub max_visits: Option<i64>,
    #[serde(default)]
    pub default_redirect: Option<RedirectKind>,
    #[serde(default)]
    pub never_expire: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdateLinkRequest {
    #[serde(default)]
    pub long_url: Option<String>,
    #[serde(default)]
    pub max_visits: Option<i64>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub never_expire: Option<bool>,
    #[serde(default)]
    pub default_redirect: Option<RedirectKind>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn redirect_kind_maps_to_http_status() {
        assert_eq!(
            StatusCode::from(RedirectKind::Permanent),
            StatusCode::MOVED_PERMANENTLY
        );
        assert_eq!(StatusCode::from(RedirectKind::Temporary), StatusCode::FOUND);
        assert_eq!(
            StatusCode::from(RedirectKind::TemporaryKeepMethod),
            StatusCode::TEMPORARY_REDIRECT
        );
        assert_eq!(
            StatusCode::from(RedirectKind::PermanentKeepMethod),
            StatusCode::PERMANENT_REDIRECT
        );
    }

    #[test]
    fn unset_kind_falls_back_to_permanent() {
        assert_eq!(RedirectKind::try_from(0).unwrap(), RedirectKind::Permanent);
        assert_eq!(RedirectKind::try_from(1).unwrap(), RedirectKind::Permanent);
        assert!(RedirectKind::try_from(5).is_err());
    }

    fn sample_link() -> ShortLink {
        let now = Utc::now();
        ShortLink {
            id: 1,
            short_code: "abc123".to_string(),
            long_url: "https://example.com".to_string(),
            user_id: None,
            clicks: 0,
            max_visits: None,
            expires_at: now + Duration::hours(1),
            never_expire: false,
            default_redirect: RedirectKind::Permanent,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn expiry_is_exclusive_of_the_boundary() {
        let link = sample_link();
        assert!(!link.is_expired(link.expires_at));
        assert!(link.is_expired(link.expires_at + Duration::seconds(1)));
    }

    #[test]
    fn exhaustion_requires_a_cap() {
        let mut link = sample_link();
        link.clicks = 1_000;
        assert!(!link.is_exhausted());
        link.max_visits = Some(1_000);
        assert!(link.is_exhausted());
        link.clicks = 999;
        assert!(!link.is_exhausted());
    }
}
