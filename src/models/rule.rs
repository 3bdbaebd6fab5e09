use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::link::OutOfRange;
use super::RedirectKind;

/// Device class derived from the User-Agent header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum DeviceType {
    #[default]
    All,
    Mobile,
    Desktop,
    Tablet,
}

impl DeviceType {
    /// Case-insensitive substring scan: `mobile` wins over `tablet`,
    /// anything else is a desktop.
    pub fn from_user_agent(user_agent: &str) -> Self {
        let ua = user_agent.to_ascii_lowercase();
        if ua.contains("mobile") {
            DeviceType::Mobile
        } else if ua.contains("tablet") {
            DeviceType::Tablet
        } else {
            DeviceType::Desktop
        }
    }
}

impl TryFrom<i32> for DeviceType {
    type Error = OutOfRange;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(DeviceType::All),
            1 => Ok(DeviceType::Mobile),
            2 => Ok(DeviceType::Desktop),
            3 => Ok(DeviceType::Tablet),
            other => Err(OutOfRange(format!("invalid device type: {other}"))),
        }
    }
}

impl From<DeviceType> for i32 {
    fn from(device: DeviceType) -> Self {
        match device {
            DeviceType::All => 0,
            DeviceType::Mobile => 1,
            DeviceType::Desktop => 2,
            DeviceType::Tablet => 3,
        }
    }
}

/// A single entry in a link's rule chain. Rules are evaluated highest
/// priority first; the first rule whose predicates all hold wins.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RedirectRule {
    pub id: i64,
    pub short_link_id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub priority: i32,
    #[serde(rename = "type")]
    #[sqlx(rename = "type", try_from = "i32")]
    pub kind: RedirectKind,
    /// Empty means "inherit the link's long URL".
    #[serde(default)]
    pub target_url: String,
    #[serde(default)]
    #[sqlx(try_from = "i32")]
    pub device: DeviceType,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub countries: Vec<String>,
    #[serde(default)]
    pub provinces: Vec<String>,
    #[serde(default)]
    pub cities: Vec<String>,
    /// A/B gate: 1..=100, admitting that share of traffic.
    #[serde(default)]
    pub percentage: Option<i32>,
    /// Preset visit budget; a value of zero or below disables the rule.
    #[serde(default)]
    pub max_visits: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RedirectRule {
    pub fn has_geo_constraints(&self) -> bool {
        !self.countries.is_empty() || !self.provinces.is_empty() || !self.cities.is_empty()
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateRuleRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(rename = "type")]
    pub kind: RedirectKind,
    #[serde(default)]
    pub target_url: String,
    #[serde(default)]
    pub device: DeviceType,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub countries: Vec<String>,
    #[serde(default)]
    pub provinces: Vec<String>,
    #[serde(default)]
    pub cities: Vec<String>,
    #[serde(default)]
    pub percentage: Option<i32>,
    #[serde(default)]
    pub max_visits: Option<i32>,
}

/// Append-only record of one resolve.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ClickLog {
    pub id: i64,
    pub short_link_id: i64,
    /// Populated when a rule matched the request.
    pub rule_id: Option<i64>,
    pub ip: String,
    pub user_agent: String,
    pub referer: String,
    pub country: String,
    #[sqlx(try_from = "i32")]
    pub device: DeviceType,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_detection_scans_the_user_agent() {
        assert_eq!(
            DeviceType::from_user_agent(
                "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) Mobile/15E148"
            ),
            DeviceType::Mobile
        );
        assert_eq!(
            DeviceType::from_user_agent("Mozilla/5.0 (Linux; Android 14; Tablet) Gecko"),
            DeviceType::Tablet
        );
        assert_eq!(
            DeviceType::from_user_agent("Mozilla/5.0 (X11; Linux x86_64)"),
            DeviceType::Desktop
        );
        // "mobile" takes precedence when both markers appear
        assert_eq!(
            DeviceType::from_user_agent("SomeBrowser Tablet Mobile"),
            DeviceType::Mobile
        );
    }

    #[test]
    fn geo_constraints_detected_on_any_set() {
        let mut rule: RedirectRule = serde_json::from_value(serde_json::json!({
            "id": 1,
            "short_link_id": 1,
            "name": "geo",
            "priority": 10,
            "type": 1,
            "created_at": "2026-01-01T00:00:00Z",
            "updated_at": "2026-01-01T00:00:00Z"
        }))
        .unwrap();
        assert!(!rule.has_geo_constraints());
        rule.provinces = vec!["浙江省".to_string()];
        assert!(rule.has_geo_constraints());
    }
}
