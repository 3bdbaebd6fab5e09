//! The redirect engine: the hot path turning a short code into a target URL
//! and a redirect kind.

mod rules;

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::geo::RegionResolver;
use crate::models::{ClickLog, DeviceType, RedirectKind};
use crate::storage::LinkStore;

use rules::{rule_matches, MatchContext};

/// Request attributes the engine needs to evaluate a rule chain.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub ip: String,
    pub user_agent: String,
    pub referer: String,
}

/// Outcome of a successful resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub target: String,
    pub kind: RedirectKind,
}

pub struct RedirectEngine {
    store: Arc<dyn LinkStore>,
    regions: Arc<RegionResolver>,
}

impl RedirectEngine {
    pub fn new(store: Arc<dyn LinkStore>, regions: Arc<RegionResolver>) -> Self {
        Self { store, regions }
    }

    /// Resolve a short code for one request.
    ///
    /// Lookup, expiry and cap checks surface typed errors; the counter bump
    /// and the click log are best-effort and never cancel the redirect.
    pub async fn resolve(&self, code: &str, ctx: &RequestContext) -> Result<Resolution> {
        let link = self.store.get_by_code(code).await?;
        let now = Utc::now();

        if link.is_expired(now) {
            return Err(Error::Expired);
        }
        if link.is_exhausted() {
            return Err(Error::MaxVisitsReached);
        }

        let rules = self.store.get_rules(link.id).await?;

        let device = DeviceType::from_user_agent(&ctx.user_agent);
        // Resolved once per request: rule matching and the click log share it.
        let region = self.regions.lookup(&ctx.ip);

        let mctx = MatchContext {
            device,
            now,
            region: &region,
        };
        let matched = rules.iter().find(|rule| rule_matches(rule, &mctx));

        let (target, kind, rule_id) = match matched {
            Some(rule) => {
                debug!(code, rule = %rule.name, "rule matched");
                let target = if rule.target_url.is_empty() {
                    link.long_url.clone()
                } else {
                    rule.target_url.clone()
                };
                (target, rule.kind, Some(rule.id))
            }
            None => (link.long_url.clone(), link.default_redirect, None),
        };

        let entry = ClickLog {
            id: 0,
            short_link_id: link.id,
            rule_id,
            ip: ctx.ip.clone(),
            user_agent: ctx.user_agent.clone(),
            referer: ctx.referer.clone(),
            country: region.country.clone(),
            device,
            created_at: now,
        };
        self.record_visit(code, entry).await;

        Ok(Resolution { target, kind })
    }

    async fn record_visit(&self, code: &str, entry: ClickLog) {
        if let Err(err) = self.store.increment_clicks(code).await {
            warn!(code, error = %err, "failed to increment click counter");
        }
        if let Err(err) = self.store.log_click(&entry).await {
            warn!(code, error = %err, "failed to enqueue click log");
        }
    }
}
