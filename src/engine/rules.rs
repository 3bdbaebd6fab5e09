//! Rule-chain predicates.
//!
//! Each predicate is a small matcher over `(rule, request)`; a rule matches
//! when every predicate holds. New dimensions slot in by extending the
//! matcher table.

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::geo::Region;
use crate::models::{DeviceType, RedirectRule};

pub(crate) struct MatchContext<'a> {
    pub device: DeviceType,
    pub now: DateTime<Utc>,
    pub region: &'a Region,
}

type Matcher = fn(&RedirectRule, &MatchContext) -> bool;

const MATCHERS: &[Matcher] = &[
    device_matches,
    window_contains_now,
    region_matches,
    visit_budget_open,
    percentage_admits,
];

/// True iff every predicate admits the request.
pub(crate) fn rule_matches(rule: &RedirectRule, ctx: &MatchContext) -> bool {
    MATCHERS.iter().all(|matcher| matcher(rule, ctx))
}

fn device_matches(rule: &RedirectRule, ctx: &MatchContext) -> bool {
    rule.device == DeviceType::All || rule.device == ctx.device
}

fn window_contains_now(rule: &RedirectRule, ctx: &MatchContext) -> bool {
    if let Some(start) = rule.start_time {
        if ctx.now < start {
            return false;
        }
    }
    if let Some(end) = rule.end_time {
        if ctx.now > end {
            return false;
        }
    }
    true
}

fn region_matches(rule: &RedirectRule, ctx: &MatchContext) -> bool {
    // Every non-empty set is an independent conjunct; empty sets don't care.
    if !rule.countries.is_empty() && !rule.countries.contains(&ctx.region.country) {
        return false;
    }
    if !rule.provinces.is_empty() && !rule.provinces.contains(&ctx.region.province) {
        return false;
    }
    if !rule.cities.is_empty() && !rule.cities.contains(&ctx.region.city) {
        return false;
    }
    true
}

/// A preset visit budget of zero or below disables the rule.
fn visit_budget_open(rule: &RedirectRule, _ctx: &MatchContext) -> bool {
    rule.max_visits.is_none_or(|budget| budget > 0)
}

/// A/B gate: admit `percentage` percent of requests. The roll is fresh per
/// evaluation; a process-local PRNG is sufficient here.
fn percentage_admits(rule: &RedirectRule, _ctx: &MatchContext) -> bool {
    match rule.percentage {
        None => true,
        Some(percentage) => rand::thread_rng().gen_range(1..=100) <= percentage,
    }
}
