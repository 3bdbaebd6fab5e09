//! Visitor region resolution.
//!
//! Wraps memory-mapped MaxMind databases (City + optional ASN) behind a
//! process-wide resolver that callers inject. Loopback and private addresses
//! short-circuit to `LOCAL`; anything the database cannot answer degrades to
//! `UNKNOWN` instead of erroring.

use anyhow::{Context, Result};
use maxminddb::{geoip2, Mmap, Reader};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;

pub const LOCAL: &str = "LOCAL";
pub const UNKNOWN: &str = "UNKNOWN";

/// Geographic attribution of a visitor IP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub country: String,
    pub region: String,
    pub province: String,
    pub city: String,
    pub isp: String,
}

impl Region {
    fn uniform(value: &str) -> Self {
        Self {
            country: value.to_string(),
            region: value.to_string(),
            province: value.to_string(),
            city: value.to_string(),
            isp: value.to_string(),
        }
    }

    pub fn local() -> Self {
        Self::uniform(LOCAL)
    }

    pub fn unknown() -> Self {
        Self::uniform(UNKNOWN)
    }

    pub fn is_local(&self) -> bool {
        self.country == LOCAL
    }
}

/// Normalize a database field: absent values and the literal `0` placeholder
/// both become the empty string.
fn normalize(value: Option<&str>) -> String {
    match value {
        None | Some("0") => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Localized name lookup. Rule sets are commonly written against the
/// Chinese-localized names, so prefer `zh-CN` and fall back to English.
fn localized<'a>(names: &Option<std::collections::BTreeMap<&'a str, &'a str>>) -> Option<&'a str> {
    names
        .as_ref()
        .and_then(|names| names.get("zh-CN").or_else(|| names.get("en")).copied())
}

pub struct RegionResolver {
    city_reader: Option<Arc<Reader<Mmap>>>,
    asn_reader: Option<Arc<Reader<Mmap>>>,
}

impl RegionResolver {
    /// Open the backing databases once. Either path may be absent; lookups
    /// then degrade to `UNKNOWN` for the missing dimension.
    pub fn new(city_path: Option<&str>, asn_path: Option<&str>) -> Result<Self> {
        let city_reader = match city_path {
            Some(path) => {
                let reader = Reader::open_mmap(path)
                    .with_context(|| format!("failed to open geo city database at {path}"))?;
                Some(Arc::new(reader))
            }
            None => None,
        };

        let asn_reader = match asn_path {
            Some(path) => {
                let reader = Reader::open_mmap(path)
                    .with_context(|| format!("failed to open geo ASN database at {path}"))?;
                Some(Arc::new(reader))
            }
            None => None,
        };

        Ok(Self {
            city_reader,
            asn_reader,
        })
    }

    /// A resolver without backing databases; every non-local lookup returns
    /// `UNKNOWN`. Used when the databases are not configured or fail to open.
    pub fn disabled() -> Self {
        Self {
            city_reader: None,
            asn_reader: None,
        }
    }

    /// Map an IP string to its region. Never fails: unparseable input and
    /// database misses return an `UNKNOWN` region.
    pub fn lookup(&self, ip_text: &str) -> Region {
        if ip_text.eq_ignore_ascii_case("localhost") {
            return Region::local();
        }

        let ip: IpAddr = match ip_text.parse() {
            Ok(ip) => ip,
            Err(_) => return Region::unknown(),
        };

        if is_local_address(ip) {
            return Region::local();
        }

        let Some(city_reader) = self.city_reader.as_ref() else {
            return Region::unknown();
        };

        let mut region = match city_reader.lookup::<geoip2::City>(ip) {
            Ok(city) => Region {
                country: normalize(city.country.as_ref().and_then(|c| localized(&c.names))),
                // The City schema has no coarse-region dimension.
                region: String::new(),
                province: normalize(
                    city.subdivisions
                        .as_ref()
                        .and_then(|subs| subs.first())
                        .and_then(|sub| localized(&sub.names)),
                ),
                city: normalize(city.city.as_ref().and_then(|c| localized(&c.names))),
                isp: String::new(),
            },
            _ => return Region::unknown(),
        };

        if let Some(asn_reader) = self.asn_reader.as_ref() {
            if let Ok(asn) = asn_reader.lookup::<geoip2::Asn>(ip) {
                region.isp = normalize(asn.autonomous_system_organization);
            }
        }

        region
    }
}

fn is_local_address(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private(),
        IpAddr::V6(v6) => v6.is_loopback(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_and_private_addresses_are_local() {
        let resolver = RegionResolver::disabled();
        for ip in ["127.0.0.1", "10.0.0.1", "172.16.4.2", "192.168.0.1", "::1", "localhost"] {
            let region = resolver.lookup(ip);
            assert!(region.is_local(), "{ip} should be LOCAL");
            assert_eq!(region, Region::local());
        }
    }

    #[test]
    fn public_addresses_without_a_database_are_unknown() {
        let resolver = RegionResolver::disabled();
        assert_eq!(resolver.lookup("8.8.8.8"), Region::unknown());
        assert_eq!(resolver.lookup("2001:4860:4860::8888"), Region::unknown());
    }

    #[test]
    fn garbage_input_is_unknown() {
        let resolver = RegionResolver::disabled();
        assert_eq!(resolver.lookup("not-an-ip"), Region::unknown());
        assert_eq!(resolver.lookup(""), Region::unknown());
        assert_eq!(resolver.lookup("999.999.999.999"), Region::unknown());
    }

    #[test]
    fn zero_placeholder_fields_normalize_to_empty() {
        assert_eq!(normalize(Some("0")), "");
        assert_eq!(normalize(None), "");
        assert_eq!(normalize(Some("中国")), "中国");
    }

    #[test]
    fn missing_database_path_is_an_error() {
        assert!(RegionResolver::new(Some("/nonexistent/geo.mmdb"), None).is_err());
        assert!(RegionResolver::new(None, None).is_ok());
    }
}
