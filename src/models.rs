// Core data structures for the keymesh spider and selector

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::str::FromStr;
use thiserror::Error;

/// A keyserver software version, totally ordered by (major, minor, patch)
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct ServerVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

/// Error returned when a version string does not parse as `X.Y.Z`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid version string: {0:?}")]
pub struct VersionParseError(pub String);

impl ServerVersion {
    /// The 1.0.10 release mishandles partial key lookups; the selector
    /// counts these servers for statistics but never hands out their IPs.
    pub const KNOWN_BAD: ServerVersion = ServerVersion {
        major: 1,
        minor: 0,
        patch: 10,
    };

    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Check whether this version is at least `other`
    pub fn is_at_least(&self, other: &ServerVersion) -> bool {
        self >= other
    }
}

impl FromStr for ServerVersion {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().splitn(3, '.');
        let mut next = || {
            parts
                .next()
                .and_then(|p| p.parse::<u32>().ok())
                .ok_or_else(|| VersionParseError(s.to_string()))
        };
        let major = next()?;
        let minor = next()?;
        let patch = next()?;
        Ok(Self {
            major,
            minor,
            patch,
        })
    }
}

impl std::fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Status information reported by a single keyserver node
///
/// Produced by a [`NodeProbe`](crate::spider::probe::NodeProbe); `ip_list`
/// is filled in by the spider from its DNS results, not by the probe.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NodeInfo {
    /// Hostname the probe queried
    pub hostname: String,

    /// Hostname the node reports for itself, when present
    pub self_hostname: Option<String>,

    /// Short node name the node reports for itself, when present
    pub self_nodename: Option<String>,

    /// Software version, when the status page carried a parseable one
    pub version: Option<ServerVersion>,

    /// Number of keys the node reports holding
    pub keycount: u64,

    /// HTTP `Server:` response header (empty if absent)
    pub server_header: String,

    /// HTTP `Via:` response header (empty if absent)
    pub via_header: String,

    /// Hostnames the node lists as gossip siblings
    pub gossip_peers: Vec<String>,

    /// Deduplicated resolved addresses, filled in by the spider
    pub ip_list: Vec<IpAddr>,
}

impl NodeInfo {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            ..Default::default()
        }
    }
}

/// A set of ISO 3166 alpha-2 country codes parsed from a CSV parameter
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CountrySet {
    codes: BTreeSet<String>,
}

impl CountrySet {
    /// Parse a comma-separated list; codes are trimmed and upper-cased,
    /// empty elements are dropped.
    pub fn parse(csv: &str) -> Self {
        let codes = csv
            .split(',')
            .map(|c| c.trim().to_ascii_uppercase())
            .filter(|c| !c.is_empty())
            .collect();
        Self { codes }
    }

    pub fn contains(&self, code: &str) -> bool {
        self.codes.contains(&code.to_ascii_uppercase())
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

impl std::fmt::Display for CountrySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for code in &self.codes {
            if !first {
                write!(f, ",")?;
            }
            write!(f, "{code}")?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parse() {
        let v: ServerVersion = "1.1.6".parse().unwrap();
        assert_eq!(v, ServerVersion::new(1, 1, 6));
        assert_eq!(v.to_string(), "1.1.6");
    }

    #[test]
    fn test_version_parse_rejects_garbage() {
        assert!("".parse::<ServerVersion>().is_err());
        assert!("1.1".parse::<ServerVersion>().is_err());
        assert!("one.two.three".parse::<ServerVersion>().is_err());
    }

    #[test]
    fn test_version_ordering() {
        let old: ServerVersion = "1.0.10".parse().unwrap();
        let new: ServerVersion = "1.1.6".parse().unwrap();
        assert!(new > old);
        assert!(new.is_at_least(&old));
        assert!(!old.is_at_least(&new));
        assert!(new.is_at_least(&new));
    }

    #[test]
    fn test_known_bad_release() {
        assert_eq!(ServerVersion::KNOWN_BAD, "1.0.10".parse().unwrap());
    }

    #[test]
    fn test_country_set_parse() {
        let set = CountrySet::parse("se, no ,FI,");
        assert!(set.contains("SE"));
        assert!(set.contains("no"));
        assert!(set.contains("fi"));
        assert!(!set.contains("DE"));
        assert_eq!(set.to_string(), "FI,NO,SE");
    }

    #[test]
    fn test_country_set_empty() {
        assert!(CountrySet::parse("").is_empty());
        assert!(CountrySet::parse(" , ").is_empty());
    }
}
