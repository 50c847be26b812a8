//! Hostname admission policy and address screening for the crawl
//!
//! The mesh gossips whatever operators type into their membership files, so
//! the spider refuses pool aliases, mDNS names, bare IPs, and a short static
//! list of hosts known to serve garbage.

use lazy_static::lazy_static;
use std::collections::HashSet;
use std::net::IpAddr;

lazy_static! {
    /// Hosts never admitted to the crawl.
    static ref BLACKLISTED_HOSTS: HashSet<&'static str> = {
        let mut set = HashSet::new();
        set.insert("keyserver.pramberger.at");
        set.insert("keyserver.gingerbear.net");
        set
    };

    /// Hosts admitted as aliases but never queried directly; their status
    /// pages time out or answer for a different service.
    static ref DO_NOT_QUERY_HOSTS: HashSet<&'static str> = {
        let mut set = HashSet::new();
        set.insert("pgp.mit.edu");
        set.insert("keys.nayr.net");
        set
    };
}

pub fn is_blacklisted(hostname: &str) -> bool {
    BLACKLISTED_HOSTS.contains(hostname)
}

pub fn is_do_not_query(hostname: &str) -> bool {
    DO_NOT_QUERY_HOSTS.contains(hostname)
}

/// A hostname that is really an IP literal is never crawled; mesh entries
/// are deduplicated by resolved address, not by spelling.
pub fn is_ip_literal(hostname: &str) -> bool {
    hostname.parse::<IpAddr>().is_ok()
}

/// Addresses a public keyserver cannot legitimately resolve to.
pub fn ip_disallowed(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_unspecified()
                || v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_multicast()
        }
        IpAddr::V6(v6) => {
            v6.is_unspecified()
                || v6.is_loopback()
                || v6.is_multicast()
                // unique local fc00::/7
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                // link local fe80::/10
                || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}
