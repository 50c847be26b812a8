//! Valid-IP selection over a published snapshot
//!
//! Given per-server key counts, the selector discards statistic-distorting
//! outliers, then of what remains discards servers too far from normal, and
//! anchors its threshold on the best servers: find the mode-sized bucket
//! after quantizing keycounts by `bucket_size`, drop anything more than
//! five standard deviations from that bucket's mean, and hang the threshold
//! off the second-highest remaining value minus daily jitter and one
//! standard deviation. Statistics run on one IP per server so dual-stack
//! boxes are not double-weighted; filtering runs on every IP.
//!
//! The selector is pure over an immutable snapshot: aborts are values, not
//! errors, and every reason string is a stable code clients can match on.

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::net::IpAddr;
use tracing::debug;

use crate::config::SelectorConfig;
use crate::models::{CountrySet, ServerVersion};
use crate::snapshot::MeshSnapshot;

lazy_static! {
    /// Products a keyserver serves natively in its `Server:` header;
    /// anything else in front of a node counts as a web proxy.
    static ref SERVER_HEADERS_NATIVE: HashSet<&'static str> = {
        let mut set = HashSet::new();
        set.insert("sks_www");
        set.insert("hockeypuck");
        set
    };
}

/// Client-supplied filters for one selection
#[derive(Debug, Clone, Default)]
pub struct SelectorQuery {
    /// Drop servers older than this version
    pub minimum_version: Option<ServerVersion>,

    /// Require a `Via:` header or a non-native `Server:` header
    pub limit_to_proxies: bool,

    /// Require at least one IP resolving to a listed country
    pub limit_to_countries: Option<CountrySet>,

    /// Replace the computed threshold when positive
    pub threshold_override: Option<u64>,
}

/// Result of one selection pass
#[derive(Debug, Clone)]
pub enum Selection {
    Valid {
        ips: Vec<IpAddr>,
        threshold: i64,
        tags: Vec<&'static str>,
        collected: DateTime<Utc>,
    },
    Invalid {
        reason: String,
    },
}

/// A selection plus the human-readable statistics recorded on the way
#[derive(Debug)]
pub struct SelectorOutcome {
    pub selection: Selection,
    pub stats: Vec<String>,
}

fn invalid(reason: impl Into<String>, stats: Vec<String>) -> SelectorOutcome {
    SelectorOutcome {
        selection: Selection::Invalid {
            reason: reason.into(),
        },
        stats,
    }
}

/// Compute the set of IPs clients should use right now
pub fn select_valid_ips(
    snapshot: &MeshSnapshot,
    query: &SelectorQuery,
    config: &SelectorConfig,
) -> SelectorOutcome {
    let mut stats: Vec<String> = Vec::new();

    // Stats avoid double-weighting dual-stack boxes by working with just
    // one IP per box; filtering later deals with all the IPs.
    let mut ips_one_per_server: BTreeMap<IpAddr, u64> = BTreeMap::new();
    let mut ips_all: BTreeMap<IpAddr, u64> = BTreeMap::new();

    let mut count_servers_1010 = 0usize;
    let mut count_servers_too_old = 0usize;
    let mut count_servers_unwanted_server = 0usize;
    let mut count_servers_wrong_country = 0usize;
    let mut ips_skip_1010: BTreeSet<IpAddr> = BTreeSet::new();
    let mut ips_too_old: BTreeSet<IpAddr> = BTreeSet::new();
    let mut ips_unwanted_server: BTreeSet<IpAddr> = BTreeSet::new();
    let mut ips_wrong_country: BTreeSet<IpAddr> = BTreeSet::new();

    for name in &snapshot.sorted {
        let Some(node) = snapshot.host_map.get(name) else {
            continue;
        };
        if node.keycount <= 1 {
            stats.push(format!(
                "dropping server <{name}> with {} keys",
                node.keycount
            ));
            continue;
        }

        // 1.0.10 servers stay in the statistics; only their IPs are
        // withheld at the end.
        let skip_this_1010 = node.version == Some(ServerVersion::KNOWN_BAD);
        if skip_this_1010 {
            count_servers_1010 += 1;
        }

        let mut skip_this_age = false;
        if let Some(minimum) = &query.minimum_version {
            let new_enough = node.version.map(|v| v.is_at_least(minimum)).unwrap_or(false);
            if !new_enough {
                skip_this_age = true;
                count_servers_too_old += 1;
            }
        }

        let mut skip_this_nonproxy = false;
        if query.limit_to_proxies && node.via_header.is_empty() {
            let product = node
                .server_header
                .split('/')
                .next()
                .unwrap_or_default()
                .to_ascii_lowercase();
            if SERVER_HEADERS_NATIVE.contains(product.as_str()) {
                skip_this_nonproxy = true;
                count_servers_unwanted_server += 1;
            }
        }

        let mut skip_this_country = false;
        if let Some(countries) = &query.limit_to_countries {
            let keep = node
                .ip_list
                .iter()
                .any(|ip| countries.contains(snapshot.country_for(*ip)));
            if !keep {
                skip_this_country = true;
                count_servers_wrong_country += 1;
            }
        }

        if let Some(first_ip) = node.ip_list.first() {
            ips_one_per_server.insert(*first_ip, node.keycount);
            for ip in &node.ip_list {
                ips_all.insert(*ip, node.keycount);
                if skip_this_1010 {
                    ips_skip_1010.insert(*ip);
                }
                if skip_this_age {
                    ips_too_old.insert(*ip);
                }
                if skip_this_nonproxy {
                    ips_unwanted_server.insert(*ip);
                }
                if skip_this_country {
                    ips_wrong_country.insert(*ip);
                }
            }
        }
    }

    let mut buckets: BTreeMap<u64, Vec<u64>> = BTreeMap::new();
    for count in ips_one_per_server.values() {
        buckets
            .entry(count / config.bucket_size)
            .or_default()
            .push(*count);
    }
    if buckets.is_empty() {
        return invalid("broken_no_buckets", stats);
    }

    // Mode bucket; ties go to the lowest bucket key.
    let mut largest_bucket = 0u64;
    let mut largest_bucket_len = 0usize;
    for (key, members) in &buckets {
        if members.len() > largest_bucket_len {
            largest_bucket = *key;
            largest_bucket_len = members.len();
        }
    }

    let mode = &buckets[&largest_bucket];
    let first_n = mode.len();
    let first_mean = mode.iter().sum::<u64>() as f64 / first_n as f64;
    let first_sd = (mode
        .iter()
        .map(|v| {
            let d = *v as f64 - first_mean;
            d * d
        })
        .sum::<f64>()
        / first_n as f64)
        .sqrt();
    let first_bounds_min = (first_mean - 5.0 * first_sd) as i64;
    let first_bounds_max = (first_mean + 5.0 * first_sd) as i64;

    let in_bounds =
        |count: u64| first_bounds_min <= count as i64 && count as i64 <= first_bounds_max;
    let first_ips: BTreeMap<IpAddr, u64> = ips_one_per_server
        .iter()
        .filter(|(_, count)| in_bounds(**count))
        .map(|(ip, count)| (*ip, *count))
        .collect();
    let first_ips_all: BTreeMap<IpAddr, u64> = ips_all
        .iter()
        .filter(|(_, count)| in_bounds(**count))
        .map(|(ip, count)| (*ip, *count))
        .collect();

    if first_ips.is_empty() {
        stats.push(String::from("no servers within bounds"));
        return invalid("broken_data", stats);
    }

    let second_mean = first_ips.values().sum::<u64>() as f64 / first_ips.len() as f64;
    let second_sd = (first_ips
        .values()
        .map(|v| {
            let d = *v as f64 - second_mean;
            d * d
        })
        .sum::<f64>()
        / first_ips.len() as f64)
        .sqrt();

    stats.push(format!(
        "have {} servers in {} buckets ({} ips total)",
        ips_one_per_server.len(),
        buckets.len(),
        ips_all.len()
    ));
    for (key, members) in &buckets {
        stats.push(format!("{key:6}: {}", "*".repeat(members.len())));
    }
    stats.push(format!(
        "largest bucket is {largest_bucket} with {first_n} entries"
    ));
    stats.push(format!(
        "bucket size {} means bucket {} is [{}, {})",
        config.bucket_size,
        largest_bucket,
        config.bucket_size * largest_bucket,
        config.bucket_size * (largest_bucket + 1)
    ));
    stats.push(format!(
        "largest bucket: mean={first_mean:.6} sd={first_sd:.6}"
    ));
    stats.push(format!(
        "first bounds: [{first_bounds_min}, {first_bounds_max}]"
    ));
    stats.push(format!(
        "have {} servers within bounds, mean value {second_mean:.6} sd={second_sd:.6}",
        first_ips.len()
    ));

    if second_mean < config.keys_sanity_min as f64 {
        stats.push(format!(
            "mean {second_mean:.6} < {}",
            config.keys_sanity_min
        ));
        return invalid("broken_data", stats);
    }

    // The second-largest in-bounds value is the threshold base: robust
    // against a single node running ahead of the fleet.
    let mut threshold_candidates: Vec<u64> = first_ips.values().copied().collect();
    threshold_candidates.sort_unstable();
    let base_index = threshold_candidates.len().saturating_sub(2);
    let threshold_base = threshold_candidates[base_index];
    let mut threshold =
        threshold_base as i64 - (config.keys_daily_jitter as i64 + second_sd as i64);

    stats.push(format!(
        "second largest count within bounds: {threshold_base}"
    ));
    stats.push(format!("threshold: {threshold}"));

    if let Some(requested) = query.threshold_override {
        if requested > 0 {
            stats.push(format!(
                "overriding threshold from query parameter; {threshold} -> {requested}"
            ));
            threshold = requested as i64;
        }
    }

    let mut ips: Vec<IpAddr> = first_ips_all
        .iter()
        .filter(|(_, count)| **count as i64 >= threshold)
        .map(|(ip, _)| *ip)
        .collect();
    if ips.is_empty() {
        stats.push(format!("no IPs above threshold {threshold}"));
        return invalid("threshold_too_high", stats);
    }

    ips = filter_out(
        &mut stats,
        "running version v1.0.10",
        &ips_skip_1010,
        count_servers_1010,
        ips,
    );
    if ips.is_empty() {
        return invalid("No_servers_left_after_v1.0.10_filter", stats);
    }

    if let Some(minimum) = &query.minimum_version {
        ips = filter_out(
            &mut stats,
            &format!("running version < v{minimum}"),
            &ips_too_old,
            count_servers_too_old,
            ips,
        );
        if ips.is_empty() {
            return invalid(
                format!("No_servers_left_after_minimum_version_filter_(v{minimum})"),
                stats,
            );
        }
    }

    if let Some(countries) = &query.limit_to_countries {
        ips = filter_out(
            &mut stats,
            &format!("not in countries [{countries}]"),
            &ips_wrong_country,
            count_servers_wrong_country,
            ips,
        );
        if ips.is_empty() {
            return invalid(
                format!("No_servers_left_after_country_filter_[{countries}]"),
                stats,
            );
        }
    }

    if query.limit_to_proxies {
        ips = filter_out(
            &mut stats,
            "not behind a web-proxy",
            &ips_unwanted_server,
            count_servers_unwanted_server,
            ips,
        );
        if ips.is_empty() {
            return invalid("No_servers_left_after_proxies_filter", stats);
        }
    }

    debug!(count = ips.len(), total = ips_all.len(), "yielding valid IPs");

    SelectorOutcome {
        selection: Selection::Valid {
            ips,
            threshold,
            // alg_5 keeps 1.0.10 servers in the statistics long enough to
            // compute them, then withholds their IPs.
            tags: vec!["skip_1010", "alg_5"],
            collected: snapshot.collected_at,
        },
        stats,
    }
}

fn filter_out(
    stats: &mut Vec<String>,
    rationale: &str,
    eliminate: &BTreeSet<IpAddr>,
    server_count: usize,
    candidates: Vec<IpAddr>,
) -> Vec<IpAddr> {
    let candidate_set: HashSet<IpAddr> = candidates.iter().copied().collect();
    let already_dropped = eliminate
        .iter()
        .filter(|ip| !candidate_set.contains(ip))
        .count();
    let kept: Vec<IpAddr> = candidates
        .into_iter()
        .filter(|ip| !eliminate.contains(ip))
        .collect();
    stats.push(format!(
        "dropping all {server_count} servers {rationale}, for {} possible IPs but {already_dropped} of those already dropped",
        eliminate.len()
    ));
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NodeInfo;

    fn config() -> SelectorConfig {
        SelectorConfig {
            bucket_size: 1000,
            keys_sanity_min: 1000,
            keys_daily_jitter: 100,
        }
    }

    #[test]
    fn test_empty_snapshot_has_no_buckets() {
        let outcome = select_valid_ips(
            &MeshSnapshot::empty(),
            &SelectorQuery::default(),
            &config(),
        );
        match outcome.selection {
            Selection::Invalid { reason } => assert_eq!(reason, "broken_no_buckets"),
            Selection::Valid { .. } => panic!("expected invalid selection"),
        }
    }

    #[test]
    fn test_keycount_one_is_dropped() {
        let mut snapshot = MeshSnapshot::empty();
        let mut node = NodeInfo::new("tiny.example.net");
        node.keycount = 1;
        node.ip_list = vec!["192.0.2.1".parse().unwrap()];
        snapshot
            .host_map
            .insert(String::from("tiny.example.net"), node);
        snapshot.sorted.push(String::from("tiny.example.net"));

        let outcome = select_valid_ips(&snapshot, &SelectorQuery::default(), &config());
        assert!(matches!(
            outcome.selection,
            Selection::Invalid { ref reason } if reason == "broken_no_buckets"
        ));
        assert!(outcome.stats[0].contains("dropping server <tiny.example.net>"));
    }

    #[test]
    fn test_native_server_header_detection() {
        assert!(SERVER_HEADERS_NATIVE.contains("sks_www"));
        assert!(!SERVER_HEADERS_NATIVE.contains("nginx"));
    }
}
