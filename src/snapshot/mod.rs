//! Immutable crawl results and their publication slot
//!
//! A [`MeshSnapshot`] is frozen once from spider state and never mutated;
//! the query service reads whichever snapshot the [`SnapshotSlot`] currently
//! holds. Publication is an atomic pointer swap, so request handlers keep a
//! stable `Arc` for as long as they need one.

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::sync::Arc;

use crate::models::NodeInfo;

/// The canonicalized result of one completed crawl
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshSnapshot {
    /// Canonical hostname to node status, successful probes only
    pub host_map: BTreeMap<String, NodeInfo>,

    /// Canonical hostnames in ascending order
    pub sorted: Vec<String>,

    /// Canonical hostname to every alias it was discovered under
    pub alias_map: BTreeMap<String, Vec<String>>,

    /// IP to ISO country code; empty string when the lookup never resolved
    pub ip_country_map: HashMap<IpAddr, String>,

    /// Instant the crawl finished
    pub collected_at: DateTime<Utc>,
}

impl MeshSnapshot {
    /// An empty snapshot collected now; mostly useful in tests
    pub fn empty() -> Self {
        Self {
            host_map: BTreeMap::new(),
            sorted: Vec::new(),
            alias_map: BTreeMap::new(),
            ip_country_map: HashMap::new(),
            collected_at: Utc::now(),
        }
    }

    pub fn host_count(&self) -> usize {
        self.host_map.len()
    }

    pub fn get(&self, canonical: &str) -> Option<&NodeInfo> {
        self.host_map.get(canonical)
    }

    /// Country for an IP; empty string means pending or unknown
    pub fn country_for(&self, ip: IpAddr) -> &str {
        self.ip_country_map
            .get(&ip)
            .map(String::as_str)
            .unwrap_or_default()
    }
}

/// Process-wide slot holding the most recent snapshot
#[derive(Default)]
pub struct SnapshotSlot {
    current: ArcSwapOption<MeshSnapshot>,
}

impl SnapshotSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically replace the published snapshot
    pub fn publish(&self, snapshot: MeshSnapshot) {
        self.current.store(Some(Arc::new(snapshot)));
    }

    /// Take a stable reference to the published snapshot, if any
    pub fn current(&self) -> Option<Arc<MeshSnapshot>> {
        self.current.load_full()
    }
}
