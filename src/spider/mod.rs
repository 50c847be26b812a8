//! Mesh spider: a concurrent crawl coordinated by a single-owner event loop
//!
//! The spider queries each host as few times as possible, capturing the
//! hostnames under which it is known and its aliases, and deduplicating by
//! IP address.
//!
//! One owner task exclusively reads and writes crawl state. DNS, probe, and
//! country workers are short-lived tasks that perform exactly one blocking
//! I/O each and send one message back over a bounded channel; they never
//! touch state directly, so the state needs no lock. Quiescence is tracked
//! by a [`PendingCounter`](pending::PendingCounter): incremented in the
//! caller's context before a unit of work is enqueued, decremented only by
//! the owner once the unit's result is fully processed.

pub mod pending;
pub mod policy;
pub mod probe;
pub mod resolve;

use chrono::Utc;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::models::NodeInfo;
use crate::snapshot::MeshSnapshot;
use pending::PendingCounter;
use probe::{NodeProbe, ProbeError};
use resolve::{CountryResolver, HostResolver};

/// Capacity of every spider channel; producers block when full.
pub const QUEUE_DEPTH: usize = 100;

/// Errors from the spider's public surface
#[derive(Error, Debug)]
pub enum SpiderError {
    /// The event loop has already terminated
    #[error("spider event loop is gone")]
    LoopGone,

    /// The event loop task panicked
    #[error("spider event loop panicked")]
    LoopPanicked,
}

/// External collaborators the crawl fans out to
#[derive(Clone)]
pub struct SpiderDeps {
    pub probe: Arc<dyn NodeProbe>,
    pub resolver: Arc<dyn HostResolver>,
    pub countries: Arc<dyn CountryResolver>,
}

struct HostsRequest {
    hostnames: Vec<String>,
    distance: u32,
    origin: Option<String>,
}

struct DnsResult {
    hostname: String,
    ips: Vec<IpAddr>,
    error: Option<resolve::DnsError>,
}

struct HostResult {
    hostname: String,
    node: Option<NodeInfo>,
    error: Option<ProbeError>,
}

struct CountryResult {
    ip: IpAddr,
    country: Option<String>,
}

/// Crawl state, owned exclusively by the event-loop task
#[derive(Default)]
struct SpiderState {
    /// Hostnames with a DNS lookup in flight
    considering: HashSet<String>,

    /// Hostnames rejected by DNS failure or a disallowed address
    bad_dns: HashSet<String>,

    /// Alias hostname to canonical hostname
    known_hosts: HashMap<String, String>,

    /// Canonical hostname to its aliases, itself included
    aliases_for_host: HashMap<String, Vec<String>>,

    /// IP to canonical hostname
    known_ips: HashMap<IpAddr, String>,

    /// Canonical hostname to deduplicated DNS results
    ips_for_host: HashMap<String, Vec<IpAddr>>,

    /// Canonical hostname to probe result; None until the probe returns
    server_infos: HashMap<String, Option<NodeInfo>>,

    /// Crawl distance from the seeds
    distances: HashMap<String, u32>,

    /// Last probe error per hostname
    query_errors: HashMap<String, ProbeError>,

    /// IP to country code; empty string while the lookup is pending
    countries_for_ips: HashMap<IpAddr, String>,
}

impl SpiderState {
    fn into_snapshot(self) -> MeshSnapshot {
        let mut host_map = BTreeMap::new();
        for (name, info) in self.server_infos {
            if let Some(node) = info {
                host_map.insert(name, node);
            }
        }
        let sorted: Vec<String> = host_map.keys().cloned().collect();
        let mut alias_map = BTreeMap::new();
        for name in &sorted {
            if let Some(aliases) = self.aliases_for_host.get(name) {
                alias_map.insert(name.clone(), aliases.clone());
            }
        }
        MeshSnapshot {
            host_map,
            sorted,
            alias_map,
            ip_country_map: self.countries_for_ips,
            collected_at: Utc::now(),
        }
    }
}

/// Handle to a running crawl
///
/// This persists for the length of one data-gathering run; [`finalize`]
/// consumes it and freezes the state into a [`MeshSnapshot`].
///
/// [`finalize`]: Spider::finalize
pub struct Spider {
    add_tx: mpsc::Sender<HostsRequest>,
    terminate_tx: mpsc::Sender<()>,
    pending: Arc<PendingCounter>,
    loop_handle: JoinHandle<SpiderState>,
}

impl Spider {
    /// Initialize state and launch the event loop
    pub fn start(deps: SpiderDeps) -> Spider {
        let (add_tx, add_rx) = mpsc::channel(QUEUE_DEPTH);
        let (dns_tx, dns_rx) = mpsc::channel(QUEUE_DEPTH);
        let (host_tx, host_rx) = mpsc::channel(QUEUE_DEPTH);
        let (country_tx, country_rx) = mpsc::channel(QUEUE_DEPTH);
        let (terminate_tx, terminate_rx) = mpsc::channel(1);
        let pending = Arc::new(PendingCounter::new());

        let spider_loop = SpiderLoop {
            state: SpiderState::default(),
            deps,
            pending: pending.clone(),
            add_rx,
            dns_tx,
            dns_rx,
            host_tx,
            host_rx,
            country_tx,
            country_rx,
            terminate_rx,
        };
        let loop_handle = tokio::spawn(spider_loop.run());

        Spider {
            add_tx,
            terminate_tx,
            pending,
            loop_handle,
        }
    }

    /// Enqueue one seed hostname with a declared crawl distance
    pub async fn add_host(
        &self,
        hostname: impl Into<String>,
        distance: u32,
    ) -> Result<(), SpiderError> {
        self.enqueue(vec![hostname.into()], distance, None).await
    }

    /// Enqueue many hostnames discovered via `origin`; each inherits
    /// `distances[origin] + 1` when the origin is known
    pub async fn batch_add_host(
        &self,
        origin: &str,
        hostnames: Vec<String>,
    ) -> Result<(), SpiderError> {
        self.enqueue(hostnames, 0, Some(origin.to_string())).await
    }

    async fn enqueue(
        &self,
        hostnames: Vec<String>,
        distance: u32,
        origin: Option<String>,
    ) -> Result<(), SpiderError> {
        if hostnames.is_empty() {
            return Ok(());
        }
        // Counter rises in the caller's context, before the send.
        let count = hostnames.len();
        self.pending.add(count);
        let request = HostsRequest {
            hostnames,
            distance,
            origin,
        };
        if self.add_tx.send(request).await.is_err() {
            for _ in 0..count {
                self.pending.done();
            }
            return Err(SpiderError::LoopGone);
        }
        Ok(())
    }

    /// Block until all in-flight work has drained
    pub async fn wait(&self) {
        self.pending.wait().await;
    }

    /// Units of work currently in flight, for diagnostics
    pub fn pending_count(&self) -> usize {
        self.pending.get()
    }

    /// Stop the event loop after it drains its current message
    pub async fn terminate(&self) {
        let _ = self.terminate_tx.send(()).await;
    }

    /// Terminate the loop and freeze its state into a snapshot
    pub async fn finalize(self) -> Result<MeshSnapshot, SpiderError> {
        let _ = self.terminate_tx.send(()).await;
        let state = self
            .loop_handle
            .await
            .map_err(|_| SpiderError::LoopPanicked)?;
        Ok(state.into_snapshot())
    }
}

/// Run one complete crawl from the configured seeds
pub async fn run_crawl(deps: SpiderDeps, seeds: &[String]) -> Result<MeshSnapshot, SpiderError> {
    let started = std::time::Instant::now();
    let spider = Spider::start(deps);
    for seed in seeds {
        spider.add_host(seed.clone(), 0).await?;
    }
    spider.wait().await;
    let snapshot = spider.finalize().await?;
    crate::metrics::SPIDER_HOSTS_FOUND.set(snapshot.host_map.len() as f64);
    crate::metrics::SPIDER_IPS_FOUND.set(snapshot.ip_country_map.len() as f64);
    crate::metrics::SPIDER_CRAWL_DURATION.observe(started.elapsed().as_secs_f64());
    info!(
        hosts = snapshot.host_map.len(),
        ips = snapshot.ip_country_map.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "crawl complete"
    );
    Ok(snapshot)
}

struct SpiderLoop {
    state: SpiderState,
    deps: SpiderDeps,
    pending: Arc<PendingCounter>,
    add_rx: mpsc::Receiver<HostsRequest>,
    dns_tx: mpsc::Sender<DnsResult>,
    dns_rx: mpsc::Receiver<DnsResult>,
    host_tx: mpsc::Sender<HostResult>,
    host_rx: mpsc::Receiver<HostResult>,
    country_tx: mpsc::Sender<CountryResult>,
    country_rx: mpsc::Receiver<CountryResult>,
    terminate_rx: mpsc::Receiver<()>,
}

impl SpiderLoop {
    async fn run(mut self) -> SpiderState {
        loop {
            tokio::select! {
                Some(request) = self.add_rx.recv() => {
                    let HostsRequest { hostnames, distance, origin } = request;
                    for hostname in hostnames {
                        self.consider_host(hostname, distance, origin.as_deref());
                    }
                }
                Some(result) = self.dns_rx.recv() => {
                    self.process_dns_result(result);
                    self.pending.done();
                }
                Some(result) = self.host_rx.recv() => {
                    self.process_host_result(result);
                    self.pending.done();
                }
                Some(result) = self.country_rx.recv() => {
                    self.process_country_result(result);
                    self.pending.done();
                }
                _ = self.terminate_rx.recv() => break,
            }
        }
        self.state
    }

    /// Admission check for one hostname; spawns a DNS worker on success and
    /// retires the pending unit on rejection
    fn consider_host(&mut self, hostname: String, request_distance: u32, origin: Option<&str>) {
        let distance = origin
            .and_then(|o| self.state.distances.get(o))
            .map(|d| d + 1)
            .unwrap_or(request_distance);

        if let Some(&old) = self.state.distances.get(&hostname) {
            if old > distance {
                info!(hostname = %hostname, old, new = distance, "promoting host to be nearer");
                self.state.distances.insert(hostname.clone(), distance);
            }
        }

        let skip = if self.state.considering.contains(&hostname) {
            true
        } else if policy::is_blacklisted(&hostname) {
            info!(hostname = %hostname, "ignoring blacklisted host");
            true
        } else if self.state.bad_dns.contains(&hostname) {
            true
        } else if self.state.known_hosts.contains_key(&hostname) {
            true
        } else if policy::is_ip_literal(&hostname) {
            info!(hostname = %hostname, "ignoring IP address");
            true
        } else if !hostname.contains('.') {
            info!(hostname = %hostname, "ignoring unqualified hostname");
            true
        } else if hostname.contains("pool.") {
            info!(hostname = %hostname, "ignoring pool hostname");
            true
        } else if hostname.ends_with(".local") {
            info!(hostname = %hostname, "ignoring .local hostname");
            true
        } else if policy::is_do_not_query(&hostname) {
            info!(hostname = %hostname, "ignoring do-not-query hostname");
            true
        } else {
            false
        };
        if skip {
            self.pending.done();
            return;
        }

        self.state.considering.insert(hostname.clone());
        self.state.distances.insert(hostname.clone(), distance);

        let resolver = self.deps.resolver.clone();
        let tx = self.dns_tx.clone();
        tokio::spawn(async move {
            let message = match resolver.resolve(&hostname).await {
                Ok(ips) => DnsResult {
                    hostname,
                    ips,
                    error: None,
                },
                Err(err) => DnsResult {
                    hostname,
                    ips: Vec::new(),
                    error: Some(err),
                },
            };
            // The loop may have terminated; dropping the result is fine then.
            let _ = tx.send(message).await;
        });
    }

    fn process_dns_result(&mut self, result: DnsResult) {
        let DnsResult {
            hostname,
            ips,
            error,
        } = result;
        self.state.considering.remove(&hostname);

        if let Some(err) = error {
            warn!(hostname = %hostname, error = %err, "DNS resolution failure");
            self.state.bad_dns.insert(hostname);
            return;
        }

        let ip_list = dedup_ips(ips);
        for ip in &ip_list {
            if policy::ip_disallowed(*ip) {
                warn!(hostname = %hostname, ip = %ip, "disallowing host because of IP");
                self.state.bad_dns.insert(hostname);
                return;
            }
        }

        // An already-known IP makes this an alias of an existing host; the
        // first such IP decides the canonical.
        let alias_of = ip_list
            .iter()
            .find_map(|ip| self.state.known_ips.get(ip).cloned());
        if let Some(canonical) = alias_of {
            self.state
                .known_hosts
                .insert(hostname.clone(), canonical.clone());
            let aliases = self
                .state
                .aliases_for_host
                .entry(canonical.clone())
                .or_default();
            if !aliases.contains(&hostname) {
                aliases.push(hostname.clone());
            }
            for ip in &ip_list {
                self.state.known_ips.insert(*ip, canonical.clone());
            }
            let existing = self.state.ips_for_host.remove(&canonical).unwrap_or_default();
            self.state
                .ips_for_host
                .insert(canonical, merge_ips(existing, ip_list));
            return;
        }

        // Shiny new host after this point.
        self.state
            .known_hosts
            .insert(hostname.clone(), hostname.clone());
        self.state
            .aliases_for_host
            .insert(hostname.clone(), vec![hostname.clone()]);
        self.state
            .ips_for_host
            .insert(hostname.clone(), ip_list.clone());
        for ip in &ip_list {
            self.state.known_ips.insert(*ip, hostname.clone());
            if !self.state.countries_for_ips.contains_key(ip) {
                // Placeholder stops later DNS results re-enqueuing this IP.
                self.state.countries_for_ips.insert(*ip, String::new());
                self.pending.add(1);
                self.spawn_country_worker(*ip);
            }
        }
        self.state.server_infos.insert(hostname.clone(), None);
        self.pending.add(1);
        self.spawn_probe_worker(hostname);
    }

    fn spawn_country_worker(&self, ip: IpAddr) {
        let countries = self.deps.countries.clone();
        let tx = self.country_tx.clone();
        tokio::spawn(async move {
            let country = match countries.country(ip).await {
                Ok(code) => Some(code),
                Err(err) => {
                    debug!(ip = %ip, error = %err, "country lookup failed");
                    None
                }
            };
            let _ = tx.send(CountryResult { ip, country }).await;
        });
    }

    fn spawn_probe_worker(&self, hostname: String) {
        let probe = self.deps.probe.clone();
        let tx = self.host_tx.clone();
        tokio::spawn(async move {
            // The inner spawn isolates a panicking analysis; its join error
            // comes back as a probe failure instead of killing the crawl.
            let outcome = tokio::spawn({
                let probe = probe.clone();
                let hostname = hostname.clone();
                async move { probe.probe(&hostname).await }
            })
            .await;
            let message = match outcome {
                Ok(Ok(node)) => HostResult {
                    hostname,
                    node: Some(node),
                    error: None,
                },
                Ok(Err(err)) => HostResult {
                    hostname,
                    node: None,
                    error: Some(err),
                },
                Err(join_err) => HostResult {
                    hostname,
                    node: None,
                    error: Some(ProbeError::Analyze(join_err.to_string())),
                },
            };
            let _ = tx.send(message).await;
        });
    }

    fn process_host_result(&mut self, result: HostResult) {
        let HostResult {
            hostname,
            node,
            error,
        } = result;
        if let Some(err) = error {
            warn!(hostname = %hostname, error = %err, "failure fetching status");
            self.state.query_errors.insert(hostname, err);
            return;
        }
        let Some(mut node) = node else {
            return;
        };

        let mut canonical = hostname.clone();
        if let Some(own_hostname) = node.self_hostname.clone() {
            if own_hostname != hostname {
                canonical = own_hostname;
                self.adopt_canonical(&hostname, &canonical);
            }
        }

        if let Some(nodename) = node.self_nodename.clone() {
            if nodename != canonical && node.self_hostname.as_deref() != Some(nodename.as_str()) {
                if !self.state.known_hosts.contains_key(&nodename) {
                    self.state
                        .known_hosts
                        .insert(nodename.clone(), canonical.clone());
                    let aliases = self
                        .state
                        .aliases_for_host
                        .entry(canonical.clone())
                        .or_default();
                    if !aliases.contains(&nodename) {
                        aliases.push(nodename);
                    }
                }
            }
        }

        node.ip_list = self
            .state
            .ips_for_host
            .get(&canonical)
            .cloned()
            .unwrap_or_default();
        let peers = node.gossip_peers.clone();
        self.state.server_infos.insert(canonical.clone(), Some(node));

        // Peers are considered inline; routing them back through the
        // bounded request channel could deadlock the loop against itself.
        self.pending.add(peers.len());
        for peer in peers {
            self.consider_host(peer, 0, Some(canonical.as_str()));
        }
    }

    /// Move everything recorded under the queried hostname beneath the
    /// canonical name the node reported for itself
    fn adopt_canonical(&mut self, hostname: &str, canonical: &str) {
        if matches!(self.state.server_infos.get(canonical), Some(Some(_))) {
            warn!(canonical = %canonical, hostname = %hostname, "duplicate fetch for renamed host");
        }
        self.state.server_infos.remove(hostname);

        self.state
            .known_hosts
            .entry(canonical.to_string())
            .or_insert_with(|| canonical.to_string());

        let moved_aliases = self
            .state
            .aliases_for_host
            .remove(hostname)
            .unwrap_or_default();
        for alias in &moved_aliases {
            self.state
                .known_hosts
                .insert(alias.clone(), canonical.to_string());
        }
        let aliases = self
            .state
            .aliases_for_host
            .entry(canonical.to_string())
            .or_default();
        for alias in moved_aliases {
            if !aliases.contains(&alias) {
                aliases.push(alias);
            }
        }
        if !aliases.iter().any(|a| a == canonical) {
            aliases.push(canonical.to_string());
        }

        let moved_ips = self.state.ips_for_host.remove(hostname).unwrap_or_default();
        for ip in &moved_ips {
            self.state.known_ips.insert(*ip, canonical.to_string());
        }
        let existing = self.state.ips_for_host.remove(canonical);
        let merged = match existing {
            Some(existing) => merge_ips(existing, moved_ips),
            None => moved_ips,
        };
        self.state.ips_for_host.insert(canonical.to_string(), merged);

        // Conservative on rename: the larger of the two distances wins.
        if let Some(&queried_distance) = self.state.distances.get(hostname) {
            let adopt = match self.state.distances.get(canonical) {
                None => true,
                Some(&old) => old < queried_distance,
            };
            if adopt {
                self.state
                    .distances
                    .insert(canonical.to_string(), queried_distance);
            }
        }
    }

    fn process_country_result(&mut self, result: CountryResult) {
        if let Some(country) = result.country {
            self.state.countries_for_ips.insert(result.ip, country);
        }
    }
}

/// Deduplicate preserving first-seen order
fn dedup_ips(ips: Vec<IpAddr>) -> Vec<IpAddr> {
    let mut seen = HashSet::new();
    ips.into_iter().filter(|ip| seen.insert(*ip)).collect()
}

fn merge_ips(first: Vec<IpAddr>, second: Vec<IpAddr>) -> Vec<IpAddr> {
    let mut merged = first;
    merged.extend(second);
    dedup_ips(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use super::resolve::DnsError;
    use std::sync::Mutex;

    struct StaticResolver {
        map: HashMap<String, Vec<IpAddr>>,
    }

    #[async_trait]
    impl HostResolver for StaticResolver {
        async fn resolve(&self, hostname: &str) -> Result<Vec<IpAddr>, DnsError> {
            self.map.get(hostname).cloned().ok_or(DnsError::Empty)
        }
    }

    struct NoCountries;

    #[async_trait]
    impl CountryResolver for NoCountries {
        async fn country(&self, _ip: IpAddr) -> Result<String, DnsError> {
            Err(DnsError::Empty)
        }
    }

    #[derive(Default)]
    struct ScriptedProbe {
        nodes: HashMap<String, NodeInfo>,
        probed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl NodeProbe for ScriptedProbe {
        async fn probe(&self, hostname: &str) -> Result<NodeInfo, ProbeError> {
            self.probed.lock().unwrap().push(hostname.to_string());
            self.nodes
                .get(hostname)
                .cloned()
                .ok_or(ProbeError::Status(404))
        }
    }

    fn test_loop(resolver_map: HashMap<String, Vec<IpAddr>>) -> SpiderLoop {
        let deps = SpiderDeps {
            probe: Arc::new(ScriptedProbe::default()),
            resolver: Arc::new(StaticResolver { map: resolver_map }),
            countries: Arc::new(NoCountries),
        };
        let (_add_tx, add_rx) = mpsc::channel(QUEUE_DEPTH);
        let (dns_tx, dns_rx) = mpsc::channel(QUEUE_DEPTH);
        let (host_tx, host_rx) = mpsc::channel(QUEUE_DEPTH);
        let (country_tx, country_rx) = mpsc::channel(QUEUE_DEPTH);
        let (_terminate_tx, terminate_rx) = mpsc::channel(1);
        SpiderLoop {
            state: SpiderState::default(),
            deps,
            pending: Arc::new(PendingCounter::new()),
            add_rx,
            dns_tx,
            dns_rx,
            host_tx,
            host_rx,
            country_tx,
            country_rx,
            terminate_rx,
        }
    }

    fn check_invariants(state: &SpiderState) {
        for (alias, canonical) in &state.known_hosts {
            assert_eq!(
                state.known_hosts.get(canonical),
                Some(canonical),
                "canonical {canonical} must be a fixpoint"
            );
            assert!(
                state.aliases_for_host[canonical].contains(alias),
                "{alias} missing from aliases of {canonical}"
            );
        }
        for canonical in state.known_ips.values() {
            assert_eq!(state.known_hosts.get(canonical), Some(canonical));
        }
        assert!(state.considering.is_disjoint(&state.bad_dns));
    }

    fn dns_ok(hostname: &str, ips: &[&str]) -> DnsResult {
        DnsResult {
            hostname: hostname.to_string(),
            ips: ips.iter().map(|ip| ip.parse().unwrap()).collect(),
            error: None,
        }
    }

    #[tokio::test]
    async fn test_consider_rejects_policy_hosts() {
        let mut spider_loop = test_loop(HashMap::new());
        for hostname in [
            "192.0.2.7",
            "unqualified",
            "de.pool.keys.example.net",
            "printer.local",
            "keyserver.pramberger.at",
            "pgp.mit.edu",
        ] {
            spider_loop.pending.add(1);
            spider_loop.consider_host(hostname.to_string(), 0, None);
        }
        assert_eq!(spider_loop.pending.get(), 0);
        assert!(spider_loop.state.considering.is_empty());
    }

    #[tokio::test]
    async fn test_consider_accepts_and_tracks_distance() {
        let mut spider_loop = test_loop(HashMap::from([(
            String::from("keys.example.net"),
            vec!["192.0.2.1".parse().unwrap()],
        )]));
        spider_loop.pending.add(1);
        spider_loop.consider_host(String::from("keys.example.net"), 3, None);
        assert!(spider_loop.state.considering.contains("keys.example.net"));
        assert_eq!(spider_loop.state.distances["keys.example.net"], 3);
        // DNS is in flight; the unit is still pending.
        assert_eq!(spider_loop.pending.get(), 1);

        // A shorter path lowers the stored distance even though the host
        // is already being considered.
        spider_loop.pending.add(1);
        spider_loop.consider_host(String::from("keys.example.net"), 1, None);
        assert_eq!(spider_loop.state.distances["keys.example.net"], 1);
        assert_eq!(spider_loop.pending.get(), 1);
    }

    #[tokio::test]
    async fn test_no_host_resolved_twice() {
        let mut spider_loop = test_loop(HashMap::new());
        spider_loop.pending.add(1);
        spider_loop.consider_host(String::from("a.example.net"), 0, None);
        spider_loop.process_dns_result(dns_ok("a.example.net", &["192.0.2.1"]));
        spider_loop.pending.done();
        check_invariants(&spider_loop.state);

        // Known host is skipped outright.
        spider_loop.pending.add(1);
        spider_loop.consider_host(String::from("a.example.net"), 0, None);
        assert!(!spider_loop.state.considering.contains("a.example.net"));
    }

    #[tokio::test]
    async fn test_dns_failure_goes_to_bad_dns() {
        let mut spider_loop = test_loop(HashMap::new());
        spider_loop.pending.add(1);
        spider_loop.consider_host(String::from("gone.example.net"), 0, None);
        spider_loop.process_dns_result(DnsResult {
            hostname: String::from("gone.example.net"),
            ips: Vec::new(),
            error: Some(DnsError::Empty),
        });
        spider_loop.pending.done();
        assert!(spider_loop.state.bad_dns.contains("gone.example.net"));
        check_invariants(&spider_loop.state);
    }

    #[tokio::test]
    async fn test_disallowed_ip_rejects_host() {
        let mut spider_loop = test_loop(HashMap::new());
        spider_loop.pending.add(1);
        spider_loop.consider_host(String::from("inside.example.net"), 0, None);
        spider_loop.process_dns_result(dns_ok("inside.example.net", &["192.0.2.1", "10.0.0.5"]));
        spider_loop.pending.done();
        assert!(spider_loop.state.bad_dns.contains("inside.example.net"));
        assert!(spider_loop.state.known_ips.is_empty());
        check_invariants(&spider_loop.state);
    }

    #[tokio::test]
    async fn test_overlapping_ips_coalesce() {
        let mut spider_loop = test_loop(HashMap::new());
        spider_loop.pending.add(2);
        spider_loop.consider_host(String::from("a.example.net"), 0, None);
        spider_loop.consider_host(String::from("b.example.net"), 0, None);
        spider_loop.process_dns_result(dns_ok("a.example.net", &["192.0.2.1"]));
        spider_loop.pending.done();
        spider_loop.process_dns_result(dns_ok("b.example.net", &["192.0.2.1", "192.0.2.2"]));
        spider_loop.pending.done();

        assert_eq!(spider_loop.state.known_hosts["b.example.net"], "a.example.net");
        assert!(spider_loop.state.aliases_for_host["a.example.net"]
            .contains(&String::from("b.example.net")));
        let merged = &spider_loop.state.ips_for_host["a.example.net"];
        assert_eq!(merged.len(), 2);
        check_invariants(&spider_loop.state);
    }

    #[tokio::test]
    async fn test_self_hostname_rename() {
        let mut spider_loop = test_loop(HashMap::new());
        spider_loop.pending.add(1);
        spider_loop.consider_host(String::from("alias.example.net"), 2, None);
        spider_loop.process_dns_result(dns_ok("alias.example.net", &["192.0.2.9"]));
        spider_loop.pending.done();

        let mut node = NodeInfo::new("alias.example.net");
        node.self_hostname = Some(String::from("real.example.net"));
        node.self_nodename = Some(String::from("real1"));
        node.keycount = 100;
        spider_loop.process_host_result(HostResult {
            hostname: String::from("alias.example.net"),
            node: Some(node),
            error: None,
        });
        spider_loop.pending.done();

        let state = &spider_loop.state;
        assert!(matches!(state.server_infos.get("real.example.net"), Some(Some(_))));
        assert!(!state.server_infos.contains_key("alias.example.net"));
        assert_eq!(state.known_hosts["alias.example.net"], "real.example.net");
        assert_eq!(state.known_hosts["real1"], "real.example.net");
        assert_eq!(
            state.known_ips[&"192.0.2.9".parse::<IpAddr>().unwrap()],
            "real.example.net"
        );
        assert_eq!(state.distances["real.example.net"], 2);
        let stored = state.server_infos["real.example.net"].as_ref().unwrap();
        assert_eq!(stored.ip_list, vec!["192.0.2.9".parse::<IpAddr>().unwrap()]);
        check_invariants(state);
    }

    #[tokio::test]
    async fn test_probe_error_recorded() {
        let mut spider_loop = test_loop(HashMap::new());
        spider_loop.pending.add(1);
        spider_loop.consider_host(String::from("a.example.net"), 0, None);
        spider_loop.process_dns_result(dns_ok("a.example.net", &["192.0.2.1"]));
        spider_loop.pending.done();
        spider_loop.process_host_result(HostResult {
            hostname: String::from("a.example.net"),
            node: None,
            error: Some(ProbeError::Status(500)),
        });
        spider_loop.pending.done();
        assert!(spider_loop.state.query_errors.contains_key("a.example.net"));
        check_invariants(&spider_loop.state);
    }

    #[tokio::test]
    async fn test_gossip_peers_inherit_distance() {
        let mut spider_loop = test_loop(HashMap::new());
        spider_loop.pending.add(1);
        spider_loop.consider_host(String::from("seed.example.net"), 0, None);
        spider_loop.process_dns_result(dns_ok("seed.example.net", &["192.0.2.1"]));
        spider_loop.pending.done();

        let mut node = NodeInfo::new("seed.example.net");
        node.keycount = 100;
        node.gossip_peers = vec![String::from("peer.example.net")];
        spider_loop.process_host_result(HostResult {
            hostname: String::from("seed.example.net"),
            node: Some(node),
            error: None,
        });
        spider_loop.pending.done();

        assert_eq!(spider_loop.state.distances["peer.example.net"], 1);
        assert!(spider_loop.state.considering.contains("peer.example.net"));
        check_invariants(&spider_loop.state);
    }

    #[test]
    fn test_dedup_ips_preserves_order() {
        let a: IpAddr = "192.0.2.1".parse().unwrap();
        let b: IpAddr = "192.0.2.2".parse().unwrap();
        assert_eq!(dedup_ips(vec![b, a, b, a]), vec![b, a]);
    }
}
