//! Common test utilities

use std::collections::HashMap;
use std::net::IpAddr;

use keymesh::config::SelectorConfig;
use keymesh::models::NodeInfo;
use keymesh::snapshot::MeshSnapshot;

/// Selector thresholds most scenarios use: bucket 1000, sanity 1000,
/// jitter 100
pub fn selector_config() -> SelectorConfig {
    SelectorConfig {
        bucket_size: 1000,
        keys_sanity_min: 1000,
        keys_daily_jitter: 100,
    }
}

/// Create a node with the given keycount and addresses
pub fn node(name: &str, keycount: u64, ips: &[&str]) -> NodeInfo {
    NodeInfo {
        hostname: name.to_string(),
        version: Some("1.1.6".parse().unwrap()),
        keycount,
        server_header: String::from("sks_www/1.1.6"),
        ip_list: ips.iter().map(|ip| ip.parse().unwrap()).collect(),
        ..Default::default()
    }
}

/// Build a snapshot from canonical nodes, with an optional IP country map
pub fn snapshot_of(nodes: Vec<NodeInfo>, countries: &[(&str, &str)]) -> MeshSnapshot {
    let mut snapshot = MeshSnapshot::empty();
    for node in nodes {
        let name = node.hostname.clone();
        snapshot.alias_map.insert(name.clone(), vec![name.clone()]);
        snapshot.host_map.insert(name, node);
    }
    snapshot.sorted = snapshot.host_map.keys().cloned().collect();
    snapshot.ip_country_map = countries
        .iter()
        .map(|(ip, cc)| (ip.parse::<IpAddr>().unwrap(), cc.to_string()))
        .collect::<HashMap<_, _>>();
    snapshot
}

/// Ten uniform single-IP servers at keycount 5000 on 192.0.2.1..10
#[allow(dead_code)]
pub fn uniform_cluster() -> MeshSnapshot {
    let nodes = (1..=10)
        .map(|i| {
            node(
                &format!("keys{i:02}.example.net"),
                5000,
                &[&format!("192.0.2.{i}")],
            )
        })
        .collect();
    snapshot_of(nodes, &[])
}
