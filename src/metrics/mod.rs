//! Prometheus metrics for the keymesh spider and query service

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram, CounterVec, Encoder, Gauge,
    Histogram, TextEncoder,
};

lazy_static! {
    /// Canonical hosts in the most recent snapshot
    pub static ref SPIDER_HOSTS_FOUND: Gauge = register_gauge!(
        "keymesh_spider_hosts_found",
        "Number of canonical hosts in the last completed crawl"
    )
    .unwrap();

    /// Addresses known after the most recent crawl
    pub static ref SPIDER_IPS_FOUND: Gauge = register_gauge!(
        "keymesh_spider_ips_found",
        "Number of IP addresses in the last completed crawl"
    )
    .unwrap();

    /// Wall-clock duration of a full crawl
    pub static ref SPIDER_CRAWL_DURATION: Histogram = register_histogram!(
        "keymesh_spider_crawl_duration_seconds",
        "Crawl duration in seconds",
        vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0]
    )
    .unwrap();

    /// Query service requests by endpoint and selection status
    pub static ref API_REQUESTS: CounterVec = register_counter_vec!(
        "keymesh_api_requests_total",
        "Total API requests by endpoint and status",
        &["endpoint", "status"]
    )
    .unwrap();
}

/// Render all registered metrics in the Prometheus text format
pub fn encode() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!(error = %err, "failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_contains_registered_metrics() {
        SPIDER_HOSTS_FOUND.set(42.0);
        API_REQUESTS.with_label_values(&["/", "COMPLETE"]).inc();
        let rendered = encode();
        assert!(rendered.contains("keymesh_spider_hosts_found 42"));
        assert!(rendered.contains("keymesh_api_requests_total"));
    }
}
