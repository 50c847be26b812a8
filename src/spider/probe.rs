//! HTTP status probe for a single keyserver node
//!
//! This module fetches and parses a node's status page, with:
//! - Rate limiting with governor, shared across the whole crawl
//! - Automatic retry with exponential backoff on server errors
//! - Capture of the `Server:` and `Via:` response headers, which the
//!   selector later uses for proxy detection
//!
//! The [`NodeProbe`] trait is the seam the spider crawls through; tests
//! inject scripted implementations instead of [`HttpNodeProbe`].

use async_trait::async_trait;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use lazy_static::lazy_static;
use reqwest::{header, Client};
use scraper::{Html, Selector};
use std::num::NonZeroU32;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::config::SpiderConfig;
use crate::models::NodeInfo;

/// Errors that can occur while probing a node
#[derive(Error, Debug)]
pub enum ProbeError {
    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Unexpected response status
    #[error("unexpected status code: {0}")]
    Status(u16),

    /// Status page did not parse
    #[error("status page parse failed: {0}")]
    Parse(String),

    /// Status page analysis panicked in the worker
    #[error("analysis panicked: {0}")]
    Analyze(String),

    /// Maximum retry attempts exceeded
    #[error("maximum retry attempts exceeded")]
    MaxRetriesExceeded,
}

impl ProbeError {
    /// Check if this error is worth retrying
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ProbeError::Status(code) if *code >= 500)
    }
}

/// Fetches status for one hostname and returns its [`NodeInfo`]
#[async_trait]
pub trait NodeProbe: Send + Sync {
    async fn probe(&self, hostname: &str) -> Result<NodeInfo, ProbeError>;
}

// Helper macro to parse selectors safely at compile time
macro_rules! parse_selector {
    ($s:expr) => {
        Selector::parse($s).expect(concat!("Invalid CSS selector: ", $s))
    };
}

lazy_static! {
    static ref TABLE_ROW: Selector = parse_selector!("table tr");
    static ref CELL: Selector = parse_selector!("td");
    static ref PARAGRAPH: Selector = parse_selector!("p");
    static ref PEER_CELL: Selector = parse_selector!(r#"table[summary="Gossip Peers"] tr td"#);
}

/// Production probe speaking HTTP to the node's status port
pub struct HttpNodeProbe {
    /// HTTP client with configured timeout and compression
    client: Client,

    /// Rate limiter shared by every probe of the crawl
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,

    /// Maximum number of retry attempts for failed requests
    max_retries: u32,

    /// Base delay in milliseconds for exponential backoff
    base_delay_ms: u64,

    /// Port the status page is served on
    probe_port: u16,

    /// Optional base URL override for testing with mock servers
    base_url: Option<String>,
}

impl HttpNodeProbe {
    /// Create a probe from the spider configuration
    ///
    /// # Errors
    ///
    /// Returns `ProbeError::Http` if the HTTP client cannot be created
    pub fn new(config: &SpiderConfig) -> Result<Self, ProbeError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(format!("keymesh/{}", env!("CARGO_PKG_VERSION")))
            .gzip(true)
            .build()?;

        let rate = NonZeroU32::new(config.rate_limit).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = RateLimiter::direct(Quota::per_second(rate));

        Ok(Self {
            client,
            rate_limiter,
            max_retries: config.max_retries,
            base_delay_ms: 1000,
            probe_port: config.probe_port,
            base_url: None,
        })
    }

    /// Create a probe directed at a fixed base URL, for tests against a
    /// mock server
    pub fn with_base_url(config: &SpiderConfig, base_url: &str) -> Result<Self, ProbeError> {
        let mut probe = Self::new(config)?;
        probe.base_url = Some(base_url.to_string());
        Ok(probe)
    }

    fn status_url(&self, hostname: &str) -> String {
        match &self.base_url {
            Some(base) => format!("{base}/pks/lookup?op=stats"),
            None => format!("http://{hostname}:{}/pks/lookup?op=stats", self.probe_port),
        }
    }

    /// Fetch with exponential backoff on server errors
    async fn fetch_with_retry(&self, url: &str) -> Result<(String, String, String), ProbeError> {
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.base_delay_ms * 2_u64.pow(attempt - 1);
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            match self.fetch_once(url).await {
                Ok(parts) => return Ok(parts),
                Err(err) if err.is_recoverable() => {
                    warn!(url = %url, attempt, error = %err, "probe fetch failed, retrying");
                }
                Err(err) => return Err(err),
            }
        }

        Err(ProbeError::MaxRetriesExceeded)
    }

    async fn fetch_once(&self, url: &str) -> Result<(String, String, String), ProbeError> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProbeError::Status(status.as_u16()));
        }

        let header_text = |name: header::HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string()
        };
        let server = header_text(header::SERVER);
        let via = header_text(header::VIA);

        let body = response.text().await?;
        Ok((server, via, body))
    }
}

#[async_trait]
impl NodeProbe for HttpNodeProbe {
    async fn probe(&self, hostname: &str) -> Result<NodeInfo, ProbeError> {
        self.rate_limiter.until_ready().await;

        let url = self.status_url(hostname);
        let (server_header, via_header, body) = self.fetch_with_retry(&url).await?;

        parse_status_page(hostname, server_header, via_header, &body)
    }
}

/// Parse a node's status page into a [`NodeInfo`]
///
/// The page carries a two-column settings table (`Hostname:`, `Nodename:`,
/// `Version:`), a `Total number of keys:` line, and a gossip peer table
/// whose cells start with the peer hostname.
pub fn parse_status_page(
    hostname: &str,
    server_header: String,
    via_header: String,
    body: &str,
) -> Result<NodeInfo, ProbeError> {
    let document = Html::parse_document(body);

    let mut node = NodeInfo::new(hostname);
    node.server_header = server_header;
    node.via_header = via_header;

    let mut keycount: Option<u64> = None;

    for row in document.select(&TABLE_ROW) {
        let cells: Vec<String> = row
            .select(&CELL)
            .map(|cell| cell.text().collect::<String>().trim().to_string())
            .collect();
        if cells.len() != 2 {
            continue;
        }
        let value = cells[1].clone();
        match cells[0].as_str() {
            "Hostname:" if !value.is_empty() => node.self_hostname = Some(value),
            "Nodename:" if !value.is_empty() => node.self_nodename = Some(value),
            "Version:" => node.version = value.parse().ok(),
            "Total number of keys:" => keycount = parse_count(&value),
            _ => {}
        }
    }

    if keycount.is_none() {
        for paragraph in document.select(&PARAGRAPH) {
            let text = paragraph.text().collect::<String>();
            if let Some(rest) = text.trim().strip_prefix("Total number of keys:") {
                keycount = parse_count(rest);
                break;
            }
        }
    }

    node.keycount =
        keycount.ok_or_else(|| ProbeError::Parse(String::from("total key count not found")))?;

    for cell in document.select(&PEER_CELL) {
        let text = cell.text().collect::<String>();
        if let Some(peer) = text.split_whitespace().next() {
            node.gossip_peers.push(peer.to_string());
        }
    }

    Ok(node)
}

fn parse_count(text: &str) -> Option<u64> {
    text.trim().replace(',', "").parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ServerVersion;

    const STATUS_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>keys.example.net statistics</title></head>
<body>
<h1>Keyserver statistics</h1>
<table summary="Keyserver Settings">
<tr><td>Hostname:</td><td>keys.example.net</td></tr>
<tr><td>Nodename:</td><td>keys1</td></tr>
<tr><td>Version:</td><td>1.1.6</td></tr>
</table>
<h2>Statistics</h2>
<p>Total number of keys: 5,436,654</p>
<h2>Gossip Peers</h2>
<table summary="Gossip Peers">
<tr><td>peer-a.example.org 11370</td></tr>
<tr><td>peer-b.example.org 11370</td></tr>
</table>
</body>
</html>"#;

    #[test]
    fn test_parse_full_status_page() {
        let node = parse_status_page(
            "queried.example.net",
            String::from("sks_www/1.1.6"),
            String::new(),
            STATUS_PAGE,
        )
        .unwrap();

        assert_eq!(node.hostname, "queried.example.net");
        assert_eq!(node.self_hostname.as_deref(), Some("keys.example.net"));
        assert_eq!(node.self_nodename.as_deref(), Some("keys1"));
        assert_eq!(node.version, Some(ServerVersion::new(1, 1, 6)));
        assert_eq!(node.keycount, 5_436_654);
        assert_eq!(node.server_header, "sks_www/1.1.6");
        assert_eq!(
            node.gossip_peers,
            vec!["peer-a.example.org", "peer-b.example.org"]
        );
    }

    #[test]
    fn test_parse_keycount_in_settings_table() {
        let body = r#"<table>
<tr><td>Hostname:</td><td>keys.example.net</td></tr>
<tr><td>Total number of keys:</td><td>1234</td></tr>
</table>"#;
        let node =
            parse_status_page("h.example.net", String::new(), String::new(), body).unwrap();
        assert_eq!(node.keycount, 1234);
    }

    #[test]
    fn test_parse_missing_keycount_is_error() {
        let body = "<html><body><p>nothing useful</p></body></html>";
        let err =
            parse_status_page("h.example.net", String::new(), String::new(), body).unwrap_err();
        assert!(matches!(err, ProbeError::Parse(_)));
    }

    #[test]
    fn test_parse_unparseable_version_is_none() {
        let body = r#"<table>
<tr><td>Version:</td><td>devel-snapshot</td></tr>
<tr><td>Total number of keys:</td><td>10</td></tr>
</table>"#;
        let node =
            parse_status_page("h.example.net", String::new(), String::new(), body).unwrap();
        assert!(node.version.is_none());
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(ProbeError::Status(503).is_recoverable());
        assert!(!ProbeError::Status(404).is_recoverable());
        assert!(!ProbeError::Parse(String::from("x")).is_recoverable());
    }
}
