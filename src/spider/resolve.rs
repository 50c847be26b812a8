//! DNS collaborators: hostname resolution and IP country lookup
//!
//! Both are behind traits so spider tests can inject fixed results. The
//! production country resolver queries a reversed-octet DNS zone (the
//! country-DNSBL layout): the TXT record at `1.2.0.192.<zone>` carries the
//! ISO code for 192.0.2.1.

use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use std::net::IpAddr;
use thiserror::Error;

/// Errors from the DNS collaborators
#[derive(Error, Debug)]
pub enum DnsError {
    #[error("lookup failed: {0}")]
    Lookup(#[from] hickory_resolver::error::ResolveError),

    #[error("no usable records returned")]
    Empty,
}

/// Hostname to IP list resolution
#[async_trait]
pub trait HostResolver: Send + Sync {
    async fn resolve(&self, hostname: &str) -> Result<Vec<IpAddr>, DnsError>;
}

/// IP to ISO country code resolution
#[async_trait]
pub trait CountryResolver: Send + Sync {
    async fn country(&self, ip: IpAddr) -> Result<String, DnsError>;
}

/// Production resolver backed by the system DNS configuration
pub struct SystemResolver {
    resolver: TokioAsyncResolver,
}

impl SystemResolver {
    pub fn from_system_conf() -> Result<Self, DnsError> {
        let resolver = TokioAsyncResolver::tokio_from_system_conf()?;
        Ok(Self { resolver })
    }
}

#[async_trait]
impl HostResolver for SystemResolver {
    async fn resolve(&self, hostname: &str) -> Result<Vec<IpAddr>, DnsError> {
        let lookup = self.resolver.lookup_ip(hostname).await?;
        let ips: Vec<IpAddr> = lookup.iter().collect();
        if ips.is_empty() {
            return Err(DnsError::Empty);
        }
        Ok(ips)
    }
}

/// Country lookup against a reversed-octet DNS zone
pub struct DnsCountryResolver {
    resolver: TokioAsyncResolver,
    zone: String,
}

impl DnsCountryResolver {
    pub fn from_system_conf(zone: impl Into<String>) -> Result<Self, DnsError> {
        let resolver = TokioAsyncResolver::tokio_from_system_conf()?;
        Ok(Self {
            resolver,
            zone: zone.into(),
        })
    }
}

#[async_trait]
impl CountryResolver for DnsCountryResolver {
    async fn country(&self, ip: IpAddr) -> Result<String, DnsError> {
        let name = format!("{}.{}.", reverse_octets(ip), self.zone);
        let lookup = self.resolver.txt_lookup(name.as_str()).await?;
        for record in lookup.iter() {
            for data in record.txt_data() {
                let code = String::from_utf8_lossy(data).trim().to_ascii_uppercase();
                if !code.is_empty() {
                    return Ok(code);
                }
            }
        }
        Err(DnsError::Empty)
    }
}

/// Reverse an address into zone-query order: `192.0.2.1` becomes
/// `1.2.0.192`, IPv6 addresses become reversed nibbles.
fn reverse_octets(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => {
            let o = v4.octets();
            format!("{}.{}.{}.{}", o[3], o[2], o[1], o[0])
        }
        IpAddr::V6(v6) => {
            let nibbles: Vec<String> = v6
                .octets()
                .iter()
                .rev()
                .flat_map(|byte| [format!("{:x}", byte & 0x0f), format!("{:x}", byte >> 4)])
                .collect();
            nibbles.join(".")
        }
    }
}
