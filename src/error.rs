//! Unified error handling for the keymesh crate
//!
//! Domain-specific errors live next to the code that raises them; this
//! module wraps them into a single [`Error`] for use across module
//! boundaries. Per-host probe and DNS failures never surface here: the
//! spider records them in its state and keeps crawling.

use thiserror::Error;

pub use crate::spider::probe::ProbeError;
pub use crate::spider::resolve::DnsError;
pub use crate::spider::SpiderError;

/// Unified error type for the keymesh crate
#[derive(Error, Debug)]
pub enum Error {
    /// Spider lifecycle errors
    #[error("spider error: {0}")]
    Spider(#[from] SpiderError),

    /// Probe construction errors
    #[error("probe error: {0}")]
    Probe(#[from] ProbeError),

    /// Resolver construction errors
    #[error("DNS error: {0}")]
    Dns(#[from] DnsError),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O errors from the serving layer
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result alias using the unified error
pub type Result<T> = std::result::Result<T, Error>;
