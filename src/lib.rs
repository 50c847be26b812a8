//! keymesh - Keyserver mesh spider and pool IP service
//!
//! keymesh walks the gossip mesh of a keyserver cluster, builds a
//! canonicalized snapshot of its members, and serves a statistically vetted
//! list of member IP addresses over HTTP.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`spider`] - The concurrent mesh crawl and its collaborators
//! - [`snapshot`] - Immutable crawl results and their publication slot
//! - [`selector`] - The valid-IP selection algorithm
//! - [`server`] - The HTTP query service
//! - [`models`] - Core data structures and types
//!
//! # Example
//!
//! ```no_run
//! use keymesh::config::Config;
//! use keymesh::selector::{select_valid_ips, SelectorQuery};
//! use keymesh::snapshot::MeshSnapshot;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let snapshot = MeshSnapshot::empty();
//!     let outcome = select_valid_ips(&snapshot, &SelectorQuery::default(), &config.selector);
//!     println!("{:?}", outcome.selection);
//!     Ok(())
//! }
//! ```

pub mod commands;
pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod selector;
pub mod server;
pub mod snapshot;
pub mod spider;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::models::{CountrySet, NodeInfo, ServerVersion};
    pub use crate::selector::{select_valid_ips, Selection, SelectorQuery};
    pub use crate::snapshot::{MeshSnapshot, SnapshotSlot};
    pub use crate::spider::{run_crawl, Spider, SpiderDeps};
}
