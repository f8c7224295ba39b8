//! Construction MCP access layer
//!
//! Shared plumbing for tools that wrap a construction-management platform's
//! REST and GraphQL APIs.
//!
//! # Features
//!
//! - **OAuth sessions**: Authorization Code + PKCE login on a loopback
//!   redirect, persistent tokens, transparent refresh
//! - **Resilient requests**: per-attempt timeouts, bounded retries with
//!   backoff, `Retry-After` cooperation, optional client-side pacing
//! - **Pagination**: bounded aggregation of offset/limit listings
//! - **Resolution**: names to ids for hubs, projects and folders

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod access;
pub mod config;
pub mod error;
pub mod executor;
pub mod failsafe;
pub mod lookups;
pub mod oauth;
pub mod pagination;
pub mod resolver;

pub use access::AccessLayer;
pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// `RUST_LOG` overrides `level`. `format` of `"json"` selects JSON lines.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        Some("json") => subscriber.with(fmt::layer().json().with_writer(std::io::stderr)).try_init(),
        _ => subscriber.with(fmt::layer().with_writer(std::io::stderr)).try_init(),
    };

    installed.map_err(|e| Error::Config(format!("Failed to install tracing subscriber: {e}")))
}
