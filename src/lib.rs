//! Apps Script proxy library
//!
//! A small HTTP proxy that sits between a browser client and a Google Apps
//! Script web app.
//!
//! # Features
//!
//! - **Secret injection**: the upstream `apiKey` never reaches the browser
//! - **Deadlines**: each upstream exchange is bounded and aborted on expiry
//! - **JSON normalization**: non-JSON upstream replies become structured 502s
//! - **Read cache**: one read action is cached for a few seconds and
//!   invalidated by successful mutating actions
//! - **CORS**: preflight handling and headers on every response

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod proxy;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Internal(e.to_string())),
        _ => subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| Error::Internal(e.to_string())),
    }
}
