//! Shared utilities for Glint: logging, error types, helpers.
//!
//! This crate provides common infrastructure used by the session core and
//! the client binary.

#![forbid(unsafe_code)]

pub mod error;
pub mod helpers;

pub use error::{Error, Result};
pub use helpers::{env_bool, now_us};

/// Initialize tracing with a specific default level.
///
/// `RUST_LOG` takes precedence when set.
pub fn init_tracing_with_default(default_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
