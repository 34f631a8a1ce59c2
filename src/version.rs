//! Relay version.

/// The version reported by the health endpoint.
pub const RELAY_VERSION: &str = env!("CARGO_PKG_VERSION");
