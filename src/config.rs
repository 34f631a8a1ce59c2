//! Relay configuration.
use crate::constants::DEFAULT_MONTHLY_ALLOWANCE;
use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use url::Url;

/// Relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Server configuration.
    pub server: ServerConfig,
    /// The RPC endpoint of the chain to relay transactions to.
    pub upstream: Url,
    /// The permission registry consulted for execute permissions.
    pub gate: Address,
    /// Monthly gas allowance granted to new quotas.
    pub default_allowance: u64,
    /// Database URL. Falls back to in-memory storage when unset.
    pub database_url: Option<String>,
}

impl RelayConfig {
    /// Sets the IP address to serve the RPC on.
    pub fn with_address(mut self, address: IpAddr) -> Self {
        self.server.address = address;
        self
    }

    /// Sets the port to serve the RPC on.
    pub fn with_port(mut self, port: u16) -> Self {
        self.server.port = port;
        self
    }

    /// Sets the upstream chain endpoint.
    pub fn with_upstream(mut self, upstream: Url) -> Self {
        self.upstream = upstream;
        self
    }

    /// Sets the permission registry address.
    pub fn with_gate(mut self, gate: Address) -> Self {
        self.gate = gate;
        self
    }

    /// Sets the monthly gas allowance granted to new quotas.
    pub fn with_default_allowance(mut self, allowance: u64) -> Self {
        self.default_allowance = allowance;
        self
    }

    /// Sets the database URL.
    pub fn with_database_url(mut self, database_url: Option<String>) -> Self {
        self.database_url = database_url;
        self
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            upstream: Url::parse("http://localhost:8545").expect("valid default url"),
            gate: Address::ZERO,
            default_allowance: DEFAULT_MONTHLY_ALLOWANCE,
            database_url: None,
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The address to serve the RPC on.
    pub address: IpAddr,
    /// The port to serve the RPC on.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { address: IpAddr::V4(Ipv4Addr::LOCALHOST), port: 9119 }
    }
}
