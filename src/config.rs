//! Bind configuration.
//!
//! Addresses are IP literals only. Nothing here asks the system for its
//! host name or resolves one, a host with a non-ASCII or unresolvable name
//! binds just the same.

use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use log::LevelFilter;

use errors::*;

pub const DEFAULT_PORT: u16 = 8080;

/// Environment variable holding the bind address, empty means all interfaces
pub const ADDR_VAR: &str = "UPLINK_ACK_ADDR";
/// Environment variable holding the bind port
pub const PORT_VAR: &str = "UPLINK_ACK_PORT";
/// Environment variable holding the log level
pub const LOG_VAR: &str = "RUST_LOG";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub address: IpAddr,
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
        }
    }
}

impl Config {
    /// Read `UPLINK_ACK_ADDR` / `UPLINK_ACK_PORT`, unset variables keep their default
    pub fn from_env() -> Result<Self> {
        Self::from_vars(env::var(ADDR_VAR).ok(), env::var(PORT_VAR).ok())
    }

    pub fn from_vars(address: Option<String>, port: Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(address) = address {
            config.address = parse_address(&address)?;
        }
        if let Some(port) = port {
            config.port = port
                .trim()
                .parse()
                .map_err(|_| ErrorKind::InvalidConfig(PORT_VAR.to_string(), port.clone()))?;
        }
        Ok(config)
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    pub fn server_name(&self) -> String {
        server_name(&self.address)
    }
}

/// Parse an IP literal. The empty string is the wildcard address and IPv6
/// literals may come wrapped in brackets.
pub fn parse_address(address: &str) -> Result<IpAddr> {
    let trimmed = address.trim();
    if trimmed.is_empty() {
        return Ok(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    }
    let literal = if trimmed.starts_with('[') && trimmed.ends_with(']') {
        &trimmed[1..trimmed.len() - 1]
    } else {
        trimmed
    };
    literal
        .parse()
        .chain_err(|| ErrorKind::InvalidConfig(ADDR_VAR.to_string(), address.to_string()))
}

/// Log level from `RUST_LOG`, never below `Info`: the banner and the
/// receipt lines are the whole point of running the listener.
pub fn log_level(var: Option<String>) -> LevelFilter {
    var.and_then(|v| v.trim().parse::<LevelFilter>().ok())
        .map_or(LevelFilter::Info, |level| level.max(LevelFilter::Info))
}

/// Name reported for a bind address: the literal itself, or `localhost`
/// for the wildcard.
pub fn server_name(address: &IpAddr) -> String {
    if address.is_unspecified() {
        "localhost".to_string()
    } else {
        address.to_string()
    }
}
