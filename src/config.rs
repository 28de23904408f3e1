//! Command-line configuration.

use clap::Parser;
use std::net::SocketAddr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("--servers must list at least one cluster endpoint")]
    EmptyServers,
    #[error("--listen is not a valid address: {0}")]
    InvalidListenAddr(#[from] std::net::AddrParseError),
}

#[derive(Debug, Parser)]
#[command(name = "robustirc-bridge", about = "IRC-to-RobustIRC-cluster bridge")]
pub struct RawConfig {
    /// Comma-separated list of known cluster server endpoints (host:port).
    #[arg(long, default_value = "localhost:8001")]
    pub servers: String,

    /// Address to accept plain IRC client connections on.
    #[arg(long, default_value = "localhost:6667")]
    pub listen: String,
}

/// Validated configuration ready for use by the rest of the bridge.
#[derive(Debug, Clone)]
pub struct Config {
    pub servers: Vec<String>,
    pub listen: SocketAddr,
}

impl Config {
    pub fn parse() -> Result<Self, ConfigError> {
        RawConfig::parse().try_into()
    }
}

impl TryFrom<RawConfig> for Config {
    type Error = ConfigError;

    fn try_from(raw: RawConfig) -> Result<Self, ConfigError> {
        let servers: Vec<String> = raw
            .servers
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect();
        if servers.is_empty() {
            return Err(ConfigError::EmptyServers);
        }

        let listen = resolve_listen_addr(&raw.listen)?;

        Ok(Config { servers, listen })
    }
}

fn resolve_listen_addr(s: &str) -> Result<SocketAddr, ConfigError> {
    use std::net::ToSocketAddrs;
    match s.to_socket_addrs().ok().and_then(|mut addrs| addrs.next()) {
        Some(addr) => Ok(addr),
        // Host didn't resolve to anything; reuse AddrParseError's Display by
        // running it through the strict parser for a sensible error message.
        None => Err(s.parse::<SocketAddr>().unwrap_err().into()),
    }
}
