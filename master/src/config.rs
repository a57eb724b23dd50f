//! Environment-driven configuration for the master process.

use std::env;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::time::Duration;

use wire::Serializer;

use crate::error::{MasterErr, Result};

const DEFAULT_DISPATCH_PORT: u16 = 10001;
const DEFAULT_DISCOVERY_PORT: u16 = 10002;
const DEFAULT_WORKER_DISCOVERY_PORT: u16 = 10003;
const DEFAULT_MONITOR_PORT: u16 = 10004;
const DEFAULT_BROADCAST_SECS: u64 = 20;

/// Runtime configuration for one master process.
#[derive(Debug, Clone)]
pub struct MasterConfig {
    /// Identity label carried by change events and snapshots.
    pub label: String,
    /// Address advertised to workers and monitors.
    pub host: IpAddr,
    pub dispatch_port: u16,
    /// Local UDP port for broadcasting and for worker replies.
    pub discovery_port: u16,
    /// The well-known port workers listen on for broadcasts.
    pub worker_discovery_port: u16,
    pub monitor_port: u16,
    pub broadcast_interval: Duration,
    /// Broadcast targets, one per reachable network segment.
    pub broadcast_addrs: Vec<Ipv4Addr>,
    pub serializer: Serializer,
}

impl MasterConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            label: env::var("MASTER_LABEL").unwrap_or_else(|_| "master".into()),
            host: advertised_host()?,
            dispatch_port: parse_env("MASTER_DISPATCH_PORT", DEFAULT_DISPATCH_PORT)?,
            discovery_port: parse_env("MASTER_DISCOVERY_PORT", DEFAULT_DISCOVERY_PORT)?,
            worker_discovery_port: parse_env(
                "WORKER_DISCOVERY_PORT",
                DEFAULT_WORKER_DISCOVERY_PORT,
            )?,
            monitor_port: parse_env("MASTER_MONITOR_PORT", DEFAULT_MONITOR_PORT)?,
            broadcast_interval: Duration::from_secs(parse_env(
                "MASTER_BROADCAST_SECS",
                DEFAULT_BROADCAST_SECS,
            )?),
            broadcast_addrs: broadcast_addrs()?,
            serializer: serializer()?,
        })
    }
}

fn parse_env<T: FromStr>(var: &'static str, default: T) -> Result<T>
where
    T::Err: fmt::Display,
{
    match env::var(var) {
        Ok(raw) => raw.parse().map_err(|e| MasterErr::config(var, e)),
        Err(_) => Ok(default),
    }
}

fn advertised_host() -> Result<IpAddr> {
    match env::var("MASTER_HOST") {
        Ok(raw) => raw.parse().map_err(|e| MasterErr::config("MASTER_HOST", e)),
        Err(_) => Ok(wire::local_ip().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))),
    }
}

/// Comma-separated list of broadcast addresses; defaults to the limited
/// broadcast address.
fn broadcast_addrs() -> Result<Vec<Ipv4Addr>> {
    match env::var("MASTER_BROADCAST_ADDRS") {
        Ok(raw) => raw
            .split(',')
            .map(|part| {
                part.trim()
                    .parse()
                    .map_err(|e| MasterErr::config("MASTER_BROADCAST_ADDRS", e))
            })
            .collect(),
        Err(_) => Ok(vec![Ipv4Addr::BROADCAST]),
    }
}

fn serializer() -> Result<Serializer> {
    match env::var("FLEET_SERIALIZER") {
        Ok(raw) => Serializer::from_name(&raw)
            .ok_or_else(|| MasterErr::config("FLEET_SERIALIZER", format!("unknown codec {raw}"))),
        Err(_) => Ok(Serializer::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_defaults_produce_a_config() {
        let config = MasterConfig::from_env().expect("defaults must parse");
        assert!(!config.broadcast_addrs.is_empty());
        assert!(config.broadcast_interval > Duration::ZERO);
    }
}
