//! Environment-driven configuration for the worker process.

use std::env;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::time::Duration;

use wire::Serializer;

use crate::error::{Result, WorkerErr};

const DEFAULT_DISCOVERY_PORT: u16 = 10003;
const DEFAULT_TASK_COST_MICROS: u64 = 500;

/// Runtime configuration for one worker process.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Address advertised to masters. Batch listeners themselves bind on all
    /// interfaces.
    pub host: IpAddr,
    /// The well-known UDP port masters broadcast to.
    pub discovery_port: u16,
    /// One batch listener per entry; 0 binds an ephemeral port.
    pub server_ports: Vec<u16>,
    /// Per-replica cost of the synthetic executor.
    pub task_cost: Duration,
    pub serializer: Serializer,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            host: advertised_host()?,
            discovery_port: parse_env("WORKER_DISCOVERY_PORT", DEFAULT_DISCOVERY_PORT)?,
            server_ports: server_ports()?,
            task_cost: Duration::from_micros(parse_env(
                "WORKER_TASK_COST_MICROS",
                DEFAULT_TASK_COST_MICROS,
            )?),
            serializer: serializer()?,
        })
    }
}

fn parse_env<T: FromStr>(var: &'static str, default: T) -> Result<T>
where
    T::Err: fmt::Display,
{
    match env::var(var) {
        Ok(raw) => raw.parse().map_err(|e| WorkerErr::config(var, e)),
        Err(_) => Ok(default),
    }
}

fn advertised_host() -> Result<IpAddr> {
    match env::var("WORKER_HOST") {
        Ok(raw) => raw.parse().map_err(|e| WorkerErr::config("WORKER_HOST", e)),
        Err(_) => Ok(wire::local_ip().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))),
    }
}

/// Comma-separated listener ports; defaults to one ephemeral listener.
fn server_ports() -> Result<Vec<u16>> {
    match env::var("WORKER_PORTS") {
        Ok(raw) => raw
            .split(',')
            .map(|part| {
                part.trim()
                    .parse()
                    .map_err(|e| WorkerErr::config("WORKER_PORTS", e))
            })
            .collect(),
        Err(_) => Ok(vec![0]),
    }
}

fn serializer() -> Result<Serializer> {
    match env::var("FLEET_SERIALIZER") {
        Ok(raw) => Serializer::from_name(&raw)
            .ok_or_else(|| WorkerErr::config("FLEET_SERIALIZER", format!("unknown codec {raw}"))),
        Err(_) => Ok(Serializer::default()),
    }
}
