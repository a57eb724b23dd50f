use std::fmt;
use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

/// Transport flavor used to reach an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolKind {
    Tcp,
    Udp,
}

/// Immutable identity of a reachable peer.
///
/// Equality and ordering cover all three fields; descriptors are used as map
/// keys across the registry and the monitoring protocol and are never
/// mutated after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    pub address: IpAddr,
    pub port: u16,
    pub protocol: ProtocolKind,
}

impl EndpointDescriptor {
    pub fn new(address: IpAddr, port: u16, protocol: ProtocolKind) -> Self {
        Self {
            address,
            port,
            protocol,
        }
    }

    /// Shorthand for a stream endpoint.
    pub fn tcp(address: IpAddr, port: u16) -> Self {
        Self::new(address, port, ProtocolKind::Tcp)
    }

    /// Shorthand for a datagram endpoint.
    pub fn udp(address: IpAddr, port: u16) -> Self {
        Self::new(address, port, ProtocolKind::Udp)
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

impl fmt::Display for EndpointDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.protocol {
            ProtocolKind::Tcp => "tcp",
            ProtocolKind::Udp => "udp",
        };
        write!(f, "{kind}://{}:{}", self.address, self.port)
    }
}
