//! The worker side of fleet discovery.
//!
//! Masters broadcast their own UDP endpoint; every broadcast is answered
//! with a unicast datagram carrying the full set of this worker's batch
//! endpoints. Answering every cycle is what keeps a worker registered after
//! a master restart, and what gets it reactivated after a timeout.

use std::collections::HashSet;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use log::{info, warn};
use wire::{DatagramChannel, EndpointDescriptor, ProtocolKind, Serializer};

/// Listens for master broadcasts and answers with our endpoints.
pub struct Announcer {
    channel: DatagramChannel,
    endpoints: HashSet<EndpointDescriptor>,
}

impl Announcer {
    /// Binds the discovery socket on `discovery_port`.
    pub async fn bind(
        discovery_port: u16,
        endpoints: HashSet<EndpointDescriptor>,
        serializer: Serializer,
    ) -> io::Result<Self> {
        let local = SocketAddr::from((Ipv4Addr::UNSPECIFIED, discovery_port));
        let channel = DatagramChannel::bind(local, false, serializer).await?;
        Ok(Self { channel, endpoints })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.channel.local_addr()
    }

    /// Answer loop. Never returns; failures are logged and ridden out.
    pub async fn run(self) {
        loop {
            let (master, peer) = match self.channel.recv_from::<EndpointDescriptor>().await {
                Ok(received) => received,
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    warn!("malformed discovery broadcast: {e}");
                    continue;
                }
                Err(e) => {
                    warn!("discovery receive failed: {e}");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            if master.protocol != ProtocolKind::Udp {
                warn!("master at {peer} announced non-datagram endpoint {master}, ignoring");
                continue;
            }

            // Reply to the advertised endpoint, not the datagram source: the
            // broadcast may have left the master through any interface.
            info!("answering discovery broadcast from master {master}");
            if let Err(e) = self.channel.send_to(&self.endpoints, master.socket_addr()).await {
                warn!("discovery answer to {master} failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::IpAddr;

    use super::*;

    fn endpoint(port: u16) -> EndpointDescriptor {
        EndpointDescriptor::tcp(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    #[tokio::test]
    async fn broadcast_is_answered_with_endpoints() {
        let served: HashSet<_> = [endpoint(9000), endpoint(9001)].into();
        let announcer = Announcer::bind(0, served.clone(), Serializer::Json)
            .await
            .unwrap();
        let announcer_addr = announcer.local_addr().unwrap();
        tokio::spawn(announcer.run());

        // The master's discovery socket, doubling as the broadcast origin.
        let master = DatagramChannel::bind(
            SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            false,
            Serializer::Json,
        )
        .await
        .unwrap();
        let master_endpoint = EndpointDescriptor::udp(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            master.local_addr().unwrap().port(),
        );

        master
            .send_to(&master_endpoint, announcer_addr)
            .await
            .unwrap();
        let (answered, _): (HashSet<EndpointDescriptor>, _) = master.recv_from().await.unwrap();
        assert_eq!(answered, served);
    }

    #[tokio::test]
    async fn stream_endpoint_broadcasts_are_ignored() {
        let announcer = Announcer::bind(0, [endpoint(9000)].into(), Serializer::Json)
            .await
            .unwrap();
        let announcer_addr = announcer.local_addr().unwrap();
        tokio::spawn(announcer.run());

        let master = DatagramChannel::bind(
            SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            false,
            Serializer::Json,
        )
        .await
        .unwrap();

        // A TCP descriptor is not a valid reply target.
        master.send_to(&endpoint(7), announcer_addr).await.unwrap();

        let recv = master.recv_from::<HashSet<EndpointDescriptor>>();
        let answer = tokio::time::timeout(Duration::from_millis(200), recv).await;
        assert!(answer.is_err());
    }
}
