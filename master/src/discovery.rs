//! Fleet discovery: periodic UDP broadcast of our own endpoint, plus a
//! listener that folds advertised worker endpoints into the registry.
//!
//! Discovery is best-effort end to end. Lost datagrams are repaired by the
//! next broadcast cycle, duplicates vanish in the registry's map semantics,
//! and dead workers are only ever detected by dispatch timeouts.

use std::collections::HashSet;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::mpsc::{self, Receiver};
use tokio::sync::mpsc::error::TrySendError;
use wire::{DatagramChannel, EndpointDescriptor};

use crate::config::MasterConfig;
use crate::registry::FleetRegistry;

/// Fixed number of datagram handler tasks. Registry mutation is cheap; two
/// handlers absorb a broadcast storm without stalling the receive loop.
const HANDLER_POOL_SIZE: usize = 2;

/// Datagrams queued for handling before the receive loop starts dropping.
const HANDLER_QUEUE_DEPTH: usize = 64;

/// The master side of the discovery protocol.
pub struct DiscoveryService {
    registry: Arc<FleetRegistry>,
    channel: DatagramChannel,
    announce: EndpointDescriptor,
    broadcast_addrs: Vec<Ipv4Addr>,
    worker_discovery_port: u16,
    interval: Duration,
}

impl DiscoveryService {
    /// Binds the discovery socket described by `config`.
    pub async fn bind(registry: Arc<FleetRegistry>, config: &MasterConfig) -> io::Result<Self> {
        let local = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.discovery_port));
        let channel = DatagramChannel::bind(local, true, config.serializer).await?;
        let announce =
            EndpointDescriptor::udp(config.host, channel.local_addr()?.port());

        Ok(Self {
            registry,
            channel,
            announce,
            broadcast_addrs: config.broadcast_addrs.clone(),
            worker_discovery_port: config.worker_discovery_port,
            interval: config.broadcast_interval,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.channel.local_addr()
    }

    /// Runs the broadcaster, the handler pool, and the receive loop. Never
    /// returns; every failure inside is logged and ridden out.
    pub async fn run(self) {
        let (queue_tx, queue_rx) = mpsc::channel::<HashSet<EndpointDescriptor>>(HANDLER_QUEUE_DEPTH);

        let queue_rx = Arc::new(tokio::sync::Mutex::new(queue_rx));
        for _ in 0..HANDLER_POOL_SIZE {
            let registry = Arc::clone(&self.registry);
            let queue_rx = Arc::clone(&queue_rx);
            tokio::spawn(handle_announcements(registry, queue_rx));
        }

        tokio::spawn(broadcast_cycle(
            self.channel.clone(),
            self.announce,
            self.broadcast_addrs.clone(),
            self.worker_discovery_port,
            self.interval,
        ));

        loop {
            match self.channel.recv_from::<HashSet<EndpointDescriptor>>().await {
                Ok((endpoints, peer)) => {
                    debug!("{} endpoints announced from {peer}", endpoints.len());
                    match queue_tx.try_send(endpoints) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            // Best-effort: the announcer rebroadcasts on its
                            // next cycle anyway.
                            warn!("discovery handler queue full, dropping datagram from {peer}");
                        }
                        Err(TrySendError::Closed(_)) => return,
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    warn!("malformed discovery datagram: {e}");
                }
                Err(e) => {
                    error!("discovery receive failed: {e}");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }
}

/// One handler task: fold announced endpoint sets into the registry.
async fn handle_announcements(
    registry: Arc<FleetRegistry>,
    queue_rx: Arc<tokio::sync::Mutex<Receiver<HashSet<EndpointDescriptor>>>>,
) {
    loop {
        let endpoints = match queue_rx.lock().await.recv().await {
            Some(endpoints) => endpoints,
            None => return,
        };
        for endpoint in endpoints {
            if registry.add_worker(endpoint) {
                info!("discovered worker {endpoint}");
            }
        }
    }
}

/// Sends our endpoint descriptor to every configured broadcast address on
/// the workers' discovery port, then sleeps out the interval.
async fn broadcast_cycle(
    channel: DatagramChannel,
    announce: EndpointDescriptor,
    broadcast_addrs: Vec<Ipv4Addr>,
    worker_discovery_port: u16,
    interval: Duration,
) {
    loop {
        for addr in &broadcast_addrs {
            let target = SocketAddr::from((*addr, worker_discovery_port));
            match channel.send_to(&announce, target).await {
                Ok(()) => debug!("broadcast {announce} to {target}"),
                Err(e) => warn!("broadcast to {target} failed: {e}"),
            }
        }
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use std::net::IpAddr;

    use wire::Serializer;

    use super::*;

    fn test_config(worker_discovery_port: u16, broadcast_addrs: Vec<Ipv4Addr>) -> MasterConfig {
        MasterConfig {
            label: "fleet".into(),
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            dispatch_port: 0,
            discovery_port: 0,
            worker_discovery_port,
            monitor_port: 0,
            broadcast_interval: Duration::from_millis(50),
            broadcast_addrs,
            serializer: Serializer::Json,
        }
    }

    fn endpoint(port: u16) -> EndpointDescriptor {
        EndpointDescriptor::tcp(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    async fn wait_for_workers(registry: &FleetRegistry, count: usize) {
        for _ in 0..100 {
            if registry.worker_count() == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "registry never reached {count} workers, has {}",
            registry.worker_count()
        );
    }

    #[tokio::test]
    async fn repeated_announcements_register_once() {
        let registry = FleetRegistry::detached("fleet", endpoint(10001));
        let service = DiscoveryService::bind(Arc::clone(&registry), &test_config(0, Vec::new()))
            .await
            .unwrap();
        let master_addr = service.local_addr().unwrap();
        tokio::spawn(service.run());

        let announcer = DatagramChannel::bind(
            SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            false,
            Serializer::Json,
        )
        .await
        .unwrap();

        let announced: HashSet<_> = [endpoint(9000), endpoint(9001), endpoint(9002)].into();
        for _ in 0..3 {
            announcer.send_to(&announced, master_addr).await.unwrap();
        }

        wait_for_workers(&registry, 3).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(registry.worker_count(), 3);
    }

    #[tokio::test]
    async fn broadcast_carries_own_endpoint() {
        let listener = DatagramChannel::bind(
            SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            false,
            Serializer::Json,
        )
        .await
        .unwrap();
        let listener_port = listener.local_addr().unwrap().port();

        let registry = FleetRegistry::detached("fleet", endpoint(10001));
        let config = test_config(listener_port, vec![Ipv4Addr::LOCALHOST]);
        let service = DiscoveryService::bind(registry, &config).await.unwrap();
        let announce = service.announce;
        tokio::spawn(service.run());

        let (received, _): (EndpointDescriptor, _) = listener.recv_from().await.unwrap();
        assert_eq!(received, announce);
    }
}
