//! Monitoring fan-out: a live feed of fleet snapshots for external
//! observers.
//!
//! Subscribers register over a control connection; every registry change
//! event turns into one snapshot pushed to each subscriber over a fresh
//! outbound connection. A stalled or dead subscriber costs a log line, never
//! a registry mutation.

use std::collections::HashSet;
use std::io;
use std::sync::Arc;

use log::{info, warn};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::UnboundedReceiver;
use wire::{Command, EndpointDescriptor, Serializer, SnapshotMap};

use crate::events::RegistryChange;
use crate::registry::FleetRegistry;

pub struct MonitorFanout {
    registry: Arc<FleetRegistry>,
    serializer: Serializer,
    subscribers: Mutex<HashSet<EndpointDescriptor>>,
}

impl MonitorFanout {
    pub fn new(registry: Arc<FleetRegistry>, serializer: Serializer) -> Arc<Self> {
        Arc::new(Self {
            registry,
            serializer,
            subscribers: Mutex::new(HashSet::new()),
        })
    }

    /// Accept loop for subscriber control sessions.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> io::Result<()> {
        loop {
            let (stream, peer) = listener.accept().await?;
            let fanout = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = fanout.handle_subscriber(stream).await {
                    warn!("monitor session from {peer} dropped: {e}");
                }
            });
        }
    }

    async fn handle_subscriber(&self, stream: TcpStream) -> io::Result<()> {
        let (rx, tx) = stream.into_split();
        let (mut rx, _tx) = wire::channel(rx, tx, self.serializer);

        loop {
            let command = match rx.recv::<Command>().await {
                Ok(command) => command,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    warn!("ignoring undecodable monitor frame: {e}");
                    continue;
                }
                Err(e) => return Err(e),
            };

            match command {
                Command::MonitorSubscribe => {
                    let endpoint: EndpointDescriptor = rx.recv().await?;
                    if self.subscribers.lock().insert(endpoint) {
                        info!("monitor subscriber added: {endpoint}");
                    }
                }
                Command::MonitorUnsubscribe => {
                    let endpoint: EndpointDescriptor = rx.recv().await?;
                    if self.subscribers.lock().remove(&endpoint) {
                        info!("monitor subscriber removed: {endpoint}");
                    }
                }
                other => warn!("{other:?} is not a monitor command, ignoring"),
            }
        }
    }

    /// Consumes registry change events and pushes snapshots until the
    /// registry side of the channel closes.
    pub async fn pump(self: Arc<Self>, mut events: UnboundedReceiver<RegistryChange>) {
        while let Some(change) = events.recv().await {
            // Coalesce a burst of mutations into a single push.
            while events.try_recv().is_ok() {}

            let mut update = SnapshotMap::new();
            update.insert(change.label.to_string(), self.registry.snapshot());

            let subscribers: Vec<_> = self.subscribers.lock().iter().copied().collect();
            for subscriber in subscribers {
                if let Err(e) = self.push(&subscriber, &update).await {
                    warn!("monitor push to {subscriber} failed: {e}");
                }
            }
        }
    }

    /// One `MONITOR_UPDATE` push over a fresh outbound connection.
    async fn push(&self, subscriber: &EndpointDescriptor, update: &SnapshotMap) -> io::Result<()> {
        let (_rx, mut tx) = wire::connect(subscriber, self.serializer).await?;
        tx.send(&Command::MonitorUpdate).await?;
        tx.send(update).await
    }
}
