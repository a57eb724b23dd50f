//! Client-side sessions against a master: request dispatch and the
//! monitoring feed.

use std::io;
use std::net::{IpAddr, Ipv4Addr};

use log::info;
use tokio::net::TcpListener;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use wire::{
    Command, EndpointDescriptor, FrameReceiver, FrameSender, Serializer, SimulationReply,
    SimulationRequest, SnapshotMap,
};

/// One framed session against a master's command server.
pub struct ClientSession {
    rx: FrameReceiver<OwnedReadHalf>,
    tx: FrameSender<OwnedWriteHalf>,
}

impl ClientSession {
    pub async fn connect(master: &EndpointDescriptor, serializer: Serializer) -> io::Result<Self> {
        let (rx, tx) = wire::connect(master, serializer).await?;
        Ok(Self { rx, tx })
    }

    /// `PING`/`PONG` liveness round trip.
    pub async fn ping(&mut self) -> io::Result<()> {
        self.tx.send(&Command::Ping).await?;
        match self.rx.recv::<Command>().await? {
            Command::Pong => Ok(()),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("expected PONG, got {other:?}"),
            )),
        }
    }

    /// Ships a model definition under `name` for later requests to refer to.
    pub async fn load_model(&mut self, name: &str, definition: &[u8]) -> io::Result<()> {
        self.tx.send(&Command::Init).await?;
        self.tx.send(&name).await?;
        self.tx.send_bytes(definition).await
    }

    /// Submits a simulation request and waits out the whole dispatch.
    pub async fn submit(&mut self, request: &SimulationRequest) -> io::Result<SimulationReply> {
        self.tx.send(&Command::Data).await?;
        self.tx.send(request).await?;
        match self.rx.recv::<Command>().await? {
            Command::Data => self.rx.recv().await,
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("expected DATA reply, got {other:?}"),
            )),
        }
    }
}

/// A live subscription to a master's monitoring feed.
///
/// Subscribing opens a local listener for pushes and registers its endpoint
/// over the monitor control connection. Dropping the subscription without
/// [`MonitorSubscription::unsubscribe`] leaves the master pushing to a dead
/// endpoint; it logs and carries on, but unsubscribing is politer.
pub struct MonitorSubscription {
    control_tx: FrameSender<OwnedWriteHalf>,
    listener: TcpListener,
    push_endpoint: EndpointDescriptor,
    serializer: Serializer,
}

impl MonitorSubscription {
    pub async fn subscribe(
        monitor: &EndpointDescriptor,
        serializer: Serializer,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind("0.0.0.0:0").await?;
        let host = wire::local_ip().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
        let push_endpoint = EndpointDescriptor::tcp(host, listener.local_addr()?.port());

        let (_control_rx, mut control_tx) = wire::connect(monitor, serializer).await?;
        control_tx.send(&Command::MonitorSubscribe).await?;
        control_tx.send(&push_endpoint).await?;
        info!("subscribed to {monitor}, receiving pushes at {push_endpoint}");

        Ok(Self {
            control_tx,
            listener,
            push_endpoint,
            serializer,
        })
    }

    /// Waits for the next snapshot push.
    pub async fn recv_update(&mut self) -> io::Result<SnapshotMap> {
        loop {
            let (stream, _) = self.listener.accept().await?;
            let (rx, tx) = stream.into_split();
            let (mut rx, _tx) = wire::channel(rx, tx, self.serializer);
            match rx.recv::<Command>().await? {
                Command::MonitorUpdate => return rx.recv().await,
                // Not a push; whoever connected gets dropped.
                _ => continue,
            }
        }
    }

    /// Deregisters the push endpoint and closes the subscription.
    pub async fn unsubscribe(mut self) -> io::Result<()> {
        self.control_tx.send(&Command::MonitorUnsubscribe).await?;
        self.control_tx.send(&self.push_endpoint).await
    }
}
