//! The TCP command server facing clients.
//!
//! One task per accepted connection; each session reads one command frame at
//! a time and dispatches it. Unknown or undecodable commands are ignored, a
//! failed session dies alone.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use wire::{Command, FrameReceiver, FrameSender, Serializer, SimulationReply, SimulationRequest};

use crate::registry::FleetRegistry;
use crate::rounds::{self, TcpWorkerLink};

/// Opaque model definitions keyed by name.
///
/// The core never interprets the bytes: resolving them into an executable
/// model is the worker-side collaborator's business.
#[derive(Default)]
pub struct ModelStore {
    models: Mutex<HashMap<String, Arc<Vec<u8>>>>,
}

impl ModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: String, bytes: Vec<u8>) {
        self.models.lock().insert(name, Arc::new(bytes));
    }

    pub fn get(&self, name: &str) -> Option<Arc<Vec<u8>>> {
        self.models.lock().get(name).map(Arc::clone)
    }
}

/// Accepts client sessions and turns `DATA` requests into dispatch rounds.
pub struct DispatchServer {
    registry: Arc<FleetRegistry>,
    models: Arc<ModelStore>,
    serializer: Serializer,
}

impl DispatchServer {
    pub fn new(
        registry: Arc<FleetRegistry>,
        models: Arc<ModelStore>,
        serializer: Serializer,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            models,
            serializer,
        })
    }

    /// Accept loop. Runs until the listener itself fails.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> io::Result<()> {
        loop {
            let (stream, peer) = listener.accept().await?;
            info!("client session opened from {peer}");
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                match server.handle_session(stream).await {
                    Ok(()) => info!("client session from {peer} closed"),
                    Err(e) => warn!("client session from {peer} dropped: {e}"),
                }
            });
        }
    }

    async fn handle_session(&self, stream: TcpStream) -> io::Result<()> {
        let (rx, tx) = stream.into_split();
        let (mut rx, mut tx) = wire::channel(rx, tx, self.serializer);

        loop {
            let command = match rx.recv::<Command>().await {
                Ok(command) => command,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    warn!("ignoring undecodable command frame: {e}");
                    continue;
                }
                Err(e) => return Err(e),
            };

            match command {
                Command::Ping => {
                    debug!("ping");
                    tx.send(&Command::Pong).await?;
                }
                Command::Init => self.handle_init(&mut rx).await?,
                Command::Data => self.handle_data(&mut rx, &mut tx).await?,
                other => warn!("{other:?} is not a dispatch command, ignoring"),
            }
        }
    }

    /// `INIT`: a model name frame followed by a raw definition blob.
    async fn handle_init<R: AsyncRead + Unpin>(
        &self,
        rx: &mut FrameReceiver<R>,
    ) -> io::Result<()> {
        let name: String = rx.recv().await?;
        let bytes = rx.recv_bytes().await?;
        info!("stored model {name} ({} bytes)", bytes.len());
        self.models.insert(name, bytes);
        Ok(())
    }

    /// `DATA`: a full simulation request, fanned out across the fleet.
    async fn handle_data<R, W>(
        &self,
        rx: &mut FrameReceiver<R>,
        tx: &mut FrameSender<W>,
    ) -> io::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let request: SimulationRequest = rx.recv().await?;
        info!(
            "dispatching {} replicas of model {} across {} known workers",
            request.replicas,
            request.model,
            self.registry.worker_count(),
        );

        let link = TcpWorkerLink::new(self.serializer, Arc::clone(&self.models));
        let outcome = rounds::distribute(&self.registry, &link, &request).await;
        info!(
            "dispatch of model {} done: {}/{} replicas",
            request.model, outcome.completed, request.replicas,
        );

        let reply = SimulationReply {
            requested: request.replicas,
            completed: outcome.completed,
            results: outcome.results,
        };
        tx.send(&Command::Data).await?;
        tx.send(&reply).await
    }
}
