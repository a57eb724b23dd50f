//! The batch server: the worker side of the master's dispatch protocol.
//!
//! One task per master connection. A session interleaves `PING` liveness
//! checks, `INIT` model pushes, and `DATA` batch rounds on the same framed
//! stream; batches themselves run on blocking threads so a long round never
//! starves the reactor.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use wire::{BatchAssignment, BatchOutcome, Command, FrameReceiver, FrameSender, Serializer};

use crate::error::WorkerErr;
use crate::executor::SimulationExecutor;

pub struct BatchServer {
    executor: Arc<dyn SimulationExecutor>,
    serializer: Serializer,
    models: Mutex<HashMap<String, Arc<Vec<u8>>>>,
}

impl BatchServer {
    pub fn new(executor: Arc<dyn SimulationExecutor>, serializer: Serializer) -> Arc<Self> {
        Arc::new(Self {
            executor,
            serializer,
            models: Mutex::new(HashMap::new()),
        })
    }

    /// Accept loop for one listener. Runs until the listener itself fails.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> io::Result<()> {
        loop {
            let (stream, peer) = listener.accept().await?;
            info!("master connected from {peer}");
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                match server.handle_session(stream).await {
                    Ok(()) => info!("master session from {peer} closed"),
                    Err(e) => warn!("master session from {peer} dropped: {e}"),
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
                other => warn!("{other:?} is not a worker command, ignoring"),
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
        info!("received model {name} ({} bytes)", bytes.len());
        self.models.lock().insert(name, Arc::new(bytes));
        Ok(())
    }

    /// `DATA`: one batch, executed on a blocking thread, answered with its
    /// outcome. A batch naming an unknown model kills the session, which the
    /// master reads as a failed round.
    async fn handle_data<R, W>(
        &self,
        rx: &mut FrameReceiver<R>,
        tx: &mut FrameSender<W>,
    ) -> io::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let assignment: BatchAssignment = rx.recv().await?;
        let model = self
            .models
            .lock()
            .get(&assignment.request.model)
            .map(Arc::clone)
            .ok_or_else(|| WorkerErr::UnknownModel {
                name: assignment.request.model.clone(),
            })?;

        debug!(
            "running {} replicas of model {}",
            assignment.tasks, assignment.request.model,
        );
        let tasks = assignment.tasks;
        let executor = Arc::clone(&self.executor);
        let started = Instant::now();
        let output = tokio::task::spawn_blocking(move || executor.run(&model, &assignment))
            .await
            .map_err(io::Error::other)?;

        let outcome = BatchOutcome {
            tasks,
            elapsed_ns: started.elapsed().as_nanos() as u64,
            payload: output.payload,
        };
        tx.send(&outcome).await
    }
}
