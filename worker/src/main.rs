use std::collections::HashSet;
use std::io;
use std::net::Ipv4Addr;
use std::sync::Arc;

use log::info;
use tokio::net::TcpListener;
use tokio::signal;
use wire::EndpointDescriptor;

use worker::announce::Announcer;
use worker::config::WorkerConfig;
use worker::executor::{SimulationExecutor, SyntheticExecutor};
use worker::server::BatchServer;

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();
    let config = WorkerConfig::from_env().map_err(io::Error::from)?;

    let mut listeners = Vec::new();
    let mut endpoints = HashSet::new();
    for port in &config.server_ports {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, *port)).await?;
        let bound = listener.local_addr()?.port();
        endpoints.insert(EndpointDescriptor::tcp(config.host, bound));
        listeners.push(listener);
    }

    let announcer = Announcer::bind(config.discovery_port, endpoints.clone(), config.serializer)
        .await?;
    info!(
        "worker up: {} batch listeners, discovery on {}",
        listeners.len(),
        announcer.local_addr()?,
    );
    for endpoint in &endpoints {
        info!("serving batches at {endpoint}");
    }

    let executor: Arc<dyn SimulationExecutor> =
        Arc::new(SyntheticExecutor::new(config.task_cost));
    for listener in listeners {
        let server = BatchServer::new(Arc::clone(&executor), config.serializer);
        tokio::spawn(server.serve(listener));
    }

    tokio::select! {
        () = announcer.run() => {}
        _ = signal::ctrl_c() => info!("received SIGTERM, shutting down"),
    }
    Ok(())
}
