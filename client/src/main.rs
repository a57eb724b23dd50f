use std::net::{IpAddr, Ipv4Addr};
use std::{env, io};

use log::info;
use wire::{EndpointDescriptor, Serializer, SimulationRequest};

use client::ClientSession;

const DEFAULT_DISPATCH_PORT: u16 = 10001;

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();

    let host: IpAddr = match env::var("MASTER_HOST") {
        Ok(raw) => raw.parse().map_err(io::Error::other)?,
        Err(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
    };
    let port = match env::var("MASTER_DISPATCH_PORT") {
        Ok(raw) => raw.parse().map_err(io::Error::other)?,
        Err(_) => DEFAULT_DISPATCH_PORT,
    };
    let master = EndpointDescriptor::tcp(host, port);

    let mut session = ClientSession::connect(&master, Serializer::default()).await?;
    session.ping().await?;
    info!("master at {master} is alive");

    let Ok(model) = env::var("CLIENT_MODEL") else {
        return Ok(());
    };
    let definition = match env::var("CLIENT_MODEL_FILE") {
        Ok(path) => std::fs::read(path)?,
        Err(_) => Vec::new(),
    };
    if !definition.is_empty() {
        session.load_model(&model, &definition).await?;
        info!("loaded model {model} ({} bytes)", definition.len());
    }

    let replicas = match env::var("CLIENT_REPLICAS") {
        Ok(raw) => raw.parse().map_err(io::Error::other)?,
        Err(_) => 1,
    };
    let reply = session
        .submit(&SimulationRequest {
            model,
            replicas,
            deadline_ms: None,
            payload: serde_json::Value::Null,
        })
        .await?;
    info!(
        "dispatch finished: {}/{} replicas, {} result payloads",
        reply.completed,
        reply.requested,
        reply.results.len(),
    );
    Ok(())
}
