use std::io;
use std::net::Ipv4Addr;
use std::sync::Arc;

use log::info;
use tokio::net::TcpListener;
use tokio::signal;
use wire::EndpointDescriptor;

use master::config::MasterConfig;
use master::discovery::DiscoveryService;
use master::dispatch::{DispatchServer, ModelStore};
use master::monitor::MonitorFanout;
use master::registry::FleetRegistry;

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();
    let config = MasterConfig::from_env().map_err(io::Error::from)?;

    let dispatch_listener =
        TcpListener::bind((Ipv4Addr::UNSPECIFIED, config.dispatch_port)).await?;
    let monitor_listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, config.monitor_port)).await?;

    let self_endpoint =
        EndpointDescriptor::tcp(config.host, dispatch_listener.local_addr()?.port());
    let (registry, events) = FleetRegistry::new(&config.label, self_endpoint);

    let discovery = DiscoveryService::bind(Arc::clone(&registry), &config).await?;
    info!(
        "master {} up: dispatch {}, discovery {}, monitor {}",
        config.label,
        dispatch_listener.local_addr()?,
        discovery.local_addr()?,
        monitor_listener.local_addr()?,
    );

    let models = Arc::new(ModelStore::new());
    let dispatch = DispatchServer::new(Arc::clone(&registry), models, config.serializer);
    let fanout = MonitorFanout::new(registry, config.serializer);

    tokio::spawn(discovery.run());
    tokio::spawn(Arc::clone(&fanout).pump(events));

    tokio::select! {
        ret = dispatch.serve(dispatch_listener) => ret?,
        ret = fanout.serve(monitor_listener) => ret?,
        _ = signal::ctrl_c() => info!("received SIGTERM, shutting down"),
    }
    Ok(())
}
