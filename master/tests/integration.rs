//! End-to-end dispatch over real sockets: a client session against a running
//! command server, with a scripted worker process on the other side.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use wire::{
    BatchAssignment, BatchOutcome, Command, EndpointDescriptor, Serializer, SimulationReply,
    SimulationRequest,
};

use master::dispatch::{DispatchServer, ModelStore};
use master::registry::FleetRegistry;

fn endpoint(port: u16) -> EndpointDescriptor {
    EndpointDescriptor::tcp(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
}

/// A worker that speaks the real protocol and completes every batch
/// immediately, echoing the batch size into its result payload.
async fn scripted_worker(listener: TcpListener) {
    loop {
        let (stream, _) = match listener.accept().await {
            Ok(conn) => conn,
            Err(_) => return,
        };
        tokio::spawn(async move {
            let (rx, tx) = stream.into_split();
            let (mut rx, mut tx) = wire::channel(rx, tx, Serializer::Json);
            loop {
                match rx.recv::<Command>().await {
                    Ok(Command::Init) => {
                        let _name: String = rx.recv().await.unwrap();
                        let _bytes = rx.recv_bytes().await.unwrap();
                    }
                    Ok(Command::Data) => {
                        let assignment: BatchAssignment = rx.recv().await.unwrap();
                        let outcome = BatchOutcome {
                            tasks: assignment.tasks,
                            elapsed_ns: 1_000_000,
                            payload: serde_json::json!({ "batch": assignment.tasks }),
                        };
                        tx.send(&outcome).await.unwrap();
                    }
                    _ => return,
                }
            }
        });
    }
}

#[tokio::test]
async fn client_request_is_served_by_the_fleet() {
    let worker_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let worker_endpoint = endpoint(worker_listener.local_addr().unwrap().port());
    tokio::spawn(scripted_worker(worker_listener));

    let registry = FleetRegistry::detached("fleet", endpoint(10001));
    registry.add_worker(worker_endpoint);

    let server = DispatchServer::new(registry, Arc::new(ModelStore::new()), Serializer::Json);
    let server_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let server_addr = server_listener.local_addr().unwrap();
    tokio::spawn(server.serve(server_listener));

    let stream = TcpStream::connect(server_addr).await.unwrap();
    let (rx, tx) = stream.into_split();
    let (mut rx, mut tx) = wire::channel(rx, tx, Serializer::Json);

    // Liveness check first, the way a real client opens a session.
    tx.send(&Command::Ping).await.unwrap();
    assert_eq!(rx.recv::<Command>().await.unwrap(), Command::Pong);

    // Ship a model definition, then a request against it.
    tx.send(&Command::Init).await.unwrap();
    tx.send(&"sir".to_string()).await.unwrap();
    tx.send_bytes(b"species S, I, R; rule infect S|I -> I|I;")
        .await
        .unwrap();

    let request = SimulationRequest {
        model: "sir".into(),
        replicas: 25,
        deadline_ms: None,
        payload: serde_json::json!({ "dt": 0.1 }),
    };
    tx.send(&Command::Data).await.unwrap();
    tx.send(&request).await.unwrap();

    assert_eq!(rx.recv::<Command>().await.unwrap(), Command::Data);
    let reply: SimulationReply = rx.recv().await.unwrap();
    assert_eq!(reply.requested, 25);
    assert_eq!(reply.completed, 25);
    let echoed: u64 = reply
        .results
        .iter()
        .map(|r| r["batch"].as_u64().unwrap())
        .sum();
    assert_eq!(echoed, 25);
}

#[tokio::test]
async fn session_survives_requests_with_no_fleet() {
    let registry = FleetRegistry::detached("fleet", endpoint(10001));
    let server = DispatchServer::new(registry, Arc::new(ModelStore::new()), Serializer::Json);
    let server_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let server_addr = server_listener.local_addr().unwrap();
    tokio::spawn(server.serve(server_listener));

    let stream = TcpStream::connect(server_addr).await.unwrap();
    let (rx, tx) = stream.into_split();
    let (mut rx, mut tx) = wire::channel(rx, tx, Serializer::Json);

    let request = SimulationRequest {
        model: "sir".into(),
        replicas: 10,
        deadline_ms: None,
        payload: serde_json::Value::Null,
    };
    tx.send(&Command::Data).await.unwrap();
    tx.send(&request).await.unwrap();

    assert_eq!(rx.recv::<Command>().await.unwrap(), Command::Data);
    let reply: SimulationReply = rx.recv().await.unwrap();
    assert_eq!(reply.completed, 0);

    // The session is still usable afterwards.
    tx.send(&Command::Ping).await.unwrap();
    assert_eq!(rx.recv::<Command>().await.unwrap(), Command::Pong);
}
