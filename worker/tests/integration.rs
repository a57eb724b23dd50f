//! The worker over real sockets, driven the way a master drives it.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use wire::{BatchAssignment, BatchOutcome, Command, Serializer, SimulationRequest};

use worker::executor::{SimulationExecutor, SyntheticExecutor};
use worker::server::BatchServer;

fn request(model: &str, replicas: u64) -> SimulationRequest {
    SimulationRequest {
        model: model.into(),
        replicas,
        deadline_ms: None,
        payload: serde_json::Value::Null,
    }
}

async fn serve() -> std::net::SocketAddr {
    let executor: Arc<dyn SimulationExecutor> =
        Arc::new(SyntheticExecutor::new(Duration::from_micros(10)));
    let server = BatchServer::new(executor, Serializer::Json);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server.serve(listener));
    addr
}

#[tokio::test]
async fn init_then_batches_on_one_session() {
    let addr = serve().await;
    let stream = TcpStream::connect(addr).await.unwrap();
    let (rx, tx) = stream.into_split();
    let (mut rx, mut tx) = wire::channel(rx, tx, Serializer::Json);

    tx.send(&Command::Ping).await.unwrap();
    assert_eq!(rx.recv::<Command>().await.unwrap(), Command::Pong);

    tx.send(&Command::Init).await.unwrap();
    tx.send(&"sir".to_string()).await.unwrap();
    tx.send_bytes(b"species S, I, R;").await.unwrap();

    for tasks in [1, 2, 4] {
        tx.send(&Command::Data).await.unwrap();
        tx.send(&BatchAssignment {
            request: request("sir", 100),
            tasks,
        })
        .await
        .unwrap();

        let outcome: BatchOutcome = rx.recv().await.unwrap();
        assert_eq!(outcome.tasks, tasks);
        assert!(outcome.elapsed_ns > 0);
        assert_eq!(outcome.payload["replicas"], tasks);
    }
}

#[tokio::test]
async fn batch_for_unknown_model_drops_the_session() {
    let addr = serve().await;
    let stream = TcpStream::connect(addr).await.unwrap();
    let (rx, tx) = stream.into_split();
    let (mut rx, mut tx) = wire::channel(rx, tx, Serializer::Json);

    tx.send(&Command::Data).await.unwrap();
    tx.send(&BatchAssignment {
        request: request("never-initialized", 10),
        tasks: 1,
    })
    .await
    .unwrap();

    // No outcome comes back; the server closes the stream instead.
    assert!(rx.recv::<BatchOutcome>().await.is_err());
}
