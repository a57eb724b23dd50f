//! Wire protocol shared by every process in the fleet.
//!
//! Control and dispatch traffic rides on length-framed byte messages over a
//! stream transport; discovery rides on single-value datagrams. The codec
//! behind both is the pluggable [`Serializer`], which is never inspected
//! beyond encode/decode.

mod command;
mod datagram;
mod endpoint;
mod messages;
mod receiver;
mod sender;
mod serializer;

use std::io;
use std::net::IpAddr;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

pub use command::Command;
pub use datagram::DatagramChannel;
pub use endpoint::{EndpointDescriptor, ProtocolKind};
pub use messages::{
    BatchAssignment, BatchOutcome, FleetSnapshot, SimulationReply, SimulationRequest, SnapshotMap,
    WorkerLoadReport,
};
pub use receiver::FrameReceiver;
pub use sender::FrameSender;
pub use serializer::Serializer;

type LenType = u32;
const LEN_TYPE_SIZE: usize = size_of::<LenType>();

/// Upper bound on a single frame's body. A peer announcing more than this is
/// treated as a malformed stream, not an allocation request.
const MAX_FRAME_LEN: usize = 64 << 20;

/// Creates both ends of a framed channel over a reader/writer pair.
///
/// # Arguments
/// * `rx` - An async readable.
/// * `tx` - An async writable.
/// * `serializer` - The codec both ends will use.
pub fn channel<R, W>(rx: R, tx: W, serializer: Serializer) -> (FrameReceiver<R>, FrameSender<W>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    (
        FrameReceiver::new(rx, serializer),
        FrameSender::new(tx, serializer),
    )
}

/// Opens a TCP connection to `endpoint` and wraps it in a framed channel.
pub async fn connect(
    endpoint: &EndpointDescriptor,
    serializer: Serializer,
) -> io::Result<(FrameReceiver<OwnedReadHalf>, FrameSender<OwnedWriteHalf>)> {
    let stream = TcpStream::connect(endpoint.socket_addr()).await?;
    // Frames are small and sent back-to-back (command, then payload); Nagle
    // would hold the second behind the peer's delayed ACK.
    stream.set_nodelay(true)?;
    let (rx, tx) = stream.into_split();
    Ok(channel(rx, tx, serializer))
}

/// Best-effort local address discovery.
///
/// Routes an unconnected datagram socket towards a public address and reads
/// back the source the OS picked. No packet is actually sent.
pub fn local_ip() -> io::Result<IpAddr> {
    let socket = std::net::UdpSocket::bind("0.0.0.0:0")?;
    socket.connect(("198.51.100.1", 80))?;
    Ok(socket.local_addr()?.ip())
}
