//! One-value-per-datagram channel used by the discovery protocol.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use serde::Serialize as SerdeSerialize;
use serde::de::DeserializeOwned;
use tokio::net::UdpSocket;

use crate::Serializer;

/// Largest discovery datagram we will accept. Well above what a serialized
/// endpoint set needs, well below any reassembly pathology.
const MAX_DATAGRAM_LEN: usize = 64 * 1024;

/// A datagram channel carrying exactly one serialized value per packet.
///
/// Clones share the underlying socket, so one task may sit in `recv_from`
/// while another broadcasts.
#[derive(Clone)]
pub struct DatagramChannel {
    socket: Arc<UdpSocket>,
    serializer: Serializer,
}

impl DatagramChannel {
    /// Binds a datagram channel to `addr`.
    ///
    /// # Arguments
    /// * `addr` - The local address to bind.
    /// * `broadcast` - Whether the socket may send to broadcast addresses.
    /// * `serializer` - The codec for datagram bodies.
    pub async fn bind(
        addr: SocketAddr,
        broadcast: bool,
        serializer: Serializer,
    ) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        socket.set_broadcast(broadcast)?;
        Ok(Self {
            socket: Arc::new(socket),
            serializer,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Serializes `value` and sends it to `target` as one datagram.
    pub async fn send_to<T: SerdeSerialize>(
        &self,
        value: &T,
        target: SocketAddr,
    ) -> io::Result<()> {
        let body = self.serializer.encode(value)?;
        self.socket.send_to(&body, target).await?;
        Ok(())
    }

    /// Waits for one datagram and decodes it, returning the sender address.
    ///
    /// A datagram that fails to decode returns `InvalidData`; callers log
    /// and keep receiving.
    pub async fn recv_from<T: DeserializeOwned>(&self) -> io::Result<(T, SocketAddr)> {
        let mut buf = vec![0; MAX_DATAGRAM_LEN];
        let (len, peer) = self.socket.recv_from(&mut buf).await?;
        let value = self.serializer.decode(&buf[..len])?;
        Ok((value, peer))
    }
}
