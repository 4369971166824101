//! TCP transport.
//!
//! Every link is one TCP connection carrying back-to-back packets: a 64-byte
//! header followed by `payload_size` bytes. Each link gets a reader task
//! that decodes packets into the node's inbound channel and a writer task
//! that drains a bounded queue of encoded packets. Dropping the queue's
//! sender ends the writer, which shuts the socket down.

use std::net::SocketAddr;

use busroute_core::LinkId;
use busroute_proto::{BusId, Packet, PacketHeader};
use bytes::{Bytes, BytesMut};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::mpsc,
    task::JoinHandle,
};

use crate::error::NodeError;

/// Encoded packets a link may queue before it counts as stalled.
pub const LINK_QUEUE_DEPTH: usize = 1024;

/// Everything the runtime loop reacts to, funneled through one channel.
#[derive(Debug)]
pub enum Inbound {
    /// A peer connected to our listener
    Accepted {
        /// The new connection
        stream: TcpStream,
        /// Peer address
        remote: SocketAddr,
    },

    /// A dial finished
    Dialed {
        /// Peer we dialed
        bus_id: BusId,
        /// Connection, or why there is none
        result: Result<TcpStream, String>,
    },

    /// A link decoded a packet
    Packet {
        /// Link it arrived on
        link_id: LinkId,
        /// Decoded packet
        packet: Packet,
    },

    /// A link's reader stopped
    Closed {
        /// Link that closed
        link_id: LinkId,
        /// Reason for closure
        reason: String,
    },
}

/// TCP listener for incoming links.
pub struct TcpTransport {
    listener: TcpListener,
}

impl TcpTransport {
    /// Bind a listener.
    pub async fn bind(address: &str) -> Result<Self, NodeError> {
        let addr: SocketAddr = address
            .parse()
            .map_err(|e| NodeError::Config(format!("invalid listen address '{address}': {e}")))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| NodeError::Transport(format!("failed to bind {addr}: {e}")))?;

        tracing::info!("TCP transport bound to {}", addr);

        Ok(Self { listener })
    }

    /// Local address the transport is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, NodeError> {
        self.listener
            .local_addr()
            .map_err(|e| NodeError::Transport(format!("failed to get local address: {e}")))
    }

    /// Accept connections forever, handing each to `inbound`.
    ///
    /// Returns once the runtime loop has gone away.
    pub async fn accept_loop(self, inbound: mpsc::Sender<Inbound>) {
        loop {
            match self.listener.accept().await {
                Ok((stream, remote)) => {
                    if inbound.send(Inbound::Accepted { stream, remote }).await.is_err() {
                        return;
                    }
                },
                Err(e) => {
                    tracing::error!("Accept error: {}", e);
                },
            }
        }
    }
}

/// Socket address from a `tcp://host:port` (or bare `host:port`) URL.
pub fn socket_addr(url: &str) -> &str {
    url.strip_prefix("tcp://").unwrap_or(url)
}

/// Dial a peer and report the result on `inbound`.
pub fn spawn_dial(bus_id: BusId, url: String, inbound: mpsc::Sender<Inbound>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let result = TcpStream::connect(socket_addr(&url)).await.map_err(|e| format!("{url}: {e}"));
        if let Ok(stream) = &result
            && let Err(e) = stream.set_nodelay(true)
        {
            tracing::debug!("set_nodelay failed for {}: {}", url, e);
        }
        let _ = inbound.send(Inbound::Dialed { bus_id, result }).await;
    })
}

/// A running link: its outbound queue and the tasks serving it.
pub struct LinkHandle {
    outbound: mpsc::Sender<Bytes>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl LinkHandle {
    /// Start reader and writer tasks for a connection.
    pub fn spawn(link_id: LinkId, stream: TcpStream, inbound: mpsc::Sender<Inbound>) -> Self {
        let (read_half, write_half) = stream.into_split();
        let (outbound, queue) = mpsc::channel(LINK_QUEUE_DEPTH);

        let reader = tokio::spawn(read_loop(link_id, read_half, inbound));
        let writer = tokio::spawn(write_loop(link_id, write_half, queue));

        Self { outbound, reader, writer }
    }

    /// Queue a packet for sending.
    ///
    /// # Errors
    ///
    /// `NodeError::Transport` if the queue is full or the writer has stopped.
    /// The caller should close the link.
    pub fn send(&self, packet: &Packet) -> Result<(), NodeError> {
        let mut buf = BytesMut::with_capacity(packet.encoded_len());
        packet.encode(&mut buf)?;
        self.outbound.try_send(buf.freeze()).map_err(|e| NodeError::Transport(format!("link queue: {e}")))
    }

    /// Stop reading and let the writer flush what is queued, then shut down.
    pub fn close(self) {
        self.reader.abort();
        drop(self.outbound);
        drop(self.writer);
    }
}

async fn read_loop(link_id: LinkId, mut reader: OwnedReadHalf, inbound: mpsc::Sender<Inbound>) {
    let reason = loop {
        match read_packet(&mut reader).await {
            Ok(Some(packet)) => {
                if inbound.send(Inbound::Packet { link_id, packet }).await.is_err() {
                    return;
                }
            },
            Ok(None) => break "connection closed by peer".to_string(),
            Err(e) => break e.to_string(),
        }
    };
    let _ = inbound.send(Inbound::Closed { link_id, reason }).await;
}

async fn write_loop(link_id: LinkId, mut writer: OwnedWriteHalf, mut queue: mpsc::Receiver<Bytes>) {
    while let Some(bytes) = queue.recv().await {
        if let Err(e) = writer.write_all(&bytes).await {
            tracing::debug!("write failed on link {}: {}", link_id, e);
            return;
        }
    }
    let _ = writer.shutdown().await;
}

/// Read one packet. `Ok(None)` on a clean end of stream between packets.
///
/// # Errors
///
/// `NodeError::Protocol` for a malformed header, `NodeError::Transport` if
/// the stream ends mid-packet.
pub async fn read_packet<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Packet>, NodeError> {
    let mut buf = BytesMut::zeroed(PacketHeader::SIZE);

    match reader.read_exact(&mut buf[..]).await {
        Ok(_) => {},
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let payload_size = PacketHeader::from_bytes(&buf)?.payload_size() as usize;
    if payload_size > 0 {
        buf.resize(PacketHeader::SIZE + payload_size, 0);
        reader.read_exact(&mut buf[PacketHeader::SIZE..]).await?;
    }

    Ok(Some(Packet::decode(&buf)?))
}
