//! Host abstraction over the secure transport
//!
//! The transport is an external collaborator: it is assumed to hand us
//! authenticated streams keyed by peer id. Protocols interact with it
//! exclusively through this trait; tests and the bundled node use the
//! in-memory implementation in `memory`.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast;

use vigilmesh_protocol::{PeerId, MAX_WIRE_SIZE};

use crate::error::{NetError, Result};

/// Byte stream to a remote peer. One message per direction: the writer
/// half-closes after its message and the reader reads to end-of-stream.
pub trait StreamIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> StreamIo for T {}

pub type P2pStream = Box<dyn StreamIo>;

/// A stream opened towards us by a remote peer.
pub struct IncomingStream {
    pub protocol: String,
    pub remote: PeerId,
    pub stream: P2pStream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected(PeerId),
    Disconnected(PeerId),
}

#[async_trait]
pub trait Host: Send + Sync {
    fn local_peer(&self) -> PeerId;

    async fn connected_peers(&self) -> Vec<PeerId>;

    async fn connection_count(&self) -> usize;

    async fn is_connected(&self, peer: &PeerId) -> bool;

    /// Establish a connection to a known peer. Connecting to an
    /// already-connected peer is a no-op.
    async fn connect(&self, peer: PeerId) -> Result<()>;

    async fn disconnect(&self, peer: PeerId) -> Result<()>;

    /// Open a fresh outbound stream for one protocol exchange. Dials
    /// the peer if necessary; does not alter the connection set.
    async fn open_stream(&self, peer: PeerId, protocol: &str) -> Result<P2pStream>;

    /// Next inbound stream, or `None` once the host is closed.
    async fn next_incoming(&self) -> Option<IncomingStream>;

    fn subscribe_events(&self) -> broadcast::Receiver<ConnectionEvent>;

    /// Peers with usable addresses in the peer store.
    async fn known_peers(&self) -> Vec<PeerId>;

    /// Add or refresh a peer-store entry with a validity window.
    async fn remember_peer(&self, peer: PeerId, ttl: Duration);
}

/// Write one message and half-close the write side.
pub async fn write_message(stream: &mut P2pStream, bytes: &[u8]) -> Result<()> {
    if bytes.len() > MAX_WIRE_SIZE {
        return Err(NetError::MessageTooLarge {
            size: bytes.len(),
            max: MAX_WIRE_SIZE,
        });
    }
    stream.write_all(bytes).await?;
    stream.flush().await?;
    stream.shutdown().await?;
    Ok(())
}

/// Read one message: everything until the remote half-closes.
pub async fn read_message(stream: &mut P2pStream) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(buf);
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.len() > MAX_WIRE_SIZE {
            return Err(NetError::MessageTooLarge {
                size: buf.len(),
                max: MAX_WIRE_SIZE,
            });
        }
    }
}
