//! In-process host implementation
//!
//! A `MemoryHub` plays the role of the network: every host created on
//! the hub can dial every other by peer id. Streams are duplex pipes,
//! so the EOF-framed one-message-per-direction contract behaves exactly
//! like a real transport stream.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tracing::debug;

use vigilmesh_protocol::PeerId;

use crate::error::{NetError, Result};
use crate::host::{ConnectionEvent, Host, IncomingStream, P2pStream};

const STREAM_BUFFER: usize = 64 * 1024;
const INCOMING_BACKLOG: usize = 64;
const EVENT_BACKLOG: usize = 64;

struct HostShared {
    peer: PeerId,
    incoming_tx: mpsc::Sender<IncomingStream>,
    connected: RwLock<HashSet<PeerId>>,
    known: RwLock<HashMap<PeerId, Instant>>,
    events: broadcast::Sender<ConnectionEvent>,
}

/// The in-process "network" connecting memory hosts.
pub struct MemoryHub {
    nodes: RwLock<HashMap<PeerId, Arc<HostShared>>>,
}

impl MemoryHub {
    pub fn new() -> Arc<Self> {
        Arc::new(MemoryHub {
            nodes: RwLock::new(HashMap::new()),
        })
    }

    /// Register a new host on the hub.
    pub async fn create_host(self: &Arc<Self>, peer: PeerId) -> Arc<MemoryHost> {
        let (incoming_tx, incoming_rx) = mpsc::channel(INCOMING_BACKLOG);
        let (events, _) = broadcast::channel(EVENT_BACKLOG);

        let shared = Arc::new(HostShared {
            peer,
            incoming_tx,
            connected: RwLock::new(HashSet::new()),
            known: RwLock::new(HashMap::new()),
            events,
        });
        self.nodes.write().await.insert(peer, shared.clone());

        Arc::new(MemoryHost {
            hub: self.clone(),
            shared,
            incoming_rx: Mutex::new(incoming_rx),
        })
    }

    async fn node(&self, peer: &PeerId) -> Result<Arc<HostShared>> {
        self.nodes
            .read()
            .await
            .get(peer)
            .cloned()
            .ok_or(NetError::UnknownPeer(*peer))
    }
}

pub struct MemoryHost {
    hub: Arc<MemoryHub>,
    shared: Arc<HostShared>,
    incoming_rx: Mutex<mpsc::Receiver<IncomingStream>>,
}

impl MemoryHost {
    fn emit(shared: &HostShared, event: ConnectionEvent) {
        // Nobody subscribed yet is fine.
        let _ = shared.events.send(event);
    }
}

#[async_trait]
impl Host for MemoryHost {
    fn local_peer(&self) -> PeerId {
        self.shared.peer
    }

    async fn connected_peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.shared.connected.read().await.iter().copied().collect();
        peers.sort();
        peers
    }

    async fn connection_count(&self) -> usize {
        self.shared.connected.read().await.len()
    }

    async fn is_connected(&self, peer: &PeerId) -> bool {
        self.shared.connected.read().await.contains(peer)
    }

    async fn connect(&self, peer: PeerId) -> Result<()> {
        if peer == self.shared.peer {
            return Err(NetError::SelfDial);
        }
        let remote = self.hub.node(&peer).await?;

        {
            let mut mine = self.shared.connected.write().await;
            if mine.contains(&peer) {
                return Ok(());
            }
            mine.insert(peer);
        }
        remote.connected.write().await.insert(self.shared.peer);

        debug!(local = %self.shared.peer, remote = %peer, "connected");
        Self::emit(&self.shared, ConnectionEvent::Connected(peer));
        Self::emit(&remote, ConnectionEvent::Connected(self.shared.peer));
        Ok(())
    }

    async fn disconnect(&self, peer: PeerId) -> Result<()> {
        let removed = self.shared.connected.write().await.remove(&peer);
        if !removed {
            return Ok(());
        }
        if let Ok(remote) = self.hub.node(&peer).await {
            remote.connected.write().await.remove(&self.shared.peer);
            Self::emit(&remote, ConnectionEvent::Disconnected(self.shared.peer));
        }

        debug!(local = %self.shared.peer, remote = %peer, "disconnected");
        Self::emit(&self.shared, ConnectionEvent::Disconnected(peer));
        Ok(())
    }

    async fn open_stream(&self, peer: PeerId, protocol: &str) -> Result<P2pStream> {
        if peer == self.shared.peer {
            return Err(NetError::SelfDial);
        }
        let remote = self.hub.node(&peer).await?;

        let (near, far) = tokio::io::duplex(STREAM_BUFFER);
        let incoming = IncomingStream {
            protocol: protocol.to_string(),
            remote: self.shared.peer,
            stream: Box::new(far),
        };
        remote
            .incoming_tx
            .send(incoming)
            .await
            .map_err(|_| NetError::ChannelClosed)?;

        Ok(Box::new(near))
    }

    async fn next_incoming(&self) -> Option<IncomingStream> {
        self.incoming_rx.lock().await.recv().await
    }

    fn subscribe_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.events.subscribe()
    }

    async fn known_peers(&self) -> Vec<PeerId> {
        let now = Instant::now();
        let mut known = self.shared.known.write().await;
        known.retain(|_, expires| *expires > now);

        let mut peers: Vec<PeerId> = known.keys().copied().collect();
        peers.sort();
        peers
    }

    async fn remember_peer(&self, peer: PeerId, ttl: Duration) {
        if peer == self.shared.peer {
            return;
        }
        self.shared
            .known
            .write()
            .await
            .insert(peer, Instant::now() + ttl);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{read_message, write_message};
    use vigilmesh_protocol::PEER_ID_SIZE;

    fn peer(seed: u8) -> PeerId {
        PeerId::from_bytes([seed; PEER_ID_SIZE])
    }

    #[tokio::test]
    async fn test_connect_is_symmetric() {
        let hub = MemoryHub::new();
        let a = hub.create_host(peer(1)).await;
        let b = hub.create_host(peer(2)).await;

        a.connect(peer(2)).await.unwrap();
        assert!(a.is_connected(&peer(2)).await);
        assert!(b.is_connected(&peer(1)).await);
        assert_eq!(a.connection_count().await, 1);

        // Idempotent.
        a.connect(peer(2)).await.unwrap();
        assert_eq!(b.connection_count().await, 1);
    }

    #[tokio::test]
    async fn test_self_dial_rejected() {
        let hub = MemoryHub::new();
        let a = hub.create_host(peer(1)).await;
        assert!(matches!(a.connect(peer(1)).await, Err(NetError::SelfDial)));
        assert!(matches!(
            a.open_stream(peer(1), "/x/1").await,
            Err(NetError::SelfDial)
        ));
    }

    #[tokio::test]
    async fn test_events_fire_on_both_sides() {
        let hub = MemoryHub::new();
        let a = hub.create_host(peer(1)).await;
        let b = hub.create_host(peer(2)).await;

        let mut ev_a = a.subscribe_events();
        let mut ev_b = b.subscribe_events();

        a.connect(peer(2)).await.unwrap();
        assert_eq!(ev_a.recv().await.unwrap(), ConnectionEvent::Connected(peer(2)));
        assert_eq!(ev_b.recv().await.unwrap(), ConnectionEvent::Connected(peer(1)));

        b.disconnect(peer(1)).await.unwrap();
        assert_eq!(
            ev_a.recv().await.unwrap(),
            ConnectionEvent::Disconnected(peer(2))
        );
        assert_eq!(
            ev_b.recv().await.unwrap(),
            ConnectionEvent::Disconnected(peer(1))
        );
    }

    #[tokio::test]
    async fn test_stream_roundtrip() {
        let hub = MemoryHub::new();
        let a = hub.create_host(peer(1)).await;
        let b = hub.create_host(peer(2)).await;

        let mut out = a.open_stream(peer(2), "/echo/0.0.1").await.unwrap();
        write_message(&mut out, b"hello").await.unwrap();

        let incoming = b.next_incoming().await.unwrap();
        assert_eq!(incoming.protocol, "/echo/0.0.1");
        assert_eq!(incoming.remote, peer(1));

        let mut stream = incoming.stream;
        assert_eq!(read_message(&mut stream).await.unwrap(), b"hello");

        // Reply on the same stream, read after our half-close.
        write_message(&mut stream, b"world").await.unwrap();
        drop(stream);
        assert_eq!(read_message(&mut out).await.unwrap(), b"world");
    }

    #[tokio::test]
    async fn test_peer_store_ttl() {
        let hub = MemoryHub::new();
        let a = hub.create_host(peer(1)).await;

        a.remember_peer(peer(2), Duration::from_secs(60)).await;
        a.remember_peer(peer(3), Duration::from_millis(1)).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(a.known_peers().await, vec![peer(2)]);
    }

    #[tokio::test]
    async fn test_dial_unknown_peer() {
        let hub = MemoryHub::new();
        let a = hub.create_host(peer(1)).await;
        assert!(matches!(
            a.open_stream(peer(9), "/x/1").await,
            Err(NetError::UnknownPeer(_))
        ));
    }
}
