//! Connection manager
//!
//! Reacts to transport connection events: tags peers with their
//! reliability, kicks off the organisation-signature exchange on new
//! connections, keeps the TL informed about the connected set and asks
//! the connecter for replacements when peers drop away. Built last
//! during node assembly so every dependency is already wired when the
//! first event arrives.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use vigilmesh_books::{ReliabilityBook, ReliabilityCallback};
use vigilmesh_protocol::PeerId;

use crate::connecter::ConnecterHandle;
use crate::host::{ConnectionEvent, Host};
use crate::shutdown::Shutdown;

/// Desired connection-count band.
#[derive(Debug, Clone, Copy)]
pub struct ConnBand {
    pub low: usize,
    pub medium: usize,
    pub high: usize,
}

/// Started fire-and-forget against every freshly connected peer.
#[async_trait]
pub trait OrgSigExchange: Send + Sync {
    async fn exchange(&self, peer: PeerId);
}

/// Notified whenever the connected-peer set changes so the current list
/// can be republished to the TL.
#[async_trait]
pub trait PeersListener: Send + Sync {
    async fn peers_changed(&self);
}

pub struct ConnectionManager {
    host: Arc<dyn Host>,
    band: ConnBand,
    reliability: Arc<ReliabilityBook>,
    org_exchange: Arc<dyn OrgSigExchange>,
    peers_listener: Arc<dyn PeersListener>,
    connecter: ConnecterHandle,
    /// Reliability tag per peer, `reliability * 1e10` as an integer.
    tags: Arc<Mutex<HashMap<PeerId, i64>>>,
}

impl ConnectionManager {
    pub fn new(
        host: Arc<dyn Host>,
        band: ConnBand,
        reliability: Arc<ReliabilityBook>,
        org_exchange: Arc<dyn OrgSigExchange>,
        peers_listener: Arc<dyn PeersListener>,
        connecter: ConnecterHandle,
    ) -> Arc<Self> {
        Arc::new(ConnectionManager {
            host,
            band,
            reliability,
            org_exchange,
            peers_listener,
            connecter,
            tags: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Callback for the reliability book keeping peer tags current.
    pub fn reliability_callback(&self) -> ReliabilityCallback {
        let tags = self.tags.clone();
        Box::new(move |peer, reliability| {
            let tag = (reliability * 1e10) as i64;
            tags.lock().unwrap().insert(peer, tag);
        })
    }

    pub fn tag_of(&self, peer: &PeerId) -> i64 {
        self.tags.lock().unwrap().get(peer).copied().unwrap_or(0)
    }

    /// Consume connection events until shutdown. The receiver should be
    /// subscribed before the first connection is attempted so no event
    /// is missed.
    pub async fn run(
        self: Arc<Self>,
        mut events: broadcast::Receiver<ConnectionEvent>,
        mut shutdown: Shutdown,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Ok(ConnectionEvent::Connected(peer)) => {
                        // Handled off the event loop so a slow exchange
                        // never delays the next event.
                        let manager = self.clone();
                        tokio::spawn(async move { manager.on_connected(peer).await });
                    }
                    Ok(ConnectionEvent::Disconnected(peer)) => {
                        let manager = self.clone();
                        tokio::spawn(async move { manager.on_disconnected(peer).await });
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "connection events lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        debug!("connection manager stopped");
    }

    async fn on_connected(&self, peer: PeerId) {
        debug!(peer = %peer, "peer connected");

        let reliability = self.reliability.get(&peer).await;
        self.tags
            .lock()
            .unwrap()
            .insert(peer, (reliability * 1e10) as i64);

        let exchange = self.org_exchange.clone();
        tokio::spawn(async move { exchange.exchange(peer).await });

        self.peers_listener.peers_changed().await;
        self.enforce_high_water().await;
    }

    async fn on_disconnected(&self, peer: PeerId) {
        debug!(peer = %peer, "peer disconnected");
        self.tags.lock().unwrap().remove(&peer);
        self.peers_listener.peers_changed().await;
        self.connecter.notify();
    }

    /// Trim the least reliable connections while above the high water
    /// mark.
    async fn enforce_high_water(&self) {
        let connected = self.host.connected_peers().await;
        if connected.len() <= self.band.high {
            return;
        }

        let mut tagged: Vec<(PeerId, i64)> = Vec::with_capacity(connected.len());
        for peer in &connected {
            let reliability = self.reliability.get(peer).await;
            tagged.push((*peer, (reliability * 1e10) as i64));
        }
        tagged.sort_by_key(|(_, tag)| *tag);

        let excess = connected.len() - self.band.high;
        for (peer, _) in tagged.into_iter().take(excess) {
            debug!(peer = %peer, "trimming connection above high water");
            if let Err(e) = self.host.disconnect(peer).await {
                warn!(peer = %peer, error = %e, "trim disconnect failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connecter::ConnecterHandle;
    use crate::memory::MemoryHub;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use vigilmesh_protocol::PEER_ID_SIZE;

    fn peer(seed: u8) -> PeerId {
        PeerId::from_bytes([seed; PEER_ID_SIZE])
    }

    struct NoopExchange;

    #[async_trait]
    impl OrgSigExchange for NoopExchange {
        async fn exchange(&self, _peer: PeerId) {}
    }

    struct CountingListener(AtomicUsize);

    #[async_trait]
    impl PeersListener for CountingListener {
        async fn peers_changed(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_reliability_callback_updates_tags() {
        let hub = MemoryHub::new();
        let host = hub.create_host(peer(1)).await;
        let reliability = Arc::new(ReliabilityBook::new());

        let manager = ConnectionManager::new(
            host,
            ConnBand {
                low: 1,
                medium: 2,
                high: 3,
            },
            reliability.clone(),
            Arc::new(NoopExchange),
            Arc::new(CountingListener(AtomicUsize::new(0))),
            ConnecterHandle::detached(),
        );

        reliability.subscribe(manager.reliability_callback()).await;
        reliability.update(peer(2), 0.5).await;
        assert_eq!(manager.tag_of(&peer(2)), 5_000_000_000);
        assert_eq!(manager.tag_of(&peer(9)), 0);
    }

    #[tokio::test]
    async fn test_events_drive_listener_and_trim() {
        let hub = MemoryHub::new();
        let host = hub.create_host(peer(1)).await;
        for seed in 2..=5 {
            hub.create_host(peer(seed)).await;
        }
        let reliability = Arc::new(ReliabilityBook::new());
        // Peer 2 is the most reliable; it must survive the trim.
        reliability.update(peer(2), 0.9).await;

        let listener = Arc::new(CountingListener(AtomicUsize::new(0)));
        let manager = ConnectionManager::new(
            host.clone(),
            ConnBand {
                low: 1,
                medium: 2,
                high: 2,
            },
            reliability,
            Arc::new(NoopExchange),
            listener.clone(),
            ConnecterHandle::detached(),
        );

        let events = host.subscribe_events();
        let (trigger, shutdown) = crate::shutdown::shutdown_pair();
        let run = tokio::spawn(manager.clone().run(events, shutdown));

        for seed in 2..=5 {
            host.connect(peer(seed)).await.unwrap();
        }

        // Let the event handlers settle.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        assert!(host.connection_count().await <= 2);
        assert!(host.is_connected(&peer(2)).await);
        assert!(listener.0.load(Ordering::SeqCst) >= 4);

        trigger.trigger();
        run.await.unwrap();
    }
}
