//! Content-routing seam
//!
//! The DHT is an external collaborator used as a black box: announce
//! that we provide a key, look up who provides a key, resolve a peer.
//! `MemoryDhtHub` is the in-process implementation backing tests and
//! the bundled node.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::warn;

use vigilmesh_books::MemberLookup;
use vigilmesh_protocol::{ContentId, PeerId};

use crate::error::{NetError, Result};

#[async_trait]
pub trait ContentRouting: Send + Sync {
    /// Announce that the local peer can serve `key`.
    async fn start_providing(&self, key: ContentId) -> Result<()>;

    /// Peers currently providing `key`.
    async fn providers_of(&self, key: ContentId) -> Result<Vec<PeerId>>;

    /// Whether `peer` is resolvable on the routing layer.
    async fn find_peer(&self, peer: PeerId) -> Result<bool>;
}

struct DhtState {
    providers: HashMap<ContentId, BTreeSet<PeerId>>,
    peers: HashSet<PeerId>,
}

/// Shared provider-record table for an in-process overlay.
pub struct MemoryDhtHub {
    state: RwLock<DhtState>,
}

impl MemoryDhtHub {
    pub fn new() -> Arc<Self> {
        Arc::new(MemoryDhtHub {
            state: RwLock::new(DhtState {
                providers: HashMap::new(),
                peers: HashSet::new(),
            }),
        })
    }

    /// Per-node handle; registers the peer on the routing layer.
    pub async fn handle_for(self: &Arc<Self>, local: PeerId) -> Arc<DhtHandle> {
        self.state.write().await.peers.insert(local);
        Arc::new(DhtHandle {
            hub: self.clone(),
            local,
        })
    }
}

/// One node's view of the shared DHT.
pub struct DhtHandle {
    hub: Arc<MemoryDhtHub>,
    local: PeerId,
}

#[async_trait]
impl ContentRouting for DhtHandle {
    async fn start_providing(&self, key: ContentId) -> Result<()> {
        self.hub
            .state
            .write()
            .await
            .providers
            .entry(key)
            .or_default()
            .insert(self.local);
        Ok(())
    }

    async fn providers_of(&self, key: ContentId) -> Result<Vec<PeerId>> {
        Ok(self
            .hub
            .state
            .read()
            .await
            .providers
            .get(&key)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default())
    }

    async fn find_peer(&self, peer: PeerId) -> Result<bool> {
        if self.hub.state.read().await.peers.contains(&peer) {
            Ok(true)
        } else {
            Err(NetError::UnknownPeer(peer))
        }
    }
}

#[async_trait]
impl MemberLookup for DhtHandle {
    async fn providers_of(&self, key: ContentId) -> Vec<PeerId> {
        match ContentRouting::providers_of(self, key).await {
            Ok(peers) => peers,
            Err(e) => {
                warn!(error = %e, "provider lookup failed");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigilmesh_protocol::PEER_ID_SIZE;

    fn peer(seed: u8) -> PeerId {
        PeerId::from_bytes([seed; PEER_ID_SIZE])
    }

    #[tokio::test]
    async fn test_provide_and_lookup() {
        let hub = MemoryDhtHub::new();
        let a = hub.handle_for(peer(1)).await;
        let b = hub.handle_for(peer(2)).await;

        let key = ContentId::for_bytes(b"content");
        a.start_providing(key).await.unwrap();
        b.start_providing(key).await.unwrap();

        let providers = ContentRouting::providers_of(a.as_ref(), key).await.unwrap();
        assert_eq!(providers, vec![peer(1), peer(2)]);

        let none = ContentRouting::providers_of(a.as_ref(), ContentId::for_bytes(b"other"))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_find_peer() {
        let hub = MemoryDhtHub::new();
        let a = hub.handle_for(peer(1)).await;
        let _b = hub.handle_for(peer(2)).await;

        assert!(a.find_peer(peer(2)).await.unwrap());
        assert!(a.find_peer(peer(9)).await.is_err());
    }
}
