//! Shared context for protocol handlers
//!
//! Each protocol owns a handle to this narrow bundle instead of
//! reaching into a global hub: the crypto kit, the transport host, the
//! TL bus and the state books it actually needs.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error};

use vigilmesh_books::{OrgBook, ReliabilityBook, SeenCache};
use vigilmesh_crypto::CryptoKit;
use vigilmesh_net::{write_message, Host, PeerSelector, PeersListener};
use vigilmesh_protocol::{MessageMeta, PeerId, WireMessage};

use crate::bus::TlBus;
use crate::error::Result;

/// How a peer is presented to the TL: its printable id plus the
/// organisations it has proven membership of.
#[derive(Debug, Clone, Serialize)]
pub struct PeerDescriptor {
    pub id: String,
    pub organisations: Vec<String>,
}

pub struct ProtoCore {
    pub crypto: Arc<CryptoKit>,
    pub host: Arc<dyn Host>,
    pub bus: Arc<dyn TlBus>,
    pub seen: Arc<SeenCache>,
    pub orgs: Arc<OrgBook>,
    pub reliability: Arc<ReliabilityBook>,
    pub selector: Arc<PeerSelector>,
}

impl ProtoCore {
    pub fn local_peer(&self) -> PeerId {
        self.crypto.local_peer()
    }

    pub fn new_meta(&self) -> MessageMeta {
        self.crypto.new_meta()
    }

    pub async fn peer_descriptor(&self, peer: &PeerId) -> PeerDescriptor {
        let organisations = self
            .orgs
            .verified_orgs_of(peer)
            .await
            .into_iter()
            .map(|org| org.to_hex())
            .collect();
        PeerDescriptor {
            id: peer.to_hex(),
            organisations,
        }
    }

    /// Open a stream to `peer`, write one encoded message and
    /// half-close.
    pub async fn send_message<M: WireMessage>(
        &self,
        peer: PeerId,
        protocol: &str,
        msg: &M,
    ) -> Result<()> {
        self.send_bytes(peer, protocol, &msg.encode()).await
    }

    pub async fn send_bytes(&self, peer: PeerId, protocol: &str, bytes: &[u8]) -> Result<()> {
        let mut stream = self.host.open_stream(peer, protocol).await?;
        write_message(&mut stream, bytes).await?;
        Ok(())
    }

    pub async fn publish_tl<T: Serialize>(&self, msg_type: &str, data: &T) -> Result<()> {
        let value = serde_json::to_value(data)?;
        self.bus.publish(msg_type, value).await
    }

    /// Report a misbehaving peer to the TL. Failures are logged, never
    /// propagated: reporting is best-effort.
    pub async fn report_peer(&self, peer: &PeerId, reason: &str) {
        debug!(peer = %peer, reason, "reporting peer to TL");

        #[derive(Serialize)]
        struct PeerReport {
            peer: PeerDescriptor,
            reason: String,
        }

        let report = PeerReport {
            peer: self.peer_descriptor(peer).await,
            reason: reason.to_string(),
        };
        if let Err(e) = self.publish_tl("nl2tl_peer_report", &report).await {
            error!(error = %e, "failed to publish peer report");
        }
    }
}

/// Publishes the connected-peer list to the TL whenever the connection
/// manager observes a change.
pub struct PeersListPublisher {
    core: Arc<ProtoCore>,
}

impl PeersListPublisher {
    pub fn new(core: Arc<ProtoCore>) -> Arc<Self> {
        Arc::new(PeersListPublisher { core })
    }
}

#[async_trait]
impl PeersListener for PeersListPublisher {
    async fn peers_changed(&self) {
        #[derive(Serialize)]
        struct PeersList {
            peers: Vec<PeerDescriptor>,
        }

        let mut peers = Vec::new();
        for peer in self.core.host.connected_peers().await {
            peers.push(self.core.peer_descriptor(&peer).await);
        }

        if let Err(e) = self.core.publish_tl("nl2tl_peers_list", &PeersList { peers }).await {
            error!(error = %e, "failed to publish peers list");
        }
    }
}

/// Parse an opaque payload field back into TL JSON.
pub(crate) fn payload_to_value(payload: &[u8]) -> Result<Value> {
    Ok(serde_json::from_slice(payload)?)
}

/// Serialize a TL JSON payload for the wire.
pub(crate) fn value_to_payload(value: &Value) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}
