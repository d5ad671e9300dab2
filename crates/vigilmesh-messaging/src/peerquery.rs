//! Peer-query protocol
//!
//! A bodyless request; the responder answers with a signed,
//! reliability-weighted sample of its connected peers. The connecter
//! uses this to learn fresh peer ids when connections run low.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, warn};

use vigilmesh_net::{read_message, write_message, NetError, P2pStream, PeerQueryClient};
use vigilmesh_protocol::{protocols, PeerId, PeerQueryResponse, WireMessage};

use crate::core::ProtoCore;
use crate::error::{MessagingError, Result};
use crate::registry::StreamHandler;

/// Maximum peers returned per query.
pub const RESPONSE_PEERS: usize = 5;

pub struct PeerQueryProtocol {
    core: Arc<ProtoCore>,
}

impl PeerQueryProtocol {
    pub fn new(core: Arc<ProtoCore>) -> Arc<Self> {
        Arc::new(PeerQueryProtocol { core })
    }

    /// Query `peer` for a sample of its connected peers.
    pub async fn send_query(&self, peer: PeerId) -> Result<Vec<PeerId>> {
        debug!(peer = %peer, "sending peer query");
        let mut stream = self
            .core
            .host
            .open_stream(peer, protocols::PEER_QUERY)
            .await?;

        let bytes = read_message(&mut stream).await?;
        let response = PeerQueryResponse::decode(&bytes)?;
        self.core.crypto.authenticate(&response)?;

        let mut peers = Vec::with_capacity(response.peer_ids.len());
        for raw in &response.peer_ids {
            let id = PeerId::from_hex(raw)
                .map_err(|_| MessagingError::Other(format!("invalid peer id '{raw}'")))?;
            peers.push(id);
        }
        debug!(peer = %peer, learned = peers.len(), "peer query answered");
        Ok(peers)
    }

    async fn on_query(&self, remote: PeerId, mut stream: P2pStream) -> Result<()> {
        debug!(remote = %remote, "received peer query");

        let connected = self.core.host.connected_peers().await;
        let sample = self
            .core
            .selector
            .sample_weighted_any(&connected, RESPONSE_PEERS)
            .await;

        let mut response = PeerQueryResponse {
            meta: self.core.new_meta(),
            peer_ids: sample.iter().map(|p| p.to_hex()).collect(),
        };
        self.core.crypto.sign_message(&mut response);

        write_message(&mut stream, &response.encode()).await?;
        Ok(())
    }
}

#[async_trait]
impl StreamHandler for PeerQueryProtocol {
    async fn handle_stream(&self, _protocol: &str, remote: PeerId, stream: P2pStream) {
        if let Err(e) = self.on_query(remote, stream).await {
            warn!(remote = %remote, error = %e, "peer query handler failed");
        }
    }
}

#[async_trait]
impl PeerQueryClient for PeerQueryProtocol {
    async fn query(&self, peer: PeerId) -> vigilmesh_net::Result<Vec<PeerId>> {
        self.send_query(peer).await.map_err(|e| match e {
            MessagingError::Net(net) => net,
            other => {
                error!(error = %other, "peer query failed");
                NetError::Other(other.to_string())
            }
        })
    }
}
