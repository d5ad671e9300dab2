//! Alert protocol: best-effort flood
//!
//! A TL alert is signed once by its author and flooded to every
//! connected peer. Receivers publish it to their own TL exactly once
//! (the seen cache drops replays) and forward it to everyone except
//! the peer that delivered it.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use vigilmesh_net::{read_message, P2pStream};
use vigilmesh_protocol::{protocols, Alert, PeerId, WireMessage};

use crate::bus::{parse_tl, TlHandler};
use crate::core::{payload_to_value, value_to_payload, PeerDescriptor, ProtoCore};
use crate::error::Result;
use crate::registry::StreamHandler;

#[derive(Deserialize)]
struct AlertRequest {
    payload: Value,
}

#[derive(Serialize)]
struct AlertNotification {
    sender: PeerDescriptor,
    payload: Value,
}

pub struct AlertProtocol {
    core: Arc<ProtoCore>,
}

impl AlertProtocol {
    pub fn new(core: Arc<ProtoCore>) -> Arc<Self> {
        Arc::new(AlertProtocol { core })
    }

    /// Build, sign and flood a new alert to all connected peers.
    pub async fn initiate(&self, payload: Value) -> Result<()> {
        let mut alert = Alert {
            meta: self.core.new_meta(),
            payload: value_to_payload(&payload)?,
        };
        self.core.crypto.sign_message(&mut alert);

        // Remember our own alert in case it loops back.
        self.core
            .seen
            .mark_seen(&alert.meta.id, self.core.local_peer())
            .await;

        for peer in self.core.host.connected_peers().await {
            debug!(peer = %peer, "sending alert");
            if let Err(e) = self
                .core
                .send_message(peer, protocols::ALERT, &alert)
                .await
            {
                error!(peer = %peer, error = %e, "failed to send alert");
            }
        }
        Ok(())
    }

    async fn on_alert(&self, remote: PeerId, mut stream: P2pStream) -> Result<()> {
        let bytes = read_message(&mut stream).await?;
        let alert = Alert::decode(&bytes)?;

        if !self.core.seen.mark_seen(&alert.meta.id, remote).await {
            debug!(forwarder = %remote, "dropping already seen alert");
            return Ok(());
        }

        self.core.crypto.authenticate(&alert)?;
        info!(
            author = %alert.meta.original_sender.peer_id,
            forwarder = %remote,
            "received alert"
        );

        let notification = AlertNotification {
            sender: self
                .core
                .peer_descriptor(&alert.meta.original_sender.peer_id)
                .await,
            payload: payload_to_value(&alert.payload)?,
        };
        self.core.publish_tl("nl2tl_alert", &notification).await?;

        self.forward(&alert, remote).await;
        Ok(())
    }

    /// Forward to all connected peers except the one that delivered it.
    async fn forward(&self, alert: &Alert, forwarder: PeerId) {
        for peer in self.core.host.connected_peers().await {
            if peer == forwarder {
                continue;
            }
            debug!(peer = %peer, "forwarding alert");
            if let Err(e) = self.core.send_message(peer, protocols::ALERT, alert).await {
                error!(peer = %peer, error = %e, "failed to forward alert");
            }
        }
    }
}

#[async_trait]
impl StreamHandler for AlertProtocol {
    async fn handle_stream(&self, _protocol: &str, remote: PeerId, stream: P2pStream) {
        if let Err(e) = self.on_alert(remote, stream).await {
            warn!(remote = %remote, error = %e, "alert handler failed");
        }
    }
}

#[async_trait]
impl TlHandler for AlertProtocol {
    async fn on_tl(&self, _msg_type: String, data: Value) {
        let request: AlertRequest = match parse_tl(data) {
            Ok(request) => request,
            Err(e) => {
                error!(error = %e, "malformed TL alert request");
                return;
            }
        };
        debug!("received alert request from TL");
        if let Err(e) = self.initiate(request.payload).await {
            error!(error = %e, "failed to initiate alert");
        }
    }
}
