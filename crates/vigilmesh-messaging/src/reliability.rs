//! Reliability updates from the TL

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info};

use vigilmesh_protocol::PeerId;

use crate::bus::{parse_tl, TlHandler};
use crate::core::ProtoCore;

#[derive(Deserialize)]
struct ReliabilityUpdate {
    peer_id: String,
    reliability: f64,
}

/// Applies `tl2nl_peers_reliability` batches to the reliability book.
pub struct ReliabilityReceiver {
    core: Arc<ProtoCore>,
}

impl ReliabilityReceiver {
    pub fn new(core: Arc<ProtoCore>) -> Arc<Self> {
        Arc::new(ReliabilityReceiver { core })
    }
}

#[async_trait]
impl TlHandler for ReliabilityReceiver {
    async fn on_tl(&self, _msg_type: String, data: Value) {
        let updates: Vec<ReliabilityUpdate> = match parse_tl(data) {
            Ok(updates) => updates,
            Err(e) => {
                error!(error = %e, "malformed reliability update");
                return;
            }
        };

        let mut applied = 0usize;
        for update in updates {
            let peer = match PeerId::from_hex(&update.peer_id) {
                Ok(peer) => peer,
                Err(_) => {
                    error!(raw = %update.peer_id, "reliability update for bad peer id");
                    continue;
                }
            };
            self.core.reliability.update(peer, update.reliability).await;
            debug!(peer = %peer, reliability = update.reliability, "reliability updated");
            applied += 1;
        }
        info!(applied, "applied reliability updates");
    }
}
