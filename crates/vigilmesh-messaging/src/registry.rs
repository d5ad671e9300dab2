//! Inbound stream dispatch
//!
//! The accept loop takes streams from the host and hands each to the
//! protocol registered for its protocol id, one task per stream.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use vigilmesh_net::{Host, IncomingStream, P2pStream, Shutdown};
use vigilmesh_protocol::PeerId;

/// Handler for one or more overlay protocols.
#[async_trait]
pub trait StreamHandler: Send + Sync {
    async fn handle_stream(&self, protocol: &str, remote: PeerId, stream: P2pStream);
}

pub struct ProtocolRegistry {
    handlers: HashMap<String, Arc<dyn StreamHandler>>,
}

impl ProtocolRegistry {
    pub fn new() -> Self {
        ProtocolRegistry {
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, protocol: &str, handler: Arc<dyn StreamHandler>) {
        self.handlers.insert(protocol.to_string(), handler);
    }

    /// Accept inbound streams until shutdown or the host closes.
    pub async fn run(self, host: Arc<dyn Host>, mut shutdown: Shutdown) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                incoming = host.next_incoming() => match incoming {
                    Some(IncomingStream { protocol, remote, stream }) => {
                        match self.handlers.get(&protocol) {
                            Some(handler) => {
                                let handler = handler.clone();
                                tokio::spawn(async move {
                                    handler.handle_stream(&protocol, remote, stream).await;
                                });
                            }
                            None => warn!(protocol = %protocol, "no handler for protocol"),
                        }
                    }
                    None => break,
                },
            }
        }
        debug!("stream dispatcher stopped");
    }
}

impl Default for ProtocolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
