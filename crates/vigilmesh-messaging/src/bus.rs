//! TL bridge
//!
//! The trust layer talks to the node over a pub/sub bus carrying JSON
//! envelopes `{"type", "version": 1, "data"}`. The node subscribes to
//! `tl2nl_*` types and publishes `nl2tl_*` types; its own publications
//! are filtered out by the type prefix. `MemoryTlBus` is the
//! in-process implementation; a networked bus client only has to
//! implement [`TlBus`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use vigilmesh_net::Shutdown;

use crate::error::{MessagingError, Result};

pub const ENVELOPE_VERSION: u32 = 1;

/// Prefix of node-to-TL traffic, ignored by the node's own subscriber.
pub const NL2TL_PREFIX: &str = "nl2tl";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlEnvelope {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub version: u32,
    pub data: Value,
}

impl TlEnvelope {
    pub fn new(msg_type: &str, data: Value) -> Self {
        TlEnvelope {
            msg_type: msg_type.to_string(),
            version: ENVELOPE_VERSION,
            data,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[async_trait]
pub trait TlBus: Send + Sync {
    async fn publish(&self, msg_type: &str, data: Value) -> Result<()>;

    fn subscribe(&self) -> broadcast::Receiver<TlEnvelope>;
}

/// In-process bus over a broadcast channel. Both the node and the TL
/// side (tests, embedded deployments) subscribe to the same channel.
pub struct MemoryTlBus {
    tx: broadcast::Sender<TlEnvelope>,
}

impl MemoryTlBus {
    pub fn new() -> Arc<Self> {
        let (tx, _) = broadcast::channel(256);
        Arc::new(MemoryTlBus { tx })
    }
}

#[async_trait]
impl TlBus for MemoryTlBus {
    async fn publish(&self, msg_type: &str, data: Value) -> Result<()> {
        let envelope = TlEnvelope::new(msg_type, data);
        // No subscribers is not an error; the message is just dropped.
        let _ = self.tx.send(envelope);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<TlEnvelope> {
        self.tx.subscribe()
    }
}

/// Handler for one or more `tl2nl_*` message types.
#[async_trait]
pub trait TlHandler: Send + Sync {
    async fn on_tl(&self, msg_type: String, data: Value);
}

/// Routes inbound TL envelopes to the protocol that registered for
/// their type. Each handled message runs in its own task so a slow
/// handler never blocks the bus.
pub struct TlDispatcher {
    handlers: HashMap<String, Arc<dyn TlHandler>>,
}

impl TlDispatcher {
    pub fn new() -> Self {
        TlDispatcher {
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, msg_type: &str, handler: Arc<dyn TlHandler>) {
        self.handlers.insert(msg_type.to_string(), handler);
    }

    pub async fn run(self, bus: Arc<dyn TlBus>, mut shutdown: Shutdown) {
        let mut rx = bus.subscribe();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                envelope = rx.recv() => match envelope {
                    Ok(envelope) => self.dispatch(envelope),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "TL bus subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        debug!("TL dispatcher stopped");
    }

    fn dispatch(&self, envelope: TlEnvelope) {
        if envelope.msg_type.starts_with(NL2TL_PREFIX) {
            return;
        }
        if envelope.version != ENVELOPE_VERSION {
            warn!(
                version = envelope.version,
                msg_type = %envelope.msg_type,
                "unexpected TL envelope version"
            );
        }

        match self.handlers.get(&envelope.msg_type) {
            Some(handler) => {
                let handler = handler.clone();
                tokio::spawn(async move {
                    handler.on_tl(envelope.msg_type, envelope.data).await;
                });
            }
            None => warn!(msg_type = %envelope.msg_type, "unknown TL message type"),
        }
    }
}

impl Default for TlDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Strip a deserialization failure down to a loggable error.
pub(crate) fn parse_tl<T: serde::de::DeserializeOwned>(data: Value) -> Result<T> {
    serde_json::from_value(data).map_err(MessagingError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use vigilmesh_net::shutdown_pair;

    struct Counter(AtomicUsize);

    #[async_trait]
    impl TlHandler for Counter {
        async fn on_tl(&self, _msg_type: String, _data: Value) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_envelope_json_shape() {
        let envelope = TlEnvelope::new("tl2nl_alert", serde_json::json!({"payload": 1}));
        let json = envelope.to_json().unwrap();
        assert!(json.contains("\"type\":\"tl2nl_alert\""));
        assert!(json.contains("\"version\":1"));

        let back = TlEnvelope::from_json(&json).unwrap();
        assert_eq!(back.msg_type, "tl2nl_alert");
        assert_eq!(back.data, serde_json::json!({"payload": 1}));
    }

    #[tokio::test]
    async fn test_dispatcher_routes_and_filters() {
        let bus = MemoryTlBus::new();
        let counter = Arc::new(Counter(AtomicUsize::new(0)));

        let mut dispatcher = TlDispatcher::new();
        dispatcher.register("tl2nl_alert", counter.clone());

        let (trigger, shutdown) = shutdown_pair();
        let run = tokio::spawn(dispatcher.run(bus.clone(), shutdown));

        bus.publish("tl2nl_alert", serde_json::json!({})).await.unwrap();
        // Own echo and unknown types are dropped.
        bus.publish("nl2tl_alert", serde_json::json!({})).await.unwrap();
        bus.publish("tl2nl_unknown", serde_json::json!({})).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);

        trigger.trigger();
        run.await.unwrap();
    }
}
