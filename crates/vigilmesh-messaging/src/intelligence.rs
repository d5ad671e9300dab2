//! Intelligence protocol: TTL-limited multi-hop request/response
//!
//! The signed request travels inside a hop-mutable envelope carrying a
//! TTL and the timeout budget of the upstream waiter. Every node on
//! the path answers through its own TL, forwards while TTL remains,
//! aggregates whatever comes back and ships one combined response
//! upstream. Answers are sealed to the original requester, so only the
//! initiator ever reads them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};

use vigilmesh_crypto::sealed;
use vigilmesh_net::{read_message, P2pStream, Shutdown};
use vigilmesh_protocol::{
    protocols, IntelligenceEnvelope, IntelligenceRequest, IntelligenceResponse, PeerId,
    SingleEntityResponse, WireMessage,
};

use crate::aggregator::{Completed, ResponseAggregator, WaitMeta};
use crate::bus::{parse_tl, TlHandler};
use crate::core::{payload_to_value, value_to_payload, PeerDescriptor, ProtoCore};
use crate::error::Result;
use crate::registry::StreamHandler;

/// Wait budget applied when an envelope's timeout cannot be parsed.
const FALLBACK_PARENT_TIMEOUT: Duration = Duration::from_secs(3);

/// Floor for the decremented per-hop timeout.
const MIN_PARENT_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct IntelligenceSettings {
    /// TTL stamped on requests we initiate.
    pub ttl: u32,
    /// Cap applied when decrementing a forwarded TTL.
    pub max_ttl: u32,
    /// How long the initiator waits for the full fan-out.
    pub root_timeout: Duration,
    /// Upper bound accepted for a remote-supplied wait budget.
    pub max_parent_timeout: Duration,
}

#[derive(Deserialize)]
struct TlRequest {
    payload: Value,
}

#[derive(Serialize)]
struct RequestNotification {
    request_id: String,
    sender: PeerDescriptor,
    payload: Value,
}

#[derive(Deserialize)]
struct TlResponse {
    request_id: String,
    payload: Value,
}

#[derive(Serialize)]
struct IntelligenceAnswer {
    sender: PeerDescriptor,
    payload: Value,
}

pub struct IntelligenceProtocol {
    core: Arc<ProtoCore>,
    aggregator: Arc<ResponseAggregator<IntelligenceResponse>>,
    settings: IntelligenceSettings,
    /// Public key of the original requester per open request, the
    /// encryption target for our TL's answer.
    requesters: RwLock<HashMap<String, Vec<u8>>>,
}

impl IntelligenceProtocol {
    pub fn new(
        core: Arc<ProtoCore>,
        settings: IntelligenceSettings,
        shutdown: Shutdown,
    ) -> Arc<Self> {
        let (aggregator, completed_rx) = ResponseAggregator::new(shutdown.clone());
        let proto = Arc::new(IntelligenceProtocol {
            core,
            aggregator,
            settings,
            requesters: RwLock::new(HashMap::new()),
        });
        proto.clone().spawn_completion_loop(completed_rx, shutdown);
        proto
    }

    fn spawn_completion_loop(
        self: Arc<Self>,
        mut completed_rx: mpsc::UnboundedReceiver<Completed<IntelligenceResponse>>,
        mut shutdown: Shutdown,
    ) {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    completed = completed_rx.recv() => match completed {
                        Some(completed) => self.on_aggregated(completed).await,
                        None => break,
                    },
                }
            }
        });
    }

    /// Initiator path: fan the enveloped request out to every
    /// connected peer and wait for one response per peer.
    async fn initiate(&self, request: TlRequest) -> Result<()> {
        let mut inner = IntelligenceRequest {
            meta: self.core.new_meta(),
            payload: value_to_payload(&request.payload)?,
        };
        self.core.crypto.sign_message(&mut inner);

        self.core
            .seen
            .mark_seen(&inner.meta.id, self.core.local_peer())
            .await;

        let peers = self.core.host.connected_peers().await;
        self.aggregator.start_waiting(
            &inner.meta.id,
            WaitMeta::local(),
            peers.len(),
            self.settings.root_timeout,
        )?;

        let envelope = IntelligenceEnvelope {
            ttl: self.settings.ttl,
            parent_timeout: humantime::format_duration(self.settings.root_timeout).to_string(),
            request: inner,
        };
        let bytes = envelope.encode();

        for peer in peers {
            debug!(peer = %peer, "sending intelligence request");
            if let Err(e) = self
                .core
                .send_bytes(peer, protocols::INTELLIGENCE_REQUEST, &bytes)
                .await
            {
                error!(peer = %peer, error = %e, "failed to send intelligence request");
            }
        }
        Ok(())
    }

    /// Forwarder path.
    async fn on_request(&self, remote: PeerId, mut stream: P2pStream) -> Result<()> {
        let bytes = read_message(&mut stream).await?;
        let envelope = IntelligenceEnvelope::decode(&bytes)?;
        let request = &envelope.request;
        self.core.crypto.authenticate(request)?;

        if !self.core.seen.mark_seen(&request.meta.id, remote).await {
            debug!(request = %request.meta.id, "duplicate intelligence request, declining");
            self.send_unprocessed_reply(&request.meta.id, remote).await;
            return Ok(());
        }

        self.requesters.write().await.insert(
            request.meta.id.clone(),
            request.meta.original_sender.public_key.clone(),
        );

        // The local TL will answer; that is the one guaranteed slot.
        let mut expected = 1usize;
        let wait_timeout;
        let mut pass_on: Option<(IntelligenceEnvelope, Vec<PeerId>)> = None;

        if envelope.ttl > 0 {
            let forwarded = self.decrement_envelope(&envelope);
            wait_timeout = self.parse_parent_timeout(&forwarded.parent_timeout);

            let targets: Vec<PeerId> = self
                .core
                .host
                .connected_peers()
                .await
                .into_iter()
                .filter(|p| *p != remote)
                .collect();
            expected += targets.len();
            pass_on = Some((forwarded, targets));
        } else {
            wait_timeout = self.parse_parent_timeout(&envelope.parent_timeout);
        }

        // Register the waiter before forwarding and before the TL sees
        // the request, so neither an instant duplicate notice from a
        // neighbour nor an instant TL answer can race past the
        // aggregator. A failed send leaves a slot that only the
        // timeout can fill, which the partial-result path already
        // handles.
        self.aggregator.start_waiting(
            &request.meta.id,
            WaitMeta::upstream(remote),
            expected,
            wait_timeout,
        )?;

        if let Some((forwarded, targets)) = pass_on {
            self.forward(&forwarded, &targets).await;
        }

        let notification = RequestNotification {
            request_id: request.meta.id.clone(),
            sender: self
                .core
                .peer_descriptor(&request.meta.original_sender.peer_id)
                .await,
            payload: payload_to_value(&request.payload)?,
        };
        self.core
            .publish_tl("nl2tl_intelligence_request", &notification)
            .await
    }

    /// Tell the upstream waiter we will not answer a duplicate, so its
    /// aggregation is not left hanging on our slot.
    async fn send_unprocessed_reply(&self, request_id: &str, upstream: PeerId) {
        let mut reply = IntelligenceResponse {
            meta: self.core.new_meta(),
            request_id: request_id.to_string(),
            processed: false,
            responses: Vec::new(),
        };
        self.core.crypto.sign_message(&mut reply);

        if let Err(e) = self
            .core
            .send_message(upstream, protocols::INTELLIGENCE_RESPONSE, &reply)
            .await
        {
            error!(peer = %upstream, error = %e, "failed to send duplicate notice");
        }
    }

    /// Decrement TTL and timeout for the next hop. The TTL cap guards
    /// against inflated inbound values; the timeout shrinks by a
    /// second per hop down to a one-second floor.
    fn decrement_envelope(&self, envelope: &IntelligenceEnvelope) -> IntelligenceEnvelope {
        let parent = self.parse_parent_timeout(&envelope.parent_timeout);
        let next_timeout = parent
            .saturating_sub(Duration::from_secs(1))
            .max(MIN_PARENT_TIMEOUT);

        IntelligenceEnvelope {
            ttl: (envelope.ttl - 1).min(self.settings.max_ttl),
            parent_timeout: humantime::format_duration(next_timeout).to_string(),
            request: envelope.request.clone(),
        }
    }

    fn parse_parent_timeout(&self, raw: &str) -> Duration {
        match humantime::parse_duration(raw) {
            Ok(parsed) => parsed.min(self.settings.max_parent_timeout),
            Err(e) => {
                error!(raw = %raw, error = %e, "unparseable parent timeout, using fallback");
                FALLBACK_PARENT_TIMEOUT
            }
        }
    }

    /// Send the decremented envelope to the chosen downstream peers.
    async fn forward(&self, envelope: &IntelligenceEnvelope, targets: &[PeerId]) {
        let bytes = envelope.encode();
        for peer in targets {
            debug!(peer = %peer, "forwarding intelligence request");
            if let Err(e) = self
                .core
                .send_bytes(*peer, protocols::INTELLIGENCE_REQUEST, &bytes)
                .await
            {
                error!(peer = %peer, error = %e, "failed to forward intelligence request");
            }
        }
    }

    /// TL answered one of the requests we relayed: sign the answer,
    /// seal it to the original requester and hand it to our waiter.
    async fn on_tl_response(&self, response: TlResponse) -> Result<()> {
        let requester_key = match self.requesters.read().await.get(&response.request_id) {
            Some(key) => key.clone(),
            None => {
                warn!(request = %response.request_id, "TL answer for unknown request");
                return Ok(());
            }
        };

        let mut entity = SingleEntityResponse {
            meta: self.core.new_meta(),
            payload: value_to_payload(&response.payload)?,
        };
        self.core.crypto.sign_message(&mut entity);

        let sealed_blob = sealed::encrypt_for(&requester_key, &entity.encode())?;

        let mut wire = IntelligenceResponse {
            meta: self.core.new_meta(),
            request_id: response.request_id.clone(),
            processed: true,
            responses: vec![sealed_blob],
        };
        self.core.crypto.sign_message(&mut wire);

        if let Err(e) = self.aggregator.add_response(&response.request_id, wire) {
            warn!(request = %response.request_id, error = %e, "dropping TL intelligence answer");
        }
        Ok(())
    }

    async fn on_response(&self, remote: PeerId, mut stream: P2pStream) -> Result<()> {
        let bytes = read_message(&mut stream).await?;
        let response = IntelligenceResponse::decode(&bytes)?;
        self.core.crypto.authenticate(&response)?;
        debug!(
            remote = %remote,
            request = %response.request_id,
            processed = response.processed,
            "received intelligence response"
        );

        let request_id = response.request_id.clone();
        if let Err(e) = self.aggregator.add_response(&request_id, response) {
            warn!(request = %request_id, error = %e, "dropping intelligence response");
        }
        Ok(())
    }

    async fn on_aggregated(&self, completed: Completed<IntelligenceResponse>) {
        self.requesters.write().await.remove(&completed.id);

        let blobs: Vec<Vec<u8>> = completed
            .responses
            .iter()
            .filter(|r| r.processed)
            .flat_map(|r| r.responses.iter().cloned())
            .collect();

        match completed.meta.responses_receiver {
            None => self.deliver_to_tl(blobs).await,
            Some(upstream) => self.deliver_upstream(&completed.id, blobs, upstream).await,
        }
    }

    /// Initiator end of the line: open every sealed answer, verify the
    /// inner signature and publish the batch to the TL. An empty batch
    /// is still published so the TL can tell "no answers" from
    /// silence.
    async fn deliver_to_tl(&self, blobs: Vec<Vec<u8>>) {
        let mut answers = Vec::with_capacity(blobs.len());
        for blob in &blobs {
            let opened = match sealed::decrypt_with(self.core.crypto.identity(), blob) {
                Ok(opened) => opened,
                Err(e) => {
                    error!(error = %e, "failed to open sealed intelligence answer");
                    continue;
                }
            };
            let entity = match SingleEntityResponse::decode(&opened) {
                Ok(entity) => entity,
                Err(e) => {
                    error!(error = %e, "bad sealed intelligence answer");
                    continue;
                }
            };
            if let Err(e) = self.core.crypto.authenticate(&entity) {
                error!(error = %e, "unauthentic intelligence answer");
                continue;
            }
            let payload = match payload_to_value(&entity.payload) {
                Ok(payload) => payload,
                Err(e) => {
                    error!(error = %e, "bad payload in intelligence answer");
                    continue;
                }
            };
            answers.push(IntelligenceAnswer {
                sender: self
                    .core
                    .peer_descriptor(&entity.meta.original_sender.peer_id)
                    .await,
                payload,
            });
        }

        info!(answers = answers.len(), "publishing aggregated intelligence");
        if let Err(e) = self
            .core
            .publish_tl("nl2tl_intelligence_response", &answers)
            .await
        {
            error!(error = %e, "failed to publish intelligence answers");
        }
    }

    /// Intermediate node: re-wrap all collected blobs into one signed
    /// response for the upstream waiter.
    async fn deliver_upstream(&self, request_id: &str, blobs: Vec<Vec<u8>>, upstream: PeerId) {
        let mut wire = IntelligenceResponse {
            meta: self.core.new_meta(),
            request_id: request_id.to_string(),
            processed: true,
            responses: blobs,
        };
        self.core.crypto.sign_message(&mut wire);

        debug!(peer = %upstream, request = %request_id, "sending aggregated response upstream");
        if let Err(e) = self
            .core
            .send_message(upstream, protocols::INTELLIGENCE_RESPONSE, &wire)
            .await
        {
            error!(peer = %upstream, error = %e, "failed to send aggregated response");
        }
    }
}

#[async_trait]
impl StreamHandler for IntelligenceProtocol {
    async fn handle_stream(&self, protocol: &str, remote: PeerId, stream: P2pStream) {
        let result = match protocol {
            protocols::INTELLIGENCE_REQUEST => self.on_request(remote, stream).await,
            _ => self.on_response(remote, stream).await,
        };
        if let Err(e) = result {
            warn!(remote = %remote, protocol, error = %e, "intelligence handler failed");
        }
    }
}

#[async_trait]
impl TlHandler for IntelligenceProtocol {
    async fn on_tl(&self, msg_type: String, data: Value) {
        let result = match msg_type.as_str() {
            "tl2nl_intelligence_request" => match parse_tl::<TlRequest>(data) {
                Ok(request) => self.initiate(request).await,
                Err(e) => {
                    error!(error = %e, "malformed TL intelligence request");
                    return;
                }
            },
            _ => match parse_tl::<TlResponse>(data) {
                Ok(response) => self.on_tl_response(response).await,
                Err(e) => {
                    error!(error = %e, "malformed TL intelligence response");
                    return;
                }
            },
        };
        if let Err(e) = result {
            error!(msg_type = %msg_type, error = %e, "intelligence TL handling failed");
        }
    }
}
