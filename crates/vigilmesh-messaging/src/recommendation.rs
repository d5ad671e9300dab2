//! Recommendation protocol: directed request, fan-in response
//!
//! The TL names the receivers explicitly. Each receiver relays the
//! request to its own TL, whose answer is signed and sent straight
//! back to the initiator; the initiator aggregates all answers (or
//! whatever arrived at the timeout) into one TL notification.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use vigilmesh_net::{read_message, P2pStream, Shutdown};
use vigilmesh_protocol::{
    protocols, PeerId, RecommendationRequest, RecommendationResponse, WireMessage,
};

use crate::aggregator::{Completed, ResponseAggregator, WaitMeta};
use crate::bus::{parse_tl, TlHandler};
use crate::core::{payload_to_value, value_to_payload, PeerDescriptor, ProtoCore};
use crate::error::Result;
use crate::registry::StreamHandler;

#[derive(Deserialize)]
struct TlRequest {
    receiver_ids: Vec<String>,
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
    recipient: String,
    payload: Value,
}

#[derive(Serialize)]
struct Recommendation {
    sender: PeerDescriptor,
    payload: Value,
}

pub struct RecommendationProtocol {
    core: Arc<ProtoCore>,
    aggregator: Arc<ResponseAggregator<RecommendationResponse>>,
    timeout: Duration,
}

impl RecommendationProtocol {
    pub fn new(core: Arc<ProtoCore>, timeout: Duration, shutdown: Shutdown) -> Arc<Self> {
        let (aggregator, completed_rx) = ResponseAggregator::new(shutdown.clone());
        let proto = Arc::new(RecommendationProtocol {
            core,
            aggregator,
            timeout,
        });
        proto.clone().spawn_completion_loop(completed_rx, shutdown);
        proto
    }

    fn spawn_completion_loop(
        self: Arc<Self>,
        mut completed_rx: mpsc::UnboundedReceiver<Completed<RecommendationResponse>>,
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

    /// Initiator path: sign one request, register the waiter, send to
    /// every named receiver.
    async fn initiate(&self, request: TlRequest) -> Result<()> {
        if request.receiver_ids.is_empty() {
            warn!("no receivers specified for recommendation request");
            return Ok(());
        }

        let mut wire = RecommendationRequest {
            meta: self.core.new_meta(),
            payload: value_to_payload(&request.payload)?,
        };
        self.core.crypto.sign_message(&mut wire);

        self.aggregator.start_waiting(
            &wire.meta.id,
            WaitMeta::local(),
            request.receiver_ids.len(),
            self.timeout,
        )?;

        for raw in &request.receiver_ids {
            let peer = match PeerId::from_hex(raw) {
                Ok(peer) => peer,
                Err(_) => {
                    error!(raw = %raw, "bad receiver id in recommendation request");
                    continue;
                }
            };
            debug!(peer = %peer, "sending recommendation request");
            if let Err(e) = self
                .core
                .send_message(peer, protocols::RECOMMENDATION_REQUEST, &wire)
                .await
            {
                error!(peer = %peer, error = %e, "failed to send recommendation request");
            }
        }
        Ok(())
    }

    /// Responder path: relay the overlay request to the local TL.
    async fn on_request(&self, remote: PeerId, mut stream: P2pStream) -> Result<()> {
        let bytes = read_message(&mut stream).await?;
        let request = RecommendationRequest::decode(&bytes)?;
        self.core.crypto.authenticate(&request)?;
        debug!(remote = %remote, "received recommendation request");

        let notification = RequestNotification {
            request_id: request.meta.id.clone(),
            sender: self
                .core
                .peer_descriptor(&request.meta.original_sender.peer_id)
                .await,
            payload: payload_to_value(&request.payload)?,
        };
        self.core
            .publish_tl("nl2tl_recommendation_request", &notification)
            .await
    }

    /// TL answered: sign the response and send it to the initiator.
    async fn respond(&self, response: TlResponse) -> Result<()> {
        let mut wire = RecommendationResponse {
            meta: self.core.new_meta(),
            request_id: response.request_id,
            payload: value_to_payload(&response.payload)?,
        };
        self.core.crypto.sign_message(&mut wire);

        let recipient = PeerId::from_hex(&response.recipient).map_err(|_| {
            crate::error::MessagingError::Other(format!(
                "bad recipient id '{}'",
                response.recipient
            ))
        })?;
        debug!(peer = %recipient, "sending recommendation response");
        self.core
            .send_message(recipient, protocols::RECOMMENDATION_RESPONSE, &wire)
            .await
    }

    async fn on_response(&self, remote: PeerId, mut stream: P2pStream) -> Result<()> {
        let bytes = read_message(&mut stream).await?;
        let response = RecommendationResponse::decode(&bytes)?;
        self.core.crypto.authenticate(&response)?;
        debug!(remote = %remote, request = %response.request_id, "received recommendation response");

        let request_id = response.request_id.clone();
        if let Err(e) = self.aggregator.add_response(&request_id, response) {
            warn!(request = %request_id, error = %e, "dropping recommendation response");
        }
        Ok(())
    }

    async fn on_aggregated(&self, completed: Completed<RecommendationResponse>) {
        if completed.responses.is_empty() {
            warn!(request = %completed.id, "aggregated zero recommendations, nothing to publish");
            return;
        }

        let mut recommendations = Vec::with_capacity(completed.responses.len());
        for response in &completed.responses {
            let payload = match payload_to_value(&response.payload) {
                Ok(payload) => payload,
                Err(e) => {
                    error!(error = %e, "bad payload in recommendation response");
                    continue;
                }
            };
            recommendations.push(Recommendation {
                sender: self
                    .core
                    .peer_descriptor(&response.meta.original_sender.peer_id)
                    .await,
                payload,
            });
        }

        if let Err(e) = self
            .core
            .publish_tl("nl2tl_recommendation_response", &recommendations)
            .await
        {
            error!(error = %e, "failed to publish recommendation responses");
        }
    }
}

#[async_trait]
impl StreamHandler for RecommendationProtocol {
    async fn handle_stream(&self, protocol: &str, remote: PeerId, stream: P2pStream) {
        let result = match protocol {
            protocols::RECOMMENDATION_REQUEST => self.on_request(remote, stream).await,
            _ => self.on_response(remote, stream).await,
        };
        if let Err(e) = result {
            warn!(remote = %remote, protocol, error = %e, "recommendation handler failed");
        }
    }
}

#[async_trait]
impl TlHandler for RecommendationProtocol {
    async fn on_tl(&self, msg_type: String, data: Value) {
        let result = match msg_type.as_str() {
            "tl2nl_recommendation_request" => match parse_tl::<TlRequest>(data) {
                Ok(request) => self.initiate(request).await,
                Err(e) => {
                    error!(error = %e, "malformed TL recommendation request");
                    return;
                }
            },
            _ => match parse_tl::<TlResponse>(data) {
                Ok(response) => self.respond(response).await,
                Err(e) => {
                    error!(error = %e, "malformed TL recommendation response");
                    return;
                }
            },
        };
        if let Err(e) = result {
            error!(msg_type = %msg_type, error = %e, "recommendation TL handling failed");
        }
    }
}
