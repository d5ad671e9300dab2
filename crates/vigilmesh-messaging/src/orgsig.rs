//! Organisation-signature exchange
//!
//! When a connection is established and at least one trusted org is
//! configured, we open a stream to the new peer; it answers with its
//! collection of organisation endorsements. Each endorsement from a
//! trusted org is verified against the peer's public key before it is
//! recorded; bad ids or signatures get the peer reported to the TL.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use vigilmesh_crypto::orgsig;
use vigilmesh_net::{read_message, write_message, OrgSigExchange, P2pStream};
use vigilmesh_protocol::{protocols, OrgEndorsement, OrgId, OrgSignatures, PeerId, WireMessage};

use crate::core::ProtoCore;
use crate::error::Result;
use crate::registry::StreamHandler;

pub struct OrgSigProtocol {
    core: Arc<ProtoCore>,
}

impl OrgSigProtocol {
    pub fn new(core: Arc<ProtoCore>) -> Arc<Self> {
        Arc::new(OrgSigProtocol { core })
    }

    /// Ask `peer` for its organisation endorsements and record the
    /// ones that verify.
    pub async fn request_signatures(&self, peer: PeerId) {
        if self.core.orgs.trustworthy().is_empty() {
            // We trust nobody, so no endorsement could ever matter.
            return;
        }
        debug!(peer = %peer, "requesting org signatures");

        if let Err(e) = self.exchange_with(peer).await {
            warn!(peer = %peer, error = %e, "org signature exchange failed");
        }
    }

    async fn exchange_with(&self, peer: PeerId) -> Result<()> {
        let mut stream = self
            .core
            .host
            .open_stream(peer, protocols::ORG_SIGNATURE)
            .await?;

        let bytes = read_message(&mut stream).await?;
        let signatures = OrgSignatures::decode(&bytes)?;
        self.core.crypto.authenticate(&signatures)?;

        for endorsement in &signatures.organisations {
            self.process_endorsement(endorsement, peer).await;
        }
        Ok(())
    }

    async fn process_endorsement(&self, endorsement: &OrgEndorsement, peer: PeerId) {
        let org = match OrgId::from_hex(&endorsement.org_id) {
            Ok(org) => org,
            Err(_) => {
                error!(peer = %peer, raw = %endorsement.org_id, "endorsement carries bad org id");
                self.core.report_peer(&peer, "provided invalid org ID").await;
                return;
            }
        };
        if !self.core.orgs.is_trustworthy(&org) {
            debug!(org = %org, "skipping endorsement from untrusted org");
            return;
        }

        // The signature must cover the key embedded in the peer's id,
        // so a replayed endorsement for another peer can never verify.
        let valid = orgsig::verify_peer(&org, peer.public_key(), &endorsement.signature)
            .unwrap_or(false);
        if !valid {
            error!(peer = %peer, org = %org, "invalid org signature");
            self.core
                .report_peer(&peer, "provided invalid org signature")
                .await;
            return;
        }

        self.core.orgs.add_verified(peer, org).await;
        info!(peer = %peer, org = %org, "verified org signature");
    }

    async fn on_request(&self, remote: PeerId, mut stream: P2pStream) -> Result<()> {
        debug!(remote = %remote, "received org signature request");

        let organisations = self
            .core
            .orgs
            .my_signatures()
            .iter()
            .map(|(org, signature)| OrgEndorsement {
                org_id: org.to_hex(),
                signature: signature.clone(),
            })
            .collect();

        let mut response = OrgSignatures {
            meta: self.core.new_meta(),
            organisations,
        };
        self.core.crypto.sign_message(&mut response);

        write_message(&mut stream, &response.encode()).await?;
        debug!(remote = %remote, "sent our org signatures");
        Ok(())
    }
}

#[async_trait]
impl StreamHandler for OrgSigProtocol {
    async fn handle_stream(&self, _protocol: &str, remote: PeerId, stream: P2pStream) {
        if let Err(e) = self.on_request(remote, stream).await {
            warn!(remote = %remote, error = %e, "org signature handler failed");
        }
    }
}

#[async_trait]
impl OrgSigExchange for OrgSigProtocol {
    async fn exchange(&self, peer: PeerId) {
        self.request_signatures(peer).await;
    }
}
