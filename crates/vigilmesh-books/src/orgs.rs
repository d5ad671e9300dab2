//! Organisation trust book
//!
//! Tracks three distinct kinds of organisation knowledge:
//!
//! * configuration: the organisations this node trusts and the
//!   endorsements this node holds over its own key;
//! * claimed membership: peers announcing themselves on the DHT under
//!   an organisation's content key, refreshed periodically and never
//!   trusted on its own;
//! * verified membership: peers whose endorsements were checked
//!   cryptographically through the org-signature protocol. Only this
//!   set grants access rights.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use vigilmesh_crypto::orgsig;
use vigilmesh_protocol::{ContentId, OrgId, PeerId};

use crate::error::{BookError, Result};

/// Narrow view of content routing used to poll claimed membership.
/// Implementations log their own failures and return an empty list when
/// the lookup cannot be served.
#[async_trait]
pub trait MemberLookup: Send + Sync {
    async fn providers_of(&self, key: ContentId) -> Vec<PeerId>;
}

pub struct OrgBook {
    trustworthy: Vec<OrgId>,
    my_signatures: Vec<(OrgId, String)>,
    my_orgs: Vec<OrgId>,
    claimed: RwLock<HashMap<OrgId, Vec<PeerId>>>,
    verified: RwLock<HashMap<PeerId, HashSet<OrgId>>>,
}

impl OrgBook {
    /// Build the book from configuration. Every configured signature is
    /// validated against this node's own public key; an invalid
    /// endorsement is a configuration error and fails construction.
    pub fn new(
        trustworthy: Vec<OrgId>,
        my_signatures: Vec<(OrgId, String)>,
        own_public_key: &[u8],
    ) -> Result<Self> {
        for (org, signature) in &my_signatures {
            let valid = orgsig::verify_peer(org, own_public_key, signature)?;
            if !valid {
                return Err(BookError::InvalidOwnSignature(*org));
            }
        }

        let my_orgs = my_signatures.iter().map(|(org, _)| *org).collect();
        Ok(OrgBook {
            trustworthy,
            my_signatures,
            my_orgs,
            claimed: RwLock::new(HashMap::new()),
            verified: RwLock::new(HashMap::new()),
        })
    }

    pub fn trustworthy(&self) -> &[OrgId] {
        &self.trustworthy
    }

    pub fn is_trustworthy(&self, org: &OrgId) -> bool {
        self.trustworthy.contains(org)
    }

    /// Endorsements this node presents to other peers.
    pub fn my_signatures(&self) -> &[(OrgId, String)] {
        &self.my_signatures
    }

    /// Organisations this node is a member of.
    pub fn my_orgs(&self) -> &[OrgId] {
        &self.my_orgs
    }

    /// Record a cryptographically verified endorsement of `peer` by
    /// `org`. Endorsements from untrusted organisations are ignored;
    /// callers must have verified the signature before calling this.
    pub async fn add_verified(&self, peer: PeerId, org: OrgId) -> bool {
        if !self.is_trustworthy(&org) {
            return false;
        }
        self.verified.write().await.entry(peer).or_default().insert(org);
        true
    }

    /// Verified organisations of `peer`, sorted for stable output.
    pub async fn verified_orgs_of(&self, peer: &PeerId) -> Vec<OrgId> {
        let mut orgs: Vec<OrgId> = self
            .verified
            .read()
            .await
            .get(peer)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        orgs.sort();
        orgs
    }

    /// True iff `peer` holds a verified endorsement from at least one
    /// of `rights`. An empty rights list never grants access here;
    /// public resources are handled before this check.
    pub async fn has_peer_right(&self, peer: &PeerId, rights: &[OrgId]) -> bool {
        let verified = self.verified.read().await;
        match verified.get(peer) {
            Some(orgs) => rights.iter().any(|r| orgs.contains(r)),
            None => false,
        }
    }

    /// Peers claiming membership of `org` on the DHT.
    pub async fn claimed_members_of(&self, org: &OrgId) -> Vec<PeerId> {
        self.claimed
            .read()
            .await
            .get(org)
            .cloned()
            .unwrap_or_default()
    }

    /// Rebuild the claimed-membership map from content routing. Claimed
    /// membership is advisory: it steers connection attempts but never
    /// grants rights. The local peer is excluded.
    pub async fn refresh_claimed(&self, lookup: &dyn MemberLookup, local: PeerId) {
        let mut fresh: HashMap<OrgId, Vec<PeerId>> = HashMap::with_capacity(self.trustworthy.len());

        for org in &self.trustworthy {
            let members: Vec<PeerId> = lookup
                .providers_of(org.content_id())
                .await
                .into_iter()
                .filter(|p| *p != local)
                .collect();
            debug!(org = %org, members = members.len(), "claimed membership refreshed");
            fresh.insert(*org, members);
        }

        *self.claimed.write().await = fresh;
    }
}
