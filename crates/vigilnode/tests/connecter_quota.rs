//! Connecter slot arithmetic: organisation co-members get a reserved
//! share of the free slots, the rest is filled from the peer store,
//! and one pass never exceeds the medium water mark.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use vigilmesh_books::{MemberLookup, OrgBook, ReliabilityBook};
use vigilmesh_crypto::{orgsig, Identity};
use vigilmesh_net::{
    ConnBand, Connecter, Host, MemoryDhtHub, MemoryHub, PeerQueryClient, PeerSelector,
};
use vigilmesh_protocol::{ContentId, PeerId, PEER_ID_SIZE};

fn peer(seed: u8) -> PeerId {
    PeerId::from_bytes([seed; PEER_ID_SIZE])
}

struct FixedMembers(Vec<PeerId>);

#[async_trait]
impl MemberLookup for FixedMembers {
    async fn providers_of(&self, _key: ContentId) -> Vec<PeerId> {
        self.0.clone()
    }
}

struct NoPeers;

#[async_trait]
impl PeerQueryClient for NoPeers {
    async fn query(&self, _peer: PeerId) -> vigilmesh_net::Result<Vec<PeerId>> {
        Ok(vec![])
    }
}

#[tokio::test]
async fn test_connecter_reserves_org_share_and_fills_rest() {
    let hub = MemoryHub::new();

    // Our node.
    let me = Identity::generate().unwrap();
    let host = hub.create_host(me.peer_id()).await;
    let dht = MemoryDhtHub::new().handle_for(me.peer_id()).await;

    // Ten claimed org co-members and eight general peers, all dialable.
    let org_members: Vec<PeerId> = (10u8..20).map(peer).collect();
    let others: Vec<PeerId> = (30u8..38).map(peer).collect();
    for p in org_members.iter().chain(others.iter()) {
        hub.create_host(*p).await;
    }

    // One org membership of our own.
    let org_key = Identity::generate().unwrap();
    let org = orgsig::org_id_of(&org_key);
    let my_signature = orgsig::sign_peer(&org_key, &me.peer_id());
    let orgs = Arc::new(
        OrgBook::new(
            vec![org],
            vec![(org, my_signature)],
            &me.public_key_bytes(),
        )
        .unwrap(),
    );
    orgs.refresh_claimed(&FixedMembers(org_members.clone()), me.peer_id())
        .await;

    for p in &others {
        host.remember_peer(*p, Duration::from_secs(600)).await;
    }

    // Start with one existing connection to a general peer.
    host.connect(others[0]).await.unwrap();
    assert_eq!(host.connection_count().await, 1);

    let reliability = Arc::new(ReliabilityBook::new());
    let selector = Arc::new(PeerSelector::with_seed(reliability, orgs.clone(), 11));
    let (connecter, _handle) = Connecter::new(
        host.clone(),
        dht.clone(),
        orgs.clone(),
        selector,
        Arc::new(NoPeers),
        ConnBand {
            low: 2,
            medium: 6,
            high: 10,
        },
        Duration::from_secs(600),
    );

    connecter.run_update_pass().await;

    // free = 6 - 1 = 5; per-org quota = max((2*5)/(3*1), 1) = 3 from
    // the claimed members, then 2 more from the peer store.
    assert_eq!(host.connection_count().await, 6);

    let mut org_connected = 0usize;
    for p in &org_members {
        if host.is_connected(p).await {
            org_connected += 1;
        }
    }
    assert_eq!(org_connected, 3, "org quota not honoured");

    let mut general_connected = 0usize;
    for p in &others {
        if host.is_connected(p).await {
            general_connected += 1;
        }
    }
    // The pre-existing connection plus the two fill-up dials.
    assert_eq!(general_connected, 3);

    // A second pass right away finds the band satisfied and changes
    // nothing.
    connecter.run_update_pass().await;
    assert_eq!(host.connection_count().await, 6);
}
