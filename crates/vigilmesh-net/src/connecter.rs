//! Connecter: the one component that actively heals the connection set
//!
//! A single long-running task that wakes on a slow tick or on an
//! explicit nudge from the connection manager. When the connection
//! count has fallen below the low water mark (and enough time has
//! passed since the previous pass) it learns new peers via peer-query,
//! reserves a share of the free slots for organisation co-members and
//! fills the rest from the peer store.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use vigilmesh_books::OrgBook;
use vigilmesh_protocol::PeerId;

use crate::dht::ContentRouting;
use crate::host::Host;
use crate::manager::ConnBand;
use crate::selector::PeerSelector;
use crate::shutdown::Shutdown;

/// How many connected peers are asked for new peer ids per pass.
pub const QUERY_PEERS: usize = 5;

/// Minimum pause between two update passes.
const MIN_PASS_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Peer-store validity for peers learned through peer-query.
const TEMP_ADDR_TTL: Duration = Duration::from_secs(2 * 60);

/// Client side of the peer-query protocol, implemented by the
/// messaging layer and injected here to keep the dependency narrow.
#[async_trait]
pub trait PeerQueryClient: Send + Sync {
    async fn query(&self, peer: PeerId) -> crate::error::Result<Vec<PeerId>>;
}

/// Wake-up handle for the connecter. Notifications coalesce: nudging a
/// connecter that is already scheduled to run is a no-op.
#[derive(Clone)]
pub struct ConnecterHandle {
    notify: Arc<Notify>,
}

impl ConnecterHandle {
    /// A handle wired to nothing, for components under test.
    pub fn detached() -> Self {
        ConnecterHandle {
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn notify(&self) {
        self.notify.notify_one();
    }
}

pub struct Connecter {
    host: Arc<dyn Host>,
    dht: Arc<dyn ContentRouting>,
    orgs: Arc<OrgBook>,
    selector: Arc<PeerSelector>,
    peer_query: Arc<dyn PeerQueryClient>,
    band: ConnBand,
    reconnect_interval: Duration,
    notify: Arc<Notify>,
    last_run: Mutex<Option<Instant>>,
}

impl Connecter {
    pub fn new(
        host: Arc<dyn Host>,
        dht: Arc<dyn ContentRouting>,
        orgs: Arc<OrgBook>,
        selector: Arc<PeerSelector>,
        peer_query: Arc<dyn PeerQueryClient>,
        band: ConnBand,
        reconnect_interval: Duration,
    ) -> (Arc<Self>, ConnecterHandle) {
        let notify = Arc::new(Notify::new());
        let connecter = Arc::new(Connecter {
            host,
            dht,
            orgs,
            selector,
            peer_query,
            band,
            reconnect_interval,
            notify: notify.clone(),
            last_run: Mutex::new(None),
        });
        (connecter, ConnecterHandle { notify })
    }

    /// Single worker loop: ticks and nudges share it, so at most one
    /// update pass runs at any time. An explicit nudge resets the
    /// ticker so neither wake-up source can starve the other.
    pub async fn run(self: Arc<Self>, mut shutdown: Shutdown) {
        info!(interval = ?self.reconnect_interval, "starting peer connecter");
        let mut ticker = tokio::time::interval(self.reconnect_interval);
        ticker.tick().await; // immediate first tick

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("peer connecter stopped");
                    break;
                }
                _ = ticker.tick() => self.process().await,
                _ = self.notify.notified() => {
                    self.process().await;
                    ticker.reset();
                }
            }
        }
    }

    async fn process(&self) {
        if self.host.connection_count().await >= self.band.low {
            return;
        }

        let too_recent = self
            .last_run
            .lock()
            .unwrap()
            .map(|at| at.elapsed() < MIN_PASS_INTERVAL)
            .unwrap_or(false);
        if too_recent {
            debug!("skipping reconnect pass, previous pass too recent");
            return;
        }

        self.run_update_pass().await;
        *self.last_run.lock().unwrap() = Some(Instant::now());
    }

    /// One full update pass. Connection counts are snapshotted once at
    /// the start; attempts are capped by the pre-computed targets so a
    /// racing connect cannot over-fill the band.
    pub async fn run_update_pass(&self) {
        let connected = self.host.connected_peers().await;
        debug!(
            current = connected.len(),
            low = self.band.low,
            medium = self.band.medium,
            high = self.band.high,
            "running connection update pass"
        );

        self.learn_new_peers(&connected).await;

        let connected: HashSet<PeerId> = connected.into_iter().collect();
        let free_slots = self.band.medium.saturating_sub(connected.len());
        if free_slots == 0 {
            return;
        }

        let mut dialed: HashSet<PeerId> = HashSet::new();

        // Reserve two thirds of the free slots (at least one per org)
        // for members of our own organisations.
        let my_orgs = self.orgs.my_orgs().to_vec();
        let mut org_connects = 0usize;
        if !my_orgs.is_empty() {
            let per_org = ((2 * free_slots) / (3 * my_orgs.len())).max(1);
            for org in &my_orgs {
                let mut count = 0usize;
                for member in self.orgs.claimed_members_of(org).await {
                    if count >= per_org || org_connects >= free_slots {
                        break;
                    }
                    if member == self.host.local_peer()
                        || connected.contains(&member)
                        || dialed.contains(&member)
                    {
                        continue;
                    }
                    match self.host.connect(member).await {
                        Ok(()) => {
                            dialed.insert(member);
                            count += 1;
                            org_connects += 1;
                        }
                        Err(e) => warn!(peer = %member, error = %e, "org member connect failed"),
                    }
                }
            }
        }

        // Fill whatever is left from the general peer store.
        let remaining = free_slots.saturating_sub(org_connects);
        let mut filled = 0usize;
        for peer in self.host.known_peers().await {
            if filled >= remaining {
                break;
            }
            if peer == self.host.local_peer()
                || connected.contains(&peer)
                || dialed.contains(&peer)
            {
                continue;
            }
            match self.host.connect(peer).await {
                Ok(()) => {
                    dialed.insert(peer);
                    filled += 1;
                }
                Err(e) => warn!(peer = %peer, error = %e, "connect failed"),
            }
        }

        debug!(
            org_connects,
            general_connects = filled,
            "connection update pass finished"
        );
    }

    /// Ask a reliability-weighted sample of connected peers for peers
    /// we do not know yet, resolve them on the routing layer and stash
    /// them in the peer store with a short TTL.
    async fn learn_new_peers(&self, connected: &[PeerId]) {
        let receivers = self.selector.sample_weighted_any(connected, QUERY_PEERS).await;
        let mut known: HashSet<PeerId> = self.host.known_peers().await.into_iter().collect();
        known.extend(connected.iter().copied());
        known.insert(self.host.local_peer());

        for receiver in receivers {
            let peers = match self.peer_query.query(receiver).await {
                Ok(peers) => peers,
                Err(e) => {
                    warn!(peer = %receiver, error = %e, "peer query failed");
                    continue;
                }
            };
            for peer in peers {
                if known.contains(&peer) {
                    continue;
                }
                match self.dht.find_peer(peer).await {
                    Ok(true) => {
                        self.host.remember_peer(peer, TEMP_ADDR_TTL).await;
                        known.insert(peer);
                        debug!(peer = %peer, "learned new peer");
                    }
                    Ok(false) | Err(_) => {
                        debug!(peer = %peer, "peer not resolvable, skipping");
                    }
                }
            }
        }
    }
}
