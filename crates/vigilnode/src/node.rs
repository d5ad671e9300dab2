//! Node assembly and lifecycle
//!
//! Components are built leaves-first so that by the time the
//! connection manager starts consuming transport events every
//! dependency it needs is already wired. The manager's event
//! subscription is taken before any bootstrap connection is attempted,
//! so no early event is lost.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use vigilmesh_books::{FileBook, OrgBook, ReliabilityBook, SeenCache, Severity};
use vigilmesh_crypto::{CryptoKit, Identity};
use vigilmesh_messaging::{
    AlertProtocol, FileShareProtocol, IntelligenceProtocol, IntelligenceSettings, OrgSigProtocol,
    PeerQueryProtocol, PeersListPublisher, ProtoCore, ProtocolRegistry, RecommendationProtocol,
    ReliabilityReceiver, Spreader, SpreadStrategy, TlBus, TlDispatcher,
};
use vigilmesh_net::{
    shutdown_pair, util, ConnBand, Connecter, ConnectionEvent, ConnectionManager, DhtHandle, Host,
    PeerSelector, Shutdown, ShutdownTrigger,
};
use vigilmesh_protocol::{protocols, OrgId, PeerId};

use crate::config::Config;

/// Validity window for bootstrap peer-store entries.
const BOOTSTRAP_ADDR_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Grace before the first claimed-membership refresh, giving content
/// routing time to bootstrap.
const ORG_UPDATER_GRACE: Duration = Duration::from_secs(5);

pub struct Node {
    config: Config,
    identity: Arc<Identity>,
    host: Arc<dyn Host>,
    dht: Arc<DhtHandle>,
    bus: Arc<dyn TlBus>,

    seen: Arc<SeenCache>,
    reliability: Arc<ReliabilityBook>,
    orgs: Arc<OrgBook>,
    files: Arc<FileBook>,

    listen_port: u16,

    trigger: ShutdownTrigger,
    shutdown: Shutdown,

    // Consumed by `start`.
    pending: Option<Pending>,
    tasks: Vec<JoinHandle<()>>,
}

struct Pending {
    registry: ProtocolRegistry,
    dispatcher: TlDispatcher,
    manager: Arc<ConnectionManager>,
    connecter: Arc<Connecter>,
    events: broadcast::Receiver<ConnectionEvent>,
}

impl Node {
    pub async fn new(
        config: Config,
        identity: Arc<Identity>,
        host: Arc<dyn Host>,
        dht: Arc<DhtHandle>,
        bus: Arc<dyn TlBus>,
    ) -> Result<Self> {
        let (trigger, shutdown) = shutdown_pair();

        let listen_port = if config.server.port == 0 {
            util::scan_free_port(9000..11000).context("no free port in [9000..11000)")?
        } else {
            config.server.port
        };

        // Books.
        let seen = Arc::new(SeenCache::new());
        let reliability = Arc::new(ReliabilityBook::new());
        let files = Arc::new(FileBook::new());
        let orgs = Arc::new(build_org_book(&config, &identity)?);

        // Selection and the shared protocol context.
        let selector = Arc::new(PeerSelector::new(reliability.clone(), orgs.clone()));
        let crypto = Arc::new(CryptoKit::new(identity.clone()));
        let core = Arc::new(ProtoCore {
            crypto,
            host: host.clone(),
            bus: bus.clone(),
            seen: seen.clone(),
            orgs: orgs.clone(),
            reliability: reliability.clone(),
            selector: selector.clone(),
        });

        // Protocols.
        let org_sig = OrgSigProtocol::new(core.clone());
        let alert = AlertProtocol::new(core.clone());
        let recommendation = RecommendationProtocol::new(
            core.clone(),
            config.recommendation.timeout,
            shutdown.clone(),
        );
        let intelligence = IntelligenceProtocol::new(
            core.clone(),
            IntelligenceSettings {
                ttl: config.intelligence.ttl,
                max_ttl: config.intelligence.max_ttl,
                root_timeout: config.intelligence.root_timeout,
                max_parent_timeout: config.intelligence.max_parent_timeout,
            },
            shutdown.clone(),
        );
        let peer_query = PeerQueryProtocol::new(core.clone());
        let spreader = Spreader::new(
            core.clone(),
            parse_spread_overrides(&config)?,
            shutdown.clone(),
        );
        let file_share = FileShareProtocol::new(
            core.clone(),
            files.clone(),
            dht.clone(),
            spreader,
            config.file_share.download_dir.clone(),
        );
        let reliability_rx = ReliabilityReceiver::new(core.clone());

        // Inbound stream dispatch.
        let mut registry = ProtocolRegistry::new();
        registry.register(protocols::ALERT, alert.clone());
        registry.register(protocols::RECOMMENDATION_REQUEST, recommendation.clone());
        registry.register(protocols::RECOMMENDATION_RESPONSE, recommendation.clone());
        registry.register(protocols::INTELLIGENCE_REQUEST, intelligence.clone());
        registry.register(protocols::INTELLIGENCE_RESPONSE, intelligence.clone());
        registry.register(protocols::FILE_SHARE_METADATA, file_share.clone());
        registry.register(protocols::FILE_SHARE_DOWNLOAD, file_share.clone());
        registry.register(protocols::PEER_QUERY, peer_query.clone());
        registry.register(protocols::ORG_SIGNATURE, org_sig.clone());

        // TL dispatch.
        let mut dispatcher = TlDispatcher::new();
        dispatcher.register("tl2nl_alert", alert);
        dispatcher.register("tl2nl_recommendation_request", recommendation.clone());
        dispatcher.register("tl2nl_recommendation_response", recommendation);
        dispatcher.register("tl2nl_intelligence_request", intelligence.clone());
        dispatcher.register("tl2nl_intelligence_response", intelligence);
        dispatcher.register("tl2nl_file_share", file_share.clone());
        dispatcher.register("tl2nl_file_share_download", file_share);
        dispatcher.register("tl2nl_peers_reliability", reliability_rx);

        // Connection maintenance. The manager comes last, fully wired.
        let band = ConnBand {
            low: config.connections.low,
            medium: config.connections.medium,
            high: config.connections.high,
        };
        let (connecter, connecter_handle) = Connecter::new(
            host.clone(),
            dht.clone(),
            orgs.clone(),
            selector,
            peer_query,
            band,
            config.connections.reconnect_interval,
        );
        let peers_publisher = PeersListPublisher::new(core.clone());
        let manager = ConnectionManager::new(
            host.clone(),
            band,
            reliability.clone(),
            org_sig,
            peers_publisher,
            connecter_handle,
        );
        reliability.subscribe(manager.reliability_callback()).await;

        // Subscribe before anything can connect.
        let events = host.subscribe_events();

        Ok(Node {
            config,
            identity,
            host,
            dht,
            bus,
            seen,
            reliability,
            orgs,
            files,
            listen_port,
            trigger,
            shutdown,
            pending: Some(Pending {
                registry,
                dispatcher,
                manager,
                connecter,
                events,
            }),
            tasks: Vec::new(),
        })
    }

    /// Spawn all long-running tasks, contact the bootstrap peers and
    /// advertise our organisation memberships.
    pub async fn start(&mut self) -> Result<()> {
        let Pending {
            registry,
            dispatcher,
            manager,
            connecter,
            events,
        } = self.pending.take().context("node already started")?;

        self.tasks
            .push(tokio::spawn(registry.run(self.host.clone(), self.shutdown.clone())));
        self.tasks
            .push(tokio::spawn(dispatcher.run(self.bus.clone(), self.shutdown.clone())));
        self.tasks
            .push(tokio::spawn(manager.run(events, self.shutdown.clone())));
        self.tasks
            .push(tokio::spawn(connecter.run(self.shutdown.clone())));
        self.spawn_org_updater();

        info!(
            peer = %self.identity.peer_id(),
            port = self.listen_port,
            "node started"
        );

        self.connect_bootstrap_peers().await;
        self.advertise_my_orgs().await;
        Ok(())
    }

    fn spawn_org_updater(&mut self) {
        if self.orgs.trustworthy().is_empty() {
            return;
        }

        let orgs = self.orgs.clone();
        let dht = self.dht.clone();
        let local = self.identity.peer_id();
        let period = self.config.organisations.dht_update_period;
        let mut shutdown = self.shutdown.clone();

        self.tasks.push(tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(ORG_UPDATER_GRACE) => {}
                _ = shutdown.cancelled() => return,
            }

            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        orgs.refresh_claimed(dht.as_ref(), local).await;
                    }
                }
            }
        }));
    }

    async fn connect_bootstrap_peers(&self) {
        let mut contacted = 0usize;
        for raw in &self.config.peer_discovery.bootstrap {
            let peer = match parse_connection_string(raw) {
                Ok(peer) => peer,
                Err(e) => {
                    error!(entry = %raw, error = %e, "bad bootstrap entry");
                    continue;
                }
            };
            self.host.remember_peer(peer, BOOTSTRAP_ADDR_TTL).await;
            match self.host.connect(peer).await {
                Ok(()) => contacted += 1,
                Err(e) => error!(peer = %peer, error = %e, "bootstrap connect failed"),
            }
        }
        if contacted == 0 {
            warn!("got 0 init peers, cannot make initial contact with the overlay");
        }
    }

    /// Announce membership of our organisations on content routing.
    async fn advertise_my_orgs(&self) {
        use vigilmesh_net::ContentRouting;

        for org in self.orgs.my_orgs() {
            if let Err(e) = self.dht.start_providing(org.content_id()).await {
                error!(org = %org, error = %e, "failed to advertise org membership");
            }
        }
    }

    pub fn stop(&self) {
        self.trigger.trigger();
    }

    pub fn local_peer(&self) -> PeerId {
        self.identity.peer_id()
    }

    pub fn listen_port(&self) -> u16 {
        self.listen_port
    }

    pub fn identity(&self) -> &Arc<Identity> {
        &self.identity
    }

    pub fn host(&self) -> &Arc<dyn Host> {
        &self.host
    }

    pub fn orgs(&self) -> &Arc<OrgBook> {
        &self.orgs
    }

    pub fn files(&self) -> &Arc<FileBook> {
        &self.files
    }

    pub fn reliability(&self) -> &Arc<ReliabilityBook> {
        &self.reliability
    }

    pub fn seen(&self) -> &Arc<SeenCache> {
        &self.seen
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.trigger.trigger();
    }
}

fn build_org_book(config: &Config, identity: &Identity) -> Result<OrgBook> {
    let mut trustworthy = Vec::with_capacity(config.organisations.trustworthy.len());
    for raw in &config.organisations.trustworthy {
        let org = OrgId::from_hex(raw)
            .map_err(|_| anyhow::anyhow!("invalid trusted org id '{raw}'"))?;
        trustworthy.push(org);
    }

    let mut signatures = Vec::with_capacity(config.organisations.signatures.len());
    for entry in &config.organisations.signatures {
        let org = OrgId::from_hex(&entry.id)
            .map_err(|_| anyhow::anyhow!("invalid org id '{}' in signatures", entry.id))?;
        signatures.push((org, entry.signature.clone()));
    }

    OrgBook::new(trustworthy, signatures, &identity.public_key_bytes())
        .context("organisation book construction failed")
}

fn parse_spread_overrides(config: &Config) -> Result<HashMap<Severity, SpreadStrategy>> {
    let mut overrides = HashMap::new();
    for (raw, strategy) in &config.file_share.spread {
        let severity = Severity::parse(raw)
            .map_err(|_| anyhow::anyhow!("unknown severity '{raw}' in spread config"))?;
        overrides.insert(
            severity,
            SpreadStrategy {
                peers: strategy.peers,
                every: strategy.every,
                until: strategy.until,
            },
        );
    }
    Ok(overrides)
}

/// A connection string is an address and a peer id separated by a
/// space; the in-process transport only needs the peer id.
fn parse_connection_string(raw: &str) -> Result<PeerId> {
    let mut parts = raw.split_whitespace();
    let _address = parts.next().context("empty connection string")?;
    let id = parts.next().context("connection string misses peer id")?;
    if parts.next().is_some() {
        bail!("connection string has trailing tokens");
    }
    PeerId::from_hex(id).map_err(|_| anyhow::anyhow!("invalid peer id in connection string"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_connection_string() {
        let peer = PeerId::from_bytes([7u8; vigilmesh_protocol::PEER_ID_SIZE]);
        let raw = format!("/ip4/10.0.0.1/udp/9000 {}", peer.to_hex());
        assert_eq!(parse_connection_string(&raw).unwrap(), peer);

        assert!(parse_connection_string("onlyaddress").is_err());
        assert!(parse_connection_string("addr notahexid").is_err());
        assert!(parse_connection_string("addr aa bb").is_err());
    }
}
