//! Time-bounded periodic re-gossip
//!
//! File metadata is not flooded: it is pushed to a few peers at a time,
//! repeatedly, with the cadence and fan-out chosen by severity. Peers
//! already visited (including the author) are never picked again.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

use vigilmesh_books::Severity;
use vigilmesh_net::Shutdown;
use vigilmesh_protocol::{OrgId, PeerId};

use crate::core::ProtoCore;

/// Re-gossip policy for one severity.
#[derive(Debug, Clone)]
pub struct SpreadStrategy {
    /// Peers per round. Zero disables spreading entirely.
    pub peers: usize,
    /// Pause between rounds. Zero means a single immediate round.
    pub every: Duration,
    /// Total spreading window.
    pub until: Duration,
}

/// Default policy table.
pub fn default_strategies() -> HashMap<Severity, SpreadStrategy> {
    HashMap::from([
        (
            Severity::Minor,
            SpreadStrategy {
                peers: 2,
                every: Duration::from_secs(20 * 60),
                until: Duration::from_secs(60 * 60),
            },
        ),
        (
            Severity::Major,
            SpreadStrategy {
                peers: 5,
                every: Duration::from_secs(10 * 60),
                until: Duration::from_secs(60 * 60),
            },
        ),
        (
            Severity::Critical,
            SpreadStrategy {
                peers: 10,
                every: Duration::from_secs(5 * 60),
                until: Duration::from_secs(60 * 60),
            },
        ),
    ])
}

pub struct Spreader {
    core: Arc<ProtoCore>,
    strategies: HashMap<Severity, SpreadStrategy>,
    shutdown: Shutdown,
}

impl Spreader {
    /// `overrides` replaces the default strategy per severity.
    pub fn new(
        core: Arc<ProtoCore>,
        overrides: HashMap<Severity, SpreadStrategy>,
        shutdown: Shutdown,
    ) -> Arc<Self> {
        let mut strategies = default_strategies();
        strategies.extend(overrides);
        Arc::new(Spreader {
            core,
            strategies,
            shutdown,
        })
    }

    /// Start spreading an already-signed message. Returns immediately;
    /// the rounds run in a background task until the window closes.
    pub fn start(
        self: &Arc<Self>,
        protocol: &'static str,
        severity: Severity,
        rights: Vec<OrgId>,
        message: Vec<u8>,
        author: PeerId,
    ) {
        let strategy = self
            .strategies
            .get(&severity)
            .cloned()
            .expect("strategy table covers every severity");
        if strategy.peers == 0 {
            return;
        }

        let spreader = self.clone();
        let mut shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            let mut visited: HashSet<PeerId> = HashSet::new();
            visited.insert(author);

            spreader
                .spread_round(protocol, strategy.peers, &rights, &mut visited, &message)
                .await;

            if strategy.every.is_zero() {
                debug!("spreading finished after single round");
                return;
            }

            let mut ticker = tokio::time::interval(strategy.every);
            ticker.tick().await; // skip the immediate tick
            let window = tokio::time::sleep(strategy.until);
            tokio::pin!(window);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("spreading cancelled");
                        return;
                    }
                    _ = &mut window => {
                        debug!("spreading window closed");
                        return;
                    }
                    _ = ticker.tick() => {
                        spreader
                            .spread_round(protocol, strategy.peers, &rights, &mut visited, &message)
                            .await;
                    }
                }
            }
        });
    }

    async fn spread_round(
        &self,
        protocol: &str,
        n: usize,
        rights: &[OrgId],
        visited: &mut HashSet<PeerId>,
        message: &[u8],
    ) {
        let connected = self.core.host.connected_peers().await;
        let targets = self
            .core
            .selector
            .sample_nearest(&connected, n, rights, visited)
            .await;
        debug!(targets = targets.len(), "spreading to peers");

        for peer in targets {
            if let Err(e) = self.core.send_bytes(peer, protocol, message).await {
                error!(peer = %peer, error = %e, "failed to spread message");
            }
            visited.insert(peer);
        }
    }
}
