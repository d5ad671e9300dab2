//! Reliability-driven peer selection
//!
//! Two sampling strategies over a candidate set: exponential-weight
//! sampling favouring reliable peers, and nearest-reliability sampling
//! which spreads picks across the whole reliability band. Both respect
//! optional rights filtering and exclusion sets.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use vigilmesh_books::{OrgBook, ReliabilityBook};
use vigilmesh_protocol::{OrgId, PeerId};

pub struct PeerSelector {
    reliability: Arc<ReliabilityBook>,
    orgs: Arc<OrgBook>,
    rng: Mutex<StdRng>,
}

impl PeerSelector {
    pub fn new(reliability: Arc<ReliabilityBook>, orgs: Arc<OrgBook>) -> Self {
        Self::with_rng(reliability, orgs, StdRng::from_entropy())
    }

    /// Deterministic selector for tests.
    pub fn with_seed(reliability: Arc<ReliabilityBook>, orgs: Arc<OrgBook>, seed: u64) -> Self {
        Self::with_rng(reliability, orgs, StdRng::seed_from_u64(seed))
    }

    fn with_rng(reliability: Arc<ReliabilityBook>, orgs: Arc<OrgBook>, rng: StdRng) -> Self {
        PeerSelector {
            reliability,
            orgs,
            rng: Mutex::new(rng),
        }
    }

    /// Pick up to `n` distinct peers, weighting each candidate by the
    /// exponential transform of its reliability. Peers in `blacklist`
    /// are skipped; with a non-empty `rights` list only peers holding
    /// one of those verified org endorsements qualify.
    ///
    /// When every candidate has weight zero (a network of unknown
    /// peers) the pick degrades to uniform so bootstrap still works.
    pub async fn sample_weighted(
        &self,
        from: &[PeerId],
        n: usize,
        rights: &[OrgId],
        blacklist: &HashSet<PeerId>,
    ) -> Vec<PeerId> {
        let mut selected = Vec::with_capacity(n);
        let mut taken: HashSet<PeerId> = HashSet::with_capacity(n);

        for _ in 0..n {
            let mut candidates: Vec<(PeerId, u64)> = Vec::new();
            for peer in from {
                if taken.contains(peer) || blacklist.contains(peer) {
                    continue;
                }
                if !rights.is_empty() && !self.orgs.has_peer_right(peer, rights).await {
                    continue;
                }
                candidates.push((*peer, self.reliability.weight_of(peer).await));
            }
            if candidates.is_empty() {
                break;
            }

            let pick = {
                let mut rng = self.rng.lock().unwrap();
                weighted_pick(&mut rng, &candidates)
            };
            taken.insert(pick);
            selected.push(pick);
        }
        selected
    }

    /// `sample_weighted` with no rights requirement and no blacklist.
    pub async fn sample_weighted_any(&self, from: &[PeerId], n: usize) -> Vec<PeerId> {
        self.sample_weighted(from, n, &[], &HashSet::new()).await
    }

    /// Pick up to `n` distinct peers by repeatedly drawing a target
    /// reliability from `t = 1 - (10^x - 1) / 9, x ~ U[0,1]` and taking
    /// the unselected peer closest to it. The draw is biased toward
    /// high targets but covers the whole band, so re-gossip reaches a
    /// diverse reliability mix.
    pub async fn sample_nearest(
        &self,
        from: &[PeerId],
        n: usize,
        rights: &[OrgId],
        exclude: &HashSet<PeerId>,
    ) -> Vec<PeerId> {
        let mut selected = Vec::with_capacity(n);
        let mut taken: HashSet<PeerId> = HashSet::with_capacity(n);

        for _ in 0..n {
            let mut candidates: Vec<(PeerId, f64)> = Vec::new();
            for peer in from {
                if taken.contains(peer) || exclude.contains(peer) {
                    continue;
                }
                if !rights.is_empty() && !self.orgs.has_peer_right(peer, rights).await {
                    continue;
                }
                candidates.push((*peer, self.reliability.get(peer).await));
            }
            if candidates.is_empty() {
                break;
            }

            let target = {
                let mut rng = self.rng.lock().unwrap();
                let x: f64 = rng.gen();
                1.0 - (10f64.powf(x) - 1.0) / 9.0
            };

            let (pick, _) = candidates
                .iter()
                .min_by(|(_, a), (_, b)| {
                    (a - target)
                        .abs()
                        .partial_cmp(&(b - target).abs())
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .copied()
                .expect("candidates checked non-empty");
            taken.insert(pick);
            selected.push(pick);
        }
        selected
    }

    /// Order peers by descending reliability, used when trying file
    /// providers best-first.
    pub async fn sort_by_reliability(&self, peers: Vec<PeerId>) -> Vec<PeerId> {
        let mut scored: Vec<(PeerId, f64)> = Vec::with_capacity(peers.len());
        for peer in peers {
            let rel = self.reliability.get(&peer).await;
            scored.push((peer, rel));
        }
        scored.sort_by(|(_, a), (_, b)| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
        scored.into_iter().map(|(p, _)| p).collect()
    }
}

fn weighted_pick(rng: &mut StdRng, candidates: &[(PeerId, u64)]) -> PeerId {
    let total: u64 = candidates.iter().map(|(_, w)| w).sum();
    if total == 0 {
        return candidates[rng.gen_range(0..candidates.len())].0;
    }

    let mut roll = rng.gen_range(0..total);
    for (peer, weight) in candidates {
        if roll < *weight {
            return *peer;
        }
        roll -= *weight;
    }
    candidates[candidates.len() - 1].0
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigilmesh_books::{OrgBook, ReliabilityBook};
    use vigilmesh_crypto::{orgsig, Identity};
    use vigilmesh_protocol::PEER_ID_SIZE;

    fn peer(seed: u8) -> PeerId {
        PeerId::from_bytes([seed; PEER_ID_SIZE])
    }

    fn empty_org_book() -> Arc<OrgBook> {
        Arc::new(OrgBook::new(vec![], vec![], &[0u8; 32]).unwrap())
    }

    fn selector(reliability: Arc<ReliabilityBook>) -> PeerSelector {
        PeerSelector::with_seed(reliability, empty_org_book(), 7)
    }

    #[tokio::test]
    async fn test_weighted_returns_distinct_peers() {
        let rel = Arc::new(ReliabilityBook::new());
        let sel = selector(rel);
        let from: Vec<PeerId> = (1..=10).map(peer).collect();

        let picked = sel.sample_weighted_any(&from, 4).await;
        assert_eq!(picked.len(), 4);
        let unique: HashSet<_> = picked.iter().collect();
        assert_eq!(unique.len(), 4);
    }

    #[tokio::test]
    async fn test_weighted_handles_small_candidate_set() {
        let rel = Arc::new(ReliabilityBook::new());
        let sel = selector(rel);
        let from = vec![peer(1), peer(2)];

        let picked = sel.sample_weighted_any(&from, 5).await;
        assert_eq!(picked.len(), 2);
    }

    #[tokio::test]
    async fn test_weighted_prefers_reliable_peer() {
        let rel = Arc::new(ReliabilityBook::new());
        rel.update(peer(1), 1.0).await;
        // Everyone else stays at 0 => weight 0, so the first pick must
        // always be the only positively-weighted peer.
        let sel = selector(rel);
        let from: Vec<PeerId> = (1..=5).map(peer).collect();

        for _ in 0..10 {
            let picked = sel.sample_weighted_any(&from, 1).await;
            assert_eq!(picked, vec![peer(1)]);
        }
    }

    #[tokio::test]
    async fn test_weighted_respects_blacklist() {
        let rel = Arc::new(ReliabilityBook::new());
        let sel = selector(rel);
        let from: Vec<PeerId> = (1..=4).map(peer).collect();
        let blacklist: HashSet<PeerId> = [peer(1), peer(2)].into_iter().collect();

        let picked = sel.sample_weighted(&from, 4, &[], &blacklist).await;
        assert_eq!(picked.len(), 2);
        assert!(!picked.contains(&peer(1)));
        assert!(!picked.contains(&peer(2)));
    }

    #[tokio::test]
    async fn test_weighted_rights_filter() {
        let org_key = Identity::generate().unwrap();
        let org = orgsig::org_id_of(&org_key);
        let orgs = Arc::new(OrgBook::new(vec![org], vec![], &[0u8; 32]).unwrap());
        orgs.add_verified(peer(1), org).await;

        let rel = Arc::new(ReliabilityBook::new());
        let sel = PeerSelector::with_seed(rel, orgs, 7);
        let from: Vec<PeerId> = (1..=4).map(peer).collect();

        let picked = sel.sample_weighted(&from, 4, &[org], &HashSet::new()).await;
        assert_eq!(picked, vec![peer(1)]);
    }

    #[tokio::test]
    async fn test_nearest_covers_the_band() {
        let rel = Arc::new(ReliabilityBook::new());
        rel.update(peer(1), 0.1).await;
        rel.update(peer(2), 0.5).await;
        rel.update(peer(3), 0.9).await;
        let sel = selector(rel);
        let from = vec![peer(1), peer(2), peer(3)];

        let picked = sel.sample_nearest(&from, 3, &[], &HashSet::new()).await;
        assert_eq!(picked.len(), 3);
        let unique: HashSet<_> = picked.iter().collect();
        assert_eq!(unique.len(), 3);
    }

    #[tokio::test]
    async fn test_nearest_respects_exclusions() {
        let rel = Arc::new(ReliabilityBook::new());
        let sel = selector(rel);
        let from = vec![peer(1), peer(2)];
        let exclude: HashSet<PeerId> = [peer(1)].into_iter().collect();

        let picked = sel.sample_nearest(&from, 2, &[], &exclude).await;
        assert_eq!(picked, vec![peer(2)]);
    }

    #[tokio::test]
    async fn test_reliability_sort_descending() {
        let rel = Arc::new(ReliabilityBook::new());
        rel.update(peer(1), 0.2).await;
        rel.update(peer(2), 0.9).await;
        rel.update(peer(3), 0.5).await;
        let sel = selector(rel);

        let sorted = sel
            .sort_by_reliability(vec![peer(1), peer(2), peer(3), peer(4)])
            .await;
        assert_eq!(sorted, vec![peer(2), peer(3), peer(1), peer(4)]);
    }
}
