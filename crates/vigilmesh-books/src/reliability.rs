//! Peer reliability book
//!
//! Reliability is a scalar in `[0, 1]` supplied by the local TL per
//! peer; unknown peers default to 0. Subscribers are invoked on every
//! update, which is how the connection manager keeps its peer tags in
//! sync.

use std::collections::HashMap;

use tokio::sync::RwLock;

use vigilmesh_protocol::PeerId;

/// Reliability of a peer unknown to the TL.
pub const DEFAULT_RELIABILITY: f64 = 0.0;

pub type ReliabilityCallback = Box<dyn Fn(PeerId, f64) + Send + Sync>;

pub struct ReliabilityBook {
    scores: RwLock<HashMap<PeerId, f64>>,
    callbacks: RwLock<Vec<ReliabilityCallback>>,
}

impl ReliabilityBook {
    pub fn new() -> Self {
        ReliabilityBook {
            scores: RwLock::new(HashMap::new()),
            callbacks: RwLock::new(Vec::new()),
        }
    }

    /// Store a new reliability for `peer` and notify subscribers. The
    /// value is clamped into `[0, 1]`.
    pub async fn update(&self, peer: PeerId, reliability: f64) {
        let reliability = reliability.clamp(0.0, 1.0);
        self.scores.write().await.insert(peer, reliability);

        // Callbacks run outside the map lock.
        let callbacks = self.callbacks.read().await;
        for callback in callbacks.iter() {
            callback(peer, reliability);
        }
    }

    pub async fn get(&self, peer: &PeerId) -> f64 {
        self.scores
            .read()
            .await
            .get(peer)
            .copied()
            .unwrap_or(DEFAULT_RELIABILITY)
    }

    /// Register a callback invoked on every reliability change.
    pub async fn subscribe(&self, callback: ReliabilityCallback) {
        self.callbacks.write().await.push(callback);
    }

    /// Selection weight of `peer` under the exponential transform.
    pub async fn weight_of(&self, peer: &PeerId) -> u64 {
        exp_weight(self.get(peer).await)
    }
}

impl Default for ReliabilityBook {
    fn default() -> Self {
        Self::new()
    }
}

/// Transform a reliability into a sampling weight with
/// `w = ((10^r) - 1) / 9 * 1000`, mapping `[0, 1]` onto `[0, 1000]`
/// with a strong bias toward highly reliable peers.
pub fn exp_weight(reliability: f64) -> u64 {
    let r = reliability.clamp(0.0, 1.0);
    (((10f64.powf(r)) - 1.0) / 9.0 * 1000.0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use vigilmesh_protocol::PEER_ID_SIZE;

    fn peer(seed: u8) -> PeerId {
        PeerId::from_bytes([seed; PEER_ID_SIZE])
    }

    #[tokio::test]
    async fn test_default_is_zero() {
        let book = ReliabilityBook::new();
        assert_eq!(book.get(&peer(1)).await, 0.0);
    }

    #[tokio::test]
    async fn test_update_clamps() {
        let book = ReliabilityBook::new();
        book.update(peer(1), 1.7).await;
        assert_eq!(book.get(&peer(1)).await, 1.0);
        book.update(peer(1), -0.3).await;
        assert_eq!(book.get(&peer(1)).await, 0.0);
    }

    #[tokio::test]
    async fn test_callbacks_fire() {
        let book = ReliabilityBook::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        book.subscribe(Box::new(move |_, r| {
            assert_eq!(r, 0.5);
            counter.fetch_add(1, Ordering::SeqCst);
        }))
        .await;

        book.update(peer(1), 0.5).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_exp_weight_shape() {
        assert_eq!(exp_weight(0.0), 0);
        assert_eq!(exp_weight(1.0), 1000);
        // Strongly convex: the midpoint maps well below 500.
        let mid = exp_weight(0.5);
        assert!(mid > 0 && mid < 500, "mid weight was {mid}");
        assert!(exp_weight(0.9) > exp_weight(0.8));
    }
}
