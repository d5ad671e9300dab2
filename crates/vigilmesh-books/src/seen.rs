//! Seen-message cache for dedup and loop prevention

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use vigilmesh_protocol::PeerId;

/// How long an entry stays in the cache. A gossip message older than
/// this can re-enter the network and will be treated as new again.
const EVICT_AFTER: Duration = Duration::from_secs(60 * 60);

/// Minimum pause between eviction sweeps.
const SWEEP_EVERY: Duration = Duration::from_secs(60);

struct SeenEntry {
    forwarder: PeerId,
    seen_at: Instant,
}

struct Inner {
    entries: HashMap<String, SeenEntry>,
    last_sweep: Instant,
}

/// Remembers which message ids were already processed and which peer
/// delivered each of them first. Used to drop duplicates and to avoid
/// sending a message back to the peer it came from.
pub struct SeenCache {
    inner: RwLock<Inner>,
}

impl SeenCache {
    pub fn new() -> Self {
        SeenCache {
            inner: RwLock::new(Inner {
                entries: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    pub async fn was_seen(&self, id: &str) -> bool {
        self.inner.read().await.entries.contains_key(id)
    }

    /// Record `id` as seen, delivered first by `from`. Returns true on
    /// first sight, false when the id was already cached; the check
    /// and the insert are one atomic step so concurrent deliveries of
    /// the same message cannot both win. The local peer id is used
    /// when we authored the message ourselves.
    pub async fn mark_seen(&self, id: &str, from: PeerId) -> bool {
        let mut inner = self.inner.write().await;
        let now = Instant::now();

        if now.duration_since(inner.last_sweep) >= SWEEP_EVERY {
            inner
                .entries
                .retain(|_, e| now.duration_since(e.seen_at) < EVICT_AFTER);
            inner.last_sweep = now;
        }

        match inner.entries.entry(id.to_string()) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(SeenEntry {
                    forwarder: from,
                    seen_at: now,
                });
                true
            }
        }
    }

    /// The peer that first delivered `id`, if still cached.
    pub async fn sender_of(&self, id: &str) -> Option<PeerId> {
        self.inner.read().await.entries.get(id).map(|e| e.forwarder)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }
}

impl Default for SeenCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigilmesh_protocol::PEER_ID_SIZE;

    fn peer(seed: u8) -> PeerId {
        PeerId::from_bytes([seed; PEER_ID_SIZE])
    }

    #[tokio::test]
    async fn test_mark_and_query() {
        let cache = SeenCache::new();
        assert!(!cache.was_seen("m1").await);

        assert!(cache.mark_seen("m1", peer(1)).await);
        assert!(cache.was_seen("m1").await);
        assert_eq!(cache.sender_of("m1").await, Some(peer(1)));
        assert_eq!(cache.sender_of("m2").await, None);
    }

    #[tokio::test]
    async fn test_first_forwarder_wins() {
        let cache = SeenCache::new();
        assert!(cache.mark_seen("m1", peer(1)).await);
        assert!(!cache.mark_seen("m1", peer(2)).await);
        assert_eq!(cache.sender_of("m1").await, Some(peer(1)));
        assert_eq!(cache.len().await, 1);
    }
}
