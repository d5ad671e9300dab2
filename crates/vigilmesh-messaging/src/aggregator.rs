//! Per-request response aggregation
//!
//! `start_waiting` opens a bounded slot for a request's responses and
//! spawns a waiter that finishes either when the expected count is
//! collected or when the timeout elapses, delivering the batch exactly
//! once on the completion channel. Shutdown abandons waits silently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info};

use vigilmesh_net::Shutdown;
use vigilmesh_protocol::PeerId;

use crate::error::{MessagingError, Result};

/// Per-request bookkeeping carried through to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitMeta {
    /// Where the aggregate goes: `None` means this node initiated the
    /// request and consumes the result itself.
    pub responses_receiver: Option<PeerId>,
}

impl WaitMeta {
    pub fn local() -> Self {
        WaitMeta {
            responses_receiver: None,
        }
    }

    pub fn upstream(peer: PeerId) -> Self {
        WaitMeta {
            responses_receiver: Some(peer),
        }
    }
}

/// One finished aggregation: responses in arrival order, possibly
/// fewer than expected when the timeout fired first.
pub struct Completed<M> {
    pub id: String,
    pub responses: Vec<M>,
    pub meta: WaitMeta,
}

struct Entry<M> {
    tx: mpsc::Sender<M>,
    pushed: usize,
    capacity: usize,
}

pub struct ResponseAggregator<M> {
    entries: Arc<Mutex<HashMap<String, Entry<M>>>>,
    completed_tx: mpsc::UnboundedSender<Completed<M>>,
    shutdown: Shutdown,
}

impl<M: Send + 'static> ResponseAggregator<M> {
    /// Returns the aggregator and the channel on which completed
    /// batches are delivered, each exactly once.
    pub fn new(shutdown: Shutdown) -> (Arc<Self>, mpsc::UnboundedReceiver<Completed<M>>) {
        let (completed_tx, completed_rx) = mpsc::unbounded_channel();
        (
            Arc::new(ResponseAggregator {
                entries: Arc::new(Mutex::new(HashMap::new())),
                completed_tx,
                shutdown,
            }),
            completed_rx,
        )
    }

    /// Open a waiting slot for `expected` responses to request `id`.
    pub fn start_waiting(
        &self,
        id: &str,
        meta: WaitMeta,
        expected: usize,
        timeout: Duration,
    ) -> Result<()> {
        let (tx, mut rx) = mpsc::channel::<M>(expected.max(1));

        {
            let mut entries = self.entries.lock().unwrap();
            if entries.contains_key(id) {
                return Err(MessagingError::DuplicateId(id.to_string()));
            }
            entries.insert(
                id.to_string(),
                Entry {
                    tx,
                    pushed: 0,
                    capacity: expected,
                },
            );
        }

        let id = id.to_string();
        let entries = self.entries.clone();
        let completed_tx = self.completed_tx.clone();
        let mut shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            let mut collected: Vec<M> = Vec::with_capacity(expected);
            let deadline = tokio::time::sleep(timeout);
            tokio::pin!(deadline);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        entries.lock().unwrap().remove(&id);
                        return;
                    }
                    _ = &mut deadline => {
                        info!(
                            id = %id,
                            got = collected.len(),
                            expected,
                            "timeout elapsed waiting for responses"
                        );
                        break;
                    }
                    msg = rx.recv() => match msg {
                        Some(msg) => {
                            collected.push(msg);
                            if collected.len() >= expected {
                                break;
                            }
                        }
                        None => return,
                    },
                }
            }

            entries.lock().unwrap().remove(&id);
            debug!(id = %id, responses = collected.len(), "aggregation finished");
            let _ = completed_tx.send(Completed {
                id,
                responses: collected,
                meta,
            });
        });

        Ok(())
    }

    /// Deliver one response towards the waiter for `id`.
    pub fn add_response(&self, id: &str, msg: M) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| MessagingError::UnknownId(id.to_string()))?;

        if entry.pushed >= entry.capacity {
            return Err(MessagingError::Full(id.to_string()));
        }
        entry
            .tx
            .try_send(msg)
            .map_err(|_| MessagingError::UnknownId(id.to_string()))?;
        entry.pushed += 1;
        Ok(())
    }

    pub fn pending(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigilmesh_net::shutdown_pair;

    fn aggregator() -> (
        Arc<ResponseAggregator<u32>>,
        mpsc::UnboundedReceiver<Completed<u32>>,
        vigilmesh_net::ShutdownTrigger,
    ) {
        let (trigger, shutdown) = shutdown_pair();
        let (agg, rx) = ResponseAggregator::new(shutdown);
        (agg, rx, trigger)
    }

    #[tokio::test]
    async fn test_completes_on_count() {
        let (agg, mut rx, _trigger) = aggregator();
        agg.start_waiting("r1", WaitMeta::local(), 2, Duration::from_secs(5))
            .unwrap();

        agg.add_response("r1", 10).unwrap();
        agg.add_response("r1", 20).unwrap();

        let done = rx.recv().await.unwrap();
        assert_eq!(done.id, "r1");
        assert_eq!(done.responses, vec![10, 20]);
        assert_eq!(agg.pending(), 0);

        // Late responses are rejected.
        assert!(matches!(
            agg.add_response("r1", 30),
            Err(MessagingError::UnknownId(_))
        ));
    }

    #[tokio::test]
    async fn test_completes_on_timeout_with_partial() {
        let (agg, mut rx, _trigger) = aggregator();
        agg.start_waiting("r1", WaitMeta::local(), 3, Duration::from_millis(50))
            .unwrap();
        agg.add_response("r1", 1).unwrap();

        let done = rx.recv().await.unwrap();
        assert_eq!(done.responses, vec![1]);
    }

    #[tokio::test]
    async fn test_zero_expected_waits_for_timeout() {
        let (agg, mut rx, _trigger) = aggregator();
        agg.start_waiting("r1", WaitMeta::local(), 0, Duration::from_millis(50))
            .unwrap();

        let done = rx.recv().await.unwrap();
        assert!(done.responses.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let (agg, _rx, _trigger) = aggregator();
        agg.start_waiting("r1", WaitMeta::local(), 1, Duration::from_secs(5))
            .unwrap();
        assert!(matches!(
            agg.start_waiting("r1", WaitMeta::local(), 1, Duration::from_secs(5)),
            Err(MessagingError::DuplicateId(_))
        ));
    }

    #[tokio::test]
    async fn test_overfull_storage_rejected() {
        let (agg, mut rx, _trigger) = aggregator();
        agg.start_waiting("r1", WaitMeta::local(), 1, Duration::from_secs(5))
            .unwrap();

        agg.add_response("r1", 1).unwrap();
        // The waiter may not have drained yet; a second push must fail
        // with either Full (entry still present) or UnknownId (already
        // completed).
        let err = agg.add_response("r1", 2);
        assert!(err.is_err());

        let done = rx.recv().await.unwrap();
        assert_eq!(done.responses, vec![1]);
    }

    #[tokio::test]
    async fn test_unknown_id_rejected() {
        let (agg, _rx, _trigger) = aggregator();
        assert!(matches!(
            agg.add_response("nope", 1),
            Err(MessagingError::UnknownId(_))
        ));
    }

    #[tokio::test]
    async fn test_exactly_once_across_count_and_timeout() {
        let (agg, mut rx, _trigger) = aggregator();
        agg.start_waiting("r1", WaitMeta::local(), 1, Duration::from_millis(30))
            .unwrap();
        agg.add_response("r1", 7).unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.responses, vec![7]);

        // Nothing further arrives for the same id even after the
        // timeout would have fired.
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_shutdown_abandons_silently() {
        let (agg, mut rx, trigger) = aggregator();
        agg.start_waiting("r1", WaitMeta::local(), 5, Duration::from_secs(30))
            .unwrap();

        trigger.trigger();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(agg.pending(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_meta_carried_through() {
        let (agg, mut rx, _trigger) = aggregator();
        let upstream = PeerId::from_bytes([8u8; vigilmesh_protocol::PEER_ID_SIZE]);
        agg.start_waiting("r1", WaitMeta::upstream(upstream), 1, Duration::from_secs(5))
            .unwrap();
        agg.add_response("r1", 1).unwrap();

        let done = rx.recv().await.unwrap();
        assert_eq!(done.meta.responses_receiver, Some(upstream));
    }
}
