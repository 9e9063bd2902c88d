use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::message::{SyncEvent, Topic};

/// Bound on each subscriber's queue (spec §4.6 "non-blocking per-subscriber
/// queues; overflow drops with a counter increment").
const SUBSCRIBER_QUEUE_DEPTH: usize = 256;

struct Subscriber {
    tx: mpsc::Sender<SyncEvent>,
    dropped: Arc<AtomicU64>,
}

/// An in-process pub/sub broker over the `{block, tx}` topic table (spec
/// §4.6). Delivery is best-effort and non-blocking: a slow subscriber never
/// backs up a publisher, it just accumulates drops. Clone is cheap — every
/// handle shares the same subscriber table.
#[derive(Clone)]
pub struct Broker {
    subscribers: Arc<DashMap<Topic, Vec<Subscriber>>>,
}

/// A live subscription. Dropping it does not unregister — a slow/abandoned
/// subscriber is indistinguishable from one whose consumer is just behind,
/// and both are handled identically (drops accrue, no effect on publishers).
pub struct Subscription {
    pub rx: mpsc::Receiver<SyncEvent>,
    pub dropped: Arc<AtomicU64>,
}

impl Broker {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(DashMap::new()),
        }
    }

    pub fn subscribe(&self, topic: Topic) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_DEPTH);
        let dropped = Arc::new(AtomicU64::new(0));
        self.subscribers
            .entry(topic)
            .or_default()
            .push(Subscriber {
                tx,
                dropped: dropped.clone(),
            });
        Subscription { rx, dropped }
    }

    /// Deliver `event` to every subscriber of its topic. A full queue is an
    /// overflow, not an error: the event is dropped for that subscriber and
    /// its counter increments. Publishing never blocks and never fails.
    pub fn publish(&self, event: SyncEvent) {
        let topic = event.topic();
        if let Some(mut subs) = self.subscribers.get_mut(&topic) {
            subs.retain(|s| {
                match s.tx.try_send(event.clone()) {
                    Ok(()) => true,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        s.dropped.fetch_add(1, Ordering::Relaxed);
                        true
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => false,
                }
            });
        }
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.subscribers.get(&topic).map(|s| s.len()).unwrap_or(0)
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_core::block::Block;
    use meridian_core::types::{Address, BlockHash};

    fn block_event(height: u64) -> SyncEvent {
        SyncEvent::NewBlock(Block {
            parent: BlockHash::from_bytes([0; 32]),
            height,
            timestamp: 0,
            proposer: Address::from_bytes([1; 32]),
            state_root: [0; 32],
            txs: Vec::new(),
            sig: Vec::new(),
        })
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let broker = Broker::new();
        let mut sub = broker.subscribe(Topic::Block);
        broker.publish(block_event(1));
        let event = sub.rx.recv().await.unwrap();
        assert!(matches!(event, SyncEvent::NewBlock(b) if b.height == 1));
    }

    #[tokio::test]
    async fn full_queue_counts_drops_instead_of_blocking() {
        let broker = Broker::new();
        let sub = broker.subscribe(Topic::Block);
        for h in 0..(SUBSCRIBER_QUEUE_DEPTH as u64 + 5) {
            broker.publish(block_event(h));
        }
        assert!(sub.dropped.load(Ordering::Relaxed) >= 5);
    }

    #[tokio::test]
    async fn tx_topic_subscriber_does_not_see_block_events() {
        let broker = Broker::new();
        let mut sub = broker.subscribe(Topic::Tx);
        broker.publish(block_event(1));
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(sub.rx.try_recv().is_err());
    }
}
