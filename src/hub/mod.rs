//! Single fan-out point shared by the loader, watcher, session manager, and
//! simulators (§4.1). One reader loop owns the subscriber registry;
//! producers never block: a full subscriber queue gets that subscriber
//! evicted, and a full hub inbound queue drops the message at the producer.

mod message;

pub use message::{HubEventKind, HubMessage};

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{trace, warn};

enum Control {
    Subscribe {
        id: u64,
        tx: mpsc::Sender<Arc<HubMessage>>,
    },
    Unsubscribe {
        id: u64,
    },
    Broadcast(Arc<HubMessage>),
}

/// Handle to the broadcast hub. Cheap to clone; all clones share the same
/// actor task and subscriber registry.
#[derive(Clone)]
pub struct Hub {
    control_tx: mpsc::Sender<Control>,
    next_id: Arc<AtomicU64>,
    live_count: Arc<RwLock<usize>>,
    subscriber_queue_depth: usize,
}

/// A live subscription. Drop unsubscribes best-effort.
pub struct Subscriber {
    id: u64,
    rx: mpsc::Receiver<Arc<HubMessage>>,
    control_tx: mpsc::Sender<Control>,
}

impl Subscriber {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Await the next message. Returns `None` once the hub itself is gone.
    pub async fn recv(&mut self) -> Option<Arc<HubMessage>> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Result<Arc<HubMessage>, mpsc::error::TryRecvError> {
        self.rx.try_recv()
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        let _ = self.control_tx.try_send(Control::Unsubscribe { id: self.id });
    }
}

impl Hub {
    /// Spawns the reader-loop task and returns a handle to it.
    pub fn new(inbound_queue: usize, subscriber_queue: usize) -> Self {
        let (control_tx, control_rx) = mpsc::channel(inbound_queue);
        let live_count = Arc::new(RwLock::new(0usize));

        tokio::spawn(Self::run(control_rx, live_count.clone()));

        Self {
            control_tx,
            next_id: Arc::new(AtomicU64::new(1)),
            live_count,
            subscriber_queue_depth: subscriber_queue,
        }
    }

    async fn run(mut control_rx: mpsc::Receiver<Control>, live_count: Arc<RwLock<usize>>) {
        let mut subscribers: HashMap<u64, mpsc::Sender<Arc<HubMessage>>> = HashMap::new();

        while let Some(ctrl) = control_rx.recv().await {
            match ctrl {
                Control::Subscribe { id, tx } => {
                    subscribers.insert(id, tx);
                    *live_count.write() = subscribers.len();
                }
                Control::Unsubscribe { id } => {
                    subscribers.remove(&id);
                    *live_count.write() = subscribers.len();
                }
                Control::Broadcast(msg) => {
                    let mut evicted = Vec::new();
                    for (id, tx) in subscribers.iter() {
                        if let Err(mpsc::error::TrySendError::Full(_))
                        | Err(mpsc::error::TrySendError::Closed(_)) = tx.try_send(msg.clone())
                        {
                            evicted.push(*id);
                        }
                    }
                    if !evicted.is_empty() {
                        for id in &evicted {
                            subscribers.remove(id);
                        }
                        *live_count.write() = subscribers.len();
                        trace!(count = evicted.len(), "hub: evicted slow subscribers");
                    }
                }
            }
        }
    }

    /// Register a new subscriber with its own bounded outbound queue.
    pub fn subscribe(&self) -> Subscriber {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.subscriber_queue_depth);
        // Best-effort: if the hub's inbound queue is momentarily full this subscribe
        // is dropped and the caller gets a receiver that will simply never see
        // anything, consistent with producers never blocking here either.
        let _ = self.control_tx.try_send(Control::Subscribe { id, tx });
        Subscriber {
            id,
            rx,
            control_tx: self.control_tx.clone(),
        }
    }

    /// Non-blocking publish. Drops the message (and logs) if the hub's own
    /// inbound queue is full; callers must tolerate lossy delivery.
    pub fn broadcast(&self, msg: HubMessage) {
        let msg = Arc::new(msg);
        if self.control_tx.try_send(Control::Broadcast(msg)).is_err() {
            warn!("hub: inbound queue full, dropping broadcast");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        *self.live_count.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn msg(kind: HubEventKind) -> HubMessage {
        HubMessage::new(kind, None, json!({}))
    }

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = Hub::new(16, 4);
        let mut sub = hub.subscribe();
        tokio::task::yield_now().await;
        hub.broadcast(msg(HubEventKind::WatcherEnabled));
        let got = sub.recv().await.unwrap();
        assert_eq!(got.kind, HubEventKind::WatcherEnabled);
    }

    #[tokio::test]
    async fn slow_subscriber_is_evicted_not_blocked() {
        let hub = Hub::new(16, 1);
        let mut slow = hub.subscribe();
        tokio::task::yield_now().await;

        // Fill the slow subscriber's single-slot queue, then push past it.
        for _ in 0..5 {
            hub.broadcast(msg(HubEventKind::LoadingProgress));
            tokio::task::yield_now().await;
        }

        assert_eq!(hub.subscriber_count(), 0, "slow subscriber should be evicted");
        // It still has at most one buffered message, but no more arrive.
        let _ = slow.try_recv();
        assert!(slow.recv().await.is_none() || slow.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribe_on_drop_is_idempotent() {
        let hub = Hub::new(16, 4);
        let sub = hub.subscribe();
        tokio::task::yield_now().await;
        assert_eq!(hub.subscriber_count(), 1);
        drop(sub);
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert_eq!(hub.subscriber_count(), 0);
    }
}
