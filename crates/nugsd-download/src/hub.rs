//! Broadcast hub - fans events out to every connected observer.
//!
//! The hub owns three control channels (register, unregister, broadcast) and
//! a set of subscriber sinks. A single dispatcher task selects over the
//! control channels; all mutation of the sink set happens there, so sink
//! closure has exactly one site.
//!
//! # Backpressure
//!
//! Everything is bounded and lossy. Publishers use non-blocking sends into
//! the broadcast queue and drop events with a warning when it is full. A sink
//! that refuses a frame lands on a "slow" list; after the scan the dispatcher
//! retries those sinks once, and evicts the ones still refusing - unless
//! every sink refused, which is treated as a transient global backpressure
//! event and evicts nobody.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use nugsd_core::{Job, ProgressUpdate, SseEvent};

/// Capacity of each subscriber sink.
const SINK_CAPACITY: usize = 500;

/// Capacity of the broadcast queue feeding the dispatcher.
const BROADCAST_CAPACITY: usize = 1000;

/// Capacity of the register/unregister control channels.
const CONTROL_CAPACITY: usize = 64;

/// Identifier assigned to a subscriber sink at registration.
pub type SubscriberId = u64;

/// Publisher handle to the hub. Cheap to clone.
#[derive(Clone)]
pub struct Hub {
    register_tx: mpsc::Sender<(SubscriberId, mpsc::Sender<Vec<u8>>)>,
    unregister_tx: mpsc::Sender<SubscriberId>,
    broadcast_tx: mpsc::Sender<Vec<u8>>,
    next_id: std::sync::Arc<std::sync::atomic::AtomicU64>,
}

/// Dispatcher half of the hub. Run it with `tokio::spawn(dispatcher.run())`.
pub struct HubDispatcher {
    register_rx: mpsc::Receiver<(SubscriberId, mpsc::Sender<Vec<u8>>)>,
    unregister_rx: mpsc::Receiver<SubscriberId>,
    broadcast_rx: mpsc::Receiver<Vec<u8>>,
    sinks: HashMap<SubscriberId, mpsc::Sender<Vec<u8>>>,
}

/// A registered subscriber. Dropping it unregisters the sink.
pub struct Subscription {
    id: SubscriberId,
    receiver: mpsc::Receiver<Vec<u8>>,
    unregister_tx: mpsc::Sender<SubscriberId>,
}

impl Subscription {
    /// Receive the next event frame. `None` once the sink is closed.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.receiver.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // Best effort: the dispatcher also drops the sink when it notices
        // the receiver is gone.
        let _ = self.unregister_tx.try_send(self.id);
    }
}

/// Create a connected hub handle and dispatcher.
#[must_use]
pub fn hub() -> (Hub, HubDispatcher) {
    let (register_tx, register_rx) = mpsc::channel(CONTROL_CAPACITY);
    let (unregister_tx, unregister_rx) = mpsc::channel(CONTROL_CAPACITY);
    let (broadcast_tx, broadcast_rx) = mpsc::channel(BROADCAST_CAPACITY);
    (
        Hub {
            register_tx,
            unregister_tx,
            broadcast_tx,
            next_id: std::sync::Arc::new(std::sync::atomic::AtomicU64::new(1)),
        },
        HubDispatcher {
            register_rx,
            unregister_rx,
            broadcast_rx,
            sinks: HashMap::new(),
        },
    )
}

impl Hub {
    /// Register a new subscriber sink.
    pub async fn subscribe(&self) -> Subscription {
        let id = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SINK_CAPACITY);
        // If the dispatcher is gone the subscription just never yields frames.
        let _ = self.register_tx.send((id, tx)).await;
        Subscription {
            id,
            receiver: rx,
            unregister_tx: self.unregister_tx.clone(),
        }
    }

    /// Broadcast a progress update to all subscribers.
    pub fn broadcast_progress_update(&self, update: &ProgressUpdate) {
        self.publish(&SseEvent::ProgressUpdate(update.clone()));
    }

    /// Broadcast a newly added job to all subscribers.
    pub fn broadcast_job_added(&self, job: &Job) {
        self.publish(&SseEvent::JobAdded(job.clone()));
    }

    /// Broadcast a job status change to all subscribers.
    pub fn broadcast_job_status_update(&self, job: &Job) {
        self.publish(&SseEvent::JobStatusUpdate(job.clone()));
    }

    fn publish(&self, event: &SseEvent) {
        let json = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(err) => {
                warn!(error = %err, "Failed to serialize SSE event");
                return;
            }
        };
        let frame = format!("event: {}\ndata: {}\n\n", event.event_name(), json).into_bytes();
        if self.broadcast_tx.try_send(frame).is_err() {
            warn!(event = event.event_name(), "Broadcast queue full, discarding event");
        }
    }
}

impl HubDispatcher {
    /// Run the dispatch loop until every hub handle is dropped.
    pub async fn run(mut self) {
        info!("Starting broadcaster");
        loop {
            tokio::select! {
                Some((id, sink)) = self.register_rx.recv() => {
                    debug!(subscriber = id, "Client registered");
                    self.sinks.insert(id, sink);
                }
                Some(id) = self.unregister_rx.recv() => {
                    if self.sinks.remove(&id).is_some() {
                        debug!(subscriber = id, "Client unregistered");
                    }
                }
                message = self.broadcast_rx.recv() => {
                    let Some(message) = message else { break };
                    self.dispatch(&message);
                }
                else => break,
            }
        }
        info!("Broadcaster stopped");
    }

    /// Send one frame to every sink, evicting persistently slow subscribers.
    fn dispatch(&mut self, message: &[u8]) {
        let total = self.sinks.len();
        if total == 0 {
            return;
        }

        let mut slow: Vec<SubscriberId> = Vec::new();
        for (&id, sink) in &self.sinks {
            if sink.try_send(message.to_vec()).is_err() {
                slow.push(id);
            }
        }

        // If every sink refused, the broadcast channel itself is overloaded;
        // evicting all observers would be worse than losing one frame.
        if slow.is_empty() || slow.len() >= total {
            return;
        }

        for id in slow {
            let refused = self
                .sinks
                .get(&id)
                .is_some_and(|sink| sink.try_send(message.to_vec()).is_err());
            if refused {
                warn!(subscriber = id, "Subscriber persistently slow, evicting");
                self.sinks.remove(&id);
            }
        }
    }
}
