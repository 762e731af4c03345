//! One relay worker per origin channel.
//!
//! Messages from the same channel are relayed strictly in arrival order, so
//! copies never overtake each other on any origin to destination edge.
//! Different channels relay concurrently.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    dashmap::DashMap,
    relaybot_common::{ChannelId, InboundMessage},
    relaybot_relay::Dispatcher,
    tokio::{sync::mpsc, task::JoinHandle},
    tracing::{debug, warn},
};

/// How long a lane may sit without messages before its worker exits.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

struct Lane {
    id: u64,
    tx: mpsc::UnboundedSender<InboundMessage>,
    worker: JoinHandle<()>,
}

type LaneMap = Arc<DashMap<ChannelId, Lane>>;

pub struct RelayLanes {
    dispatcher: Arc<Dispatcher>,
    lanes: LaneMap,
    next_id: AtomicU64,
    idle_timeout: Duration,
}

impl RelayLanes {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            lanes: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Queue `message` behind earlier messages from the same channel.
    ///
    /// Channels with nowhere to relay to get no lane; a message arriving
    /// while a lane is open always joins it.
    pub async fn submit(&self, message: InboundMessage) {
        let origin = message.channel_id.clone();
        if !self.lanes.contains_key(&origin) && !self.dispatcher.has_routes(&origin).await {
            return;
        }
        let mut lane = self
            .lanes
            .entry(origin.clone())
            .or_insert_with(|| self.spawn_lane(&origin));
        if let Err(mpsc::error::SendError(message)) = lane.tx.send(message) {
            // The worker died; start over with a fresh one.
            *lane = self.spawn_lane(&origin);
            let _ = lane.tx.send(message);
        }
    }

    fn spawn_lane(&self, origin: &ChannelId) -> Lane {
        let (tx, mut rx) = mpsc::unbounded_channel::<InboundMessage>();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let dispatcher = Arc::clone(&self.dispatcher);
        let lanes = Arc::clone(&self.lanes);
        let idle_timeout = self.idle_timeout;
        let origin = origin.clone();
        debug!(%origin, "opening relay lane");
        let worker = tokio::spawn(async move {
            loop {
                let message = match tokio::time::timeout(idle_timeout, rx.recv()).await {
                    Ok(Some(message)) => message,
                    Ok(None) => break,
                    Err(_) => {
                        // Senders only push while holding the map entry, so
                        // an empty queue seen under `remove_if` stays empty.
                        let closed = lanes
                            .remove_if(&origin, |_, lane| lane.id == id && rx.is_empty())
                            .is_some();
                        if closed {
                            debug!(%origin, "closing idle relay lane");
                            break;
                        }
                        continue;
                    },
                };
                match dispatcher.relay(&message).await {
                    Ok(0) => {},
                    Ok(delivered) => debug!(%origin, delivered, "relayed"),
                    Err(e) => warn!(%origin, error = %e, "relay failed"),
                }
            }
        });
        Lane { id, tx, worker }
    }

    pub fn len(&self) -> usize {
        self.lanes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }

    /// Stop accepting messages and wait for queued ones to finish.
    pub async fn close(&self) {
        let origins: Vec<ChannelId> = self.lanes.iter().map(|e| e.key().clone()).collect();
        let mut workers = Vec::with_capacity(origins.len());
        for origin in origins {
            if let Some((_, lane)) = self.lanes.remove(&origin) {
                drop(lane.tx);
                workers.push(lane.worker);
            }
        }
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "relay lane ended abnormally");
            }
        }
    }
}
