use super::connection::ClientConnection;
use crate::domain::events::NotificationEvent;
use axum::extract::ws::Message;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatReport {
    pub pinged: usize,
    pub evicted: usize,
}

/// Registry of live observers with best-effort fan-out.
pub struct NotificationBus {
    connections: DashMap<Uuid, Arc<ClientConnection>>,
    queue_capacity: usize,
}

impl fmt::Debug for NotificationBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationBus")
            .field("connection_count", &self.connections.len())
            .field("queue_capacity", &self.queue_capacity)
            .finish()
    }
}

impl NotificationBus {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            connections: DashMap::new(),
            queue_capacity,
        }
    }

    /// Register a new connection
    pub fn register(&self) -> Arc<ClientConnection> {
        let connection = Arc::new(ClientConnection::new(self.queue_capacity));
        self.connections.insert(connection.id, connection.clone());
        debug!(connection = %connection.id, "observer connected");
        connection
    }

    pub fn unregister(&self, id: Uuid) {
        if let Some((_, connection)) = self.connections.remove(&id) {
            connection.close();
            debug!(connection = %id, "observer disconnected");
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Enqueue the event on every open connection. Returns how many accepted it.
    pub fn broadcast(&self, event: &NotificationEvent) -> usize {
        let json = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => {
                error!("failed to serialize event {:?}: {}", event, e);
                return 0;
            }
        };

        self.connections
            .iter()
            .filter(|entry| entry.value().enqueue(Message::Text(json.clone())))
            .count()
    }

    /// Evict connections silent since the previous cycle, ping the rest.
    pub fn heartbeat(&self) -> HeartbeatReport {
        let mut report = HeartbeatReport::default();
        let snapshot: Vec<Arc<ClientConnection>> = self
            .connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        for connection in snapshot {
            if connection.take_alive() && !connection.is_closed() {
                connection.enqueue(Message::Ping(Vec::new()));
                report.pinged += 1;
            } else {
                debug!(
                    connection = %connection.id,
                    last_activity = %connection.last_activity(),
                    "evicting unresponsive observer"
                );
                self.unregister(connection.id);
                report.evicted += 1;
            }
        }
        report
    }

    pub fn spawn_heartbeat(
        self: Arc<Self>,
        every: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let report = self.heartbeat();
                        if report.evicted > 0 {
                            info!(evicted = report.evicted, live = self.len(), "heartbeat evicted observers");
                        }
                    }
                }
            }
            debug!("heartbeat stopped");
        })
    }

    /// Close every connection, used on shutdown.
    pub fn close_all(&self) {
        let ids: Vec<Uuid> = self.connections.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            self.unregister(id);
        }
    }
}
