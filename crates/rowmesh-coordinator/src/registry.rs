use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rowmesh_core::{ConnectionId, CoordError, Frame};
use tokio::sync::{RwLock, mpsc, watch};
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub remote_addr: SocketAddr,
    pub worker_name: Option<String>,
    pub registered: bool,
    pub alive: bool,
    pub last_live_at: Instant,
}

impl ConnectionInfo {
    #[must_use]
    pub const fn is_dispatchable(&self) -> bool {
        self.alive && self.registered
    }
}

struct ConnectionRecord {
    info: ConnectionInfo,
    outbound: mpsc::UnboundedSender<Frame>,
}

/// Every accepted session, keyed by an id that is never reused.
///
/// The registry never calls into the dispatcher, so it can be used while the
/// dispatch lock is held.
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    connections: RwLock<BTreeMap<ConnectionId, ConnectionRecord>>,
    registered: watch::Sender<usize>,
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("next_id", &self.next_id)
            .field("connections", &"...")
            .field("registered", &*self.registered.borrow())
            .finish()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        let (registered, _) = watch::channel(0);
        Self {
            next_id: AtomicU64::new(1),
            connections: RwLock::new(BTreeMap::new()),
            registered,
        }
    }

    pub async fn accept(
        &self,
        remote_addr: SocketAddr,
        outbound: mpsc::UnboundedSender<Frame>,
    ) -> ConnectionId {
        let id = ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let record = ConnectionRecord {
            info: ConnectionInfo {
                id,
                remote_addr,
                worker_name: None,
                registered: false,
                alive: true,
                last_live_at: Instant::now(),
            },
            outbound,
        };
        self.connections.write().await.insert(id, record);
        tracing::debug!(conn_id = %id, %remote_addr, "Connection accepted");
        id
    }

    #[allow(clippy::significant_drop_tightening)]
    pub async fn register(&self, id: ConnectionId, worker_name: &str) -> Result<(), CoordError> {
        {
            let mut connections = self.connections.write().await;
            let record = connections
                .get_mut(&id)
                .ok_or(CoordError::ConnectionNotFound(id))?;

            if !record.info.alive {
                return Err(CoordError::ConnectionClosed(id));
            }
            if record.info.registered {
                return Err(CoordError::AlreadyRegistered(id));
            }

            record.info.registered = true;
            record.info.worker_name = Some(worker_name.to_string());
            record.info.last_live_at = Instant::now();
            self.publish_count(&connections);
        }

        tracing::info!(conn_id = %id, worker = worker_name, "Worker registered");
        Ok(())
    }

    pub async fn touch(&self, id: ConnectionId) -> bool {
        let mut connections = self.connections.write().await;
        match connections.get_mut(&id) {
            Some(record) if record.info.alive => {
                record.info.last_live_at = Instant::now();
                true
            }
            _ => false,
        }
    }

    /// Returns `true` only for the call that flips the connection to dead.
    pub async fn mark_dead(&self, id: ConnectionId) -> bool {
        let mut connections = self.connections.write().await;
        let Some(record) = connections.get_mut(&id) else {
            return false;
        };
        if !record.info.alive {
            return false;
        }
        record.info.alive = false;
        self.publish_count(&connections);
        drop(connections);

        tracing::debug!(conn_id = %id, "Connection marked dead");
        true
    }

    pub async fn remove(&self, id: ConnectionId) -> Option<ConnectionInfo> {
        let mut connections = self.connections.write().await;
        let removed = connections.remove(&id).map(|record| record.info);
        if removed.is_some() {
            self.publish_count(&connections);
        }
        removed
    }

    pub async fn get(&self, id: ConnectionId) -> Option<ConnectionInfo> {
        self.connections
            .read()
            .await
            .get(&id)
            .map(|record| record.info.clone())
    }

    pub async fn list_alive(&self) -> Vec<ConnectionInfo> {
        self.connections
            .read()
            .await
            .values()
            .filter(|record| record.info.alive)
            .map(|record| record.info.clone())
            .collect()
    }

    pub async fn find_stale(&self, now: Instant, timeout: Duration) -> Vec<ConnectionId> {
        self.connections
            .read()
            .await
            .values()
            .filter(|record| {
                record.info.alive && now.saturating_duration_since(record.info.last_live_at) > timeout
            })
            .map(|record| record.info.id)
            .collect()
    }

    pub async fn send(&self, id: ConnectionId, frame: Frame) -> Result<(), CoordError> {
        let connections = self.connections.read().await;
        let record = connections
            .get(&id)
            .ok_or(CoordError::ConnectionNotFound(id))?;
        if !record.info.alive {
            return Err(CoordError::ConnectionClosed(id));
        }
        record
            .outbound
            .send(frame)
            .map_err(|_| CoordError::ConnectionClosed(id))
    }

    #[must_use]
    pub fn registered_count(&self) -> usize {
        *self.registered.borrow()
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Waits until at least `target` connections are registered or `wait`
    /// elapses, and returns the count at that point.
    pub async fn wait_for_registered(&self, target: usize, wait: Duration) -> usize {
        let mut rx = self.registered.subscribe();
        if tokio::time::timeout(wait, rx.wait_for(|count| *count >= target))
            .await
            .is_err()
        {
            tracing::debug!(target, waited = ?wait, "Timed out waiting for workers");
        }
        self.registered_count()
    }

    /// Drops every entry. Outbound handles close, which ends their writers.
    pub async fn clear(&self) {
        let mut connections = self.connections.write().await;
        let dropped = connections.len();
        connections.clear();
        self.publish_count(&connections);
        drop(connections);

        if dropped > 0 {
            tracing::debug!(dropped, "Connection registry cleared");
        }
    }

    fn publish_count(&self, connections: &BTreeMap<ConnectionId, ConnectionRecord>) {
        let count = connections
            .values()
            .filter(|record| record.info.is_dispatchable())
            .count();
        self.registered.send_if_modified(|current| {
            if *current == count {
                false
            } else {
                *current = count;
                true
            }
        });
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use rowmesh_core::MessageType;
    use std::sync::Arc;

    fn addr() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 40000))
    }

    async fn accepted(
        registry: &ConnectionRegistry,
    ) -> (ConnectionId, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (registry.accept(addr(), tx).await, rx)
    }

    #[tokio::test]
    async fn ids_increase_and_are_not_reused() {
        let registry = ConnectionRegistry::new();
        let (a, _ra) = accepted(&registry).await;
        let (b, _rb) = accepted(&registry).await;
        assert!(b > a);

        registry.remove(b).await;
        let (c, _rc) = accepted(&registry).await;
        assert!(c > b);
    }

    #[tokio::test]
    async fn register_lifecycle() {
        let registry = ConnectionRegistry::new();
        let (id, _rx) = accepted(&registry).await;

        let info = registry.get(id).await.expect("connection exists");
        assert!(info.alive);
        assert!(!info.registered);
        assert_eq!(registry.registered_count(), 0);

        registry.register(id, "worker-1").await.expect("register");
        assert_eq!(registry.registered_count(), 1);
        let info = registry.get(id).await.expect("connection exists");
        assert_eq!(info.worker_name.as_deref(), Some("worker-1"));

        assert!(matches!(
            registry.register(id, "worker-1").await,
            Err(CoordError::AlreadyRegistered(_))
        ));
        assert!(matches!(
            registry.register(ConnectionId::new(999), "ghost").await,
            Err(CoordError::ConnectionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn mark_dead_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (id, _rx) = accepted(&registry).await;
        registry.register(id, "w").await.expect("register");

        assert!(registry.mark_dead(id).await);
        assert!(!registry.mark_dead(id).await);
        assert_eq!(registry.registered_count(), 0);
        assert!(!registry.touch(id).await);
        assert!(registry.list_alive().await.is_empty());
        assert!(!registry.mark_dead(ConnectionId::new(42)).await);
    }

    #[tokio::test]
    async fn send_reaches_outbound_queue() {
        let registry = ConnectionRegistry::new();
        let (id, mut rx) = accepted(&registry).await;

        registry
            .send(id, Frame::empty(MessageType::Heartbeat, "coordinator"))
            .await
            .expect("send");
        let frame = rx.recv().await.expect("frame queued");
        assert_eq!(frame.message_type, MessageType::Heartbeat);

        drop(rx);
        assert!(matches!(
            registry
                .send(id, Frame::empty(MessageType::Heartbeat, "coordinator"))
                .await,
            Err(CoordError::ConnectionClosed(_))
        ));
        assert!(matches!(
            registry
                .send(ConnectionId::new(77), Frame::empty(MessageType::Heartbeat, "c"))
                .await,
            Err(CoordError::ConnectionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn list_alive_is_ordered() {
        let registry = ConnectionRegistry::new();
        let mut receivers = Vec::new();
        let mut ids = Vec::new();
        for _ in 0..4 {
            let (id, rx) = accepted(&registry).await;
            ids.push(id);
            receivers.push(rx);
        }
        registry.mark_dead(ids[1]).await;

        let alive: Vec<_> = registry.list_alive().await.into_iter().map(|c| c.id).collect();
        assert_eq!(alive, vec![ids[0], ids[2], ids[3]]);
    }

    #[tokio::test]
    async fn find_stale_uses_last_live_at() {
        let registry = ConnectionRegistry::new();
        let (id, _rx) = accepted(&registry).await;
        let timeout = Duration::from_secs(10);

        assert!(registry.find_stale(Instant::now(), timeout).await.is_empty());
        let later = Instant::now() + Duration::from_secs(11);
        assert_eq!(registry.find_stale(later, timeout).await, vec![id]);
    }

    #[tokio::test]
    async fn wait_for_registered_returns_early_or_at_deadline() {
        let registry = Arc::new(ConnectionRegistry::new());

        let start = Instant::now();
        assert_eq!(
            registry
                .wait_for_registered(1, Duration::from_millis(50))
                .await,
            0
        );
        assert!(start.elapsed() >= Duration::from_millis(50));

        let (id, _rx) = accepted(&registry).await;
        let waiter = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                registry
                    .wait_for_registered(1, Duration::from_secs(5))
                    .await
            })
        };
        registry.register(id, "w").await.expect("register");

        let count = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake on registration")
            .expect("waiter task");
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn clear_closes_outbound_handles() {
        let registry = ConnectionRegistry::new();
        let (id, mut rx) = accepted(&registry).await;
        registry.register(id, "w").await.expect("register");

        registry.clear().await;
        assert_eq!(registry.connection_count().await, 0);
        assert_eq!(registry.registered_count(), 0);
        assert!(rx.recv().await.is_none());
    }
}
