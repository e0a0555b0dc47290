use std::sync::Arc;
use std::time::Duration;

use rowmesh_core::{ConnectionId, Frame, MessageType};
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::dispatcher::Dispatcher;
use crate::registry::ConnectionRegistry;

#[derive(Debug)]
pub struct HeartbeatMonitor {
    registry: Arc<ConnectionRegistry>,
    dispatcher: Arc<Dispatcher>,
    node_tag: String,
    interval: Duration,
    liveness_timeout: Duration,
    shutdown_rx: broadcast::Receiver<()>,
}

impl HeartbeatMonitor {
    #[must_use]
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        dispatcher: Arc<Dispatcher>,
        node_tag: impl Into<String>,
        interval: Duration,
        liveness_timeout: Duration,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            node_tag: node_tag.into(),
            interval,
            liveness_timeout,
            shutdown_rx,
        }
    }

    pub async fn run(mut self) {
        tracing::info!(
            interval_ms = self.interval.as_millis(),
            liveness_timeout_ms = self.liveness_timeout.as_millis(),
            "Heartbeat monitor started"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.probe().await;
                    self.check_liveness(Instant::now()).await;
                }
                _ = self.shutdown_rx.recv() => {
                    tracing::info!("Heartbeat monitor shutting down");
                    break;
                }
            }
        }
    }

    /// Sends `HEARTBEAT` to every registered connection; those that cannot be
    /// reached are evicted.
    pub async fn probe(&self) -> Vec<ConnectionId> {
        let mut evicted = Vec::new();
        for conn in self.registry.list_alive().await {
            if !conn.registered {
                continue;
            }
            let frame = Frame::empty(MessageType::Heartbeat, self.node_tag.as_str());
            if let Err(e) = self.registry.send(conn.id, frame).await {
                tracing::warn!(conn_id = %conn.id, error = %e, "Heartbeat send failed");
                if self.evict(conn.id, "heartbeat send failed").await {
                    evicted.push(conn.id);
                }
            }
        }
        evicted
    }

    /// Evicts every connection silent for longer than the liveness timeout as
    /// of `now`, even if sends to it still succeed.
    pub async fn check_liveness(&self, now: Instant) -> Vec<ConnectionId> {
        let mut evicted = Vec::new();
        for conn_id in self.registry.find_stale(now, self.liveness_timeout).await {
            if self.evict(conn_id, "liveness timeout").await {
                evicted.push(conn_id);
            }
        }
        evicted
    }

    async fn evict(&self, conn_id: ConnectionId, reason: &str) -> bool {
        if !self.registry.mark_dead(conn_id).await {
            return false;
        }
        let requeued = self.dispatcher.on_connection_lost(conn_id).await;
        self.registry.remove(conn_id).await;
        tracing::warn!(%conn_id, reason, requeued = requeued.len(), "Connection evicted");
        true
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use rowmesh_core::{JobDescriptor, Matrix};
    use std::net::SocketAddr;
    use tokio::sync::mpsc;

    struct Harness {
        registry: Arc<ConnectionRegistry>,
        dispatcher: Arc<Dispatcher>,
        shutdown_tx: broadcast::Sender<()>,
        monitor: HeartbeatMonitor,
    }

    fn harness(interval: Duration, liveness: Duration) -> Harness {
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&registry), "coordinator"));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let monitor = HeartbeatMonitor::new(
            Arc::clone(&registry),
            Arc::clone(&dispatcher),
            "coordinator",
            interval,
            liveness,
            shutdown_rx,
        );
        Harness {
            registry,
            dispatcher,
            shutdown_tx,
            monitor,
        }
    }

    async fn worker(registry: &ConnectionRegistry) -> (ConnectionId, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = registry
            .accept(SocketAddr::from(([127, 0, 0, 1], 0)), tx)
            .await;
        registry.register(id, "worker").await.expect("register");
        (id, rx)
    }

    #[tokio::test]
    async fn probe_sends_heartbeats_to_registered_only() {
        let h = harness(Duration::from_secs(5), Duration::from_secs(10));
        let (_id, mut rx) = worker(&h.registry).await;
        let (tx, mut unregistered_rx) = mpsc::unbounded_channel();
        h.registry
            .accept(SocketAddr::from(([127, 0, 0, 1], 0)), tx)
            .await;

        assert!(h.monitor.probe().await.is_empty());
        let frame = rx.try_recv().expect("heartbeat queued");
        assert_eq!(frame.message_type, MessageType::Heartbeat);
        assert_eq!(frame.sender, "coordinator");
        assert!(unregistered_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn failed_probe_evicts_and_requeues() {
        let h = harness(Duration::from_secs(5), Duration::from_secs(10));
        let (id, rx) = worker(&h.registry).await;
        h.dispatcher
            .create_job(JobDescriptor::square(Matrix::identity(2)))
            .await
            .expect("create");
        h.dispatcher.assign_next().await.expect("assigned");
        drop(rx);

        assert_eq!(h.monitor.probe().await, vec![id]);
        assert!(h.registry.get(id).await.is_none());
        let snapshot = h.dispatcher.snapshot().await[0];
        assert_eq!((snapshot.pending, snapshot.in_flight), (2, 0));
    }

    #[tokio::test]
    async fn silent_connection_is_evicted_even_if_sends_succeed() {
        let h = harness(Duration::from_secs(5), Duration::from_secs(10));
        let (quiet, _quiet_rx) = worker(&h.registry).await;
        h.dispatcher
            .create_job(JobDescriptor::square(Matrix::identity(2)))
            .await
            .expect("create");
        h.dispatcher.assign_next().await.expect("assigned");

        assert!(h.monitor.check_liveness(Instant::now()).await.is_empty());

        let later = Instant::now() + Duration::from_secs(11);
        assert_eq!(h.monitor.check_liveness(later).await, vec![quiet]);
        assert!(h.monitor.check_liveness(later).await.is_empty());
        assert_eq!(h.dispatcher.snapshot().await[0].in_flight, 0);
    }

    #[tokio::test]
    async fn touched_connection_survives() {
        let h = harness(Duration::from_millis(20), Duration::from_millis(60));
        let (id, _rx) = worker(&h.registry).await;

        for _ in 0..6 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            assert!(h.registry.touch(id).await);
            assert!(h.monitor.check_liveness(Instant::now()).await.is_empty());
        }
    }

    #[tokio::test]
    async fn monitor_shutdown() {
        let h = harness(Duration::from_millis(10), Duration::from_millis(100));
        let handle = tokio::spawn(h.monitor.run());

        tokio::time::sleep(Duration::from_millis(30)).await;
        h.shutdown_tx.send(()).ok();

        let result = tokio::time::timeout(Duration::from_millis(200), handle).await;
        assert!(result.is_ok());
    }
}
