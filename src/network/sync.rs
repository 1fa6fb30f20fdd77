//! Route synchronization with connected nodes
//!
//! Keeps every live session's route set in line with the config store,
//! either by reacting to store change signals or by periodically diffing
//! the store against the last broadcast.

use crate::config::ConfigStore;
use crate::network::registry::{BroadcastReport, SessionRegistry};
use crate::protocol::{ProtocolError, Route, Routes};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Default interval between poll-and-diff checks
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// How route changes are noticed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// Broadcast as soon as the store signals a route mutation
    EdgeTriggered,
    /// Compare the store to the last broadcast every `interval`
    PollAndDiff { interval: Duration },
}

impl Default for SyncStrategy {
    fn default() -> Self {
        SyncStrategy::PollAndDiff {
            interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Route synchronizer
pub struct RouteSynchronizer {
    store: Arc<ConfigStore>,
    registry: Arc<SessionRegistry>,
    strategy: SyncStrategy,
}

impl RouteSynchronizer {
    pub fn new(
        store: Arc<ConfigStore>,
        registry: Arc<SessionRegistry>,
        strategy: SyncStrategy,
    ) -> Self {
        Self {
            store,
            registry,
            strategy,
        }
    }

    /// Broadcast `routes` to every live session
    pub async fn push_routes(&self, routes: &[Route]) -> Result<BroadcastReport, ProtocolError> {
        let packet = Routes::packet(routes)?;
        let report = self.registry.broadcast(packet).await;

        log::info!(
            "Sent {} routes to {} nodes ({} failed)",
            routes.len(),
            report.delivered,
            report.failed
        );
        Ok(report)
    }

    /// One poll-and-diff step.
    ///
    /// Broadcasts only when the store differs from `last` (order-sensitive)
    /// and at least one session is live; `last` is updated on broadcast.
    pub async fn poll_once(
        &self,
        last: &mut Vec<Route>,
    ) -> Result<Option<BroadcastReport>, ProtocolError> {
        if self.registry.is_empty().await {
            return Ok(None);
        }

        let current = self.store.routes().await;
        if current == *last {
            return Ok(None);
        }

        let report = self.push_routes(&current).await?;
        *last = current;
        Ok(Some(report))
    }

    /// Run until `shutdown` is cancelled
    pub async fn run(&self, shutdown: CancellationToken) {
        match self.strategy {
            SyncStrategy::EdgeTriggered => self.run_edge_triggered(shutdown).await,
            SyncStrategy::PollAndDiff { interval } => self.run_poll(interval, shutdown).await,
        }
        log::debug!("Route synchronizer stopped");
    }

    async fn run_edge_triggered(&self, shutdown: CancellationToken) {
        let mut changes = self.store.subscribe_routes();
        log::info!("Route synchronizer waiting for route changes");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                changed = changes.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }

            if self.registry.is_empty().await {
                continue;
            }

            let routes = self.store.routes().await;
            if let Err(e) = self.push_routes(&routes).await {
                log::error!("Failed to encode routes: {}", e);
            }
        }
    }

    async fn run_poll(&self, interval: Duration, shutdown: CancellationToken) {
        // nodes receive the startup route set through their hello reply
        let mut last = self.store.routes().await;
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        log::info!("Route synchronizer polling every {:?}", interval);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.poll_once(&mut last).await {
                log::error!("Failed to encode routes: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::session::{Session, OUTBOUND_CAPACITY};
    use crate::protocol::{Packet, PacketId};
    use std::net::SocketAddr;
    use tokio::sync::mpsc;

    struct Fixture {
        _temp_dir: tempfile::TempDir,
        store: Arc<ConfigStore>,
        registry: Arc<SessionRegistry>,
    }

    fn fixture() -> Fixture {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ConfigStore::open(temp_dir.path().join("config.json")).unwrap());
        Fixture {
            _temp_dir: temp_dir,
            store,
            registry: Arc::new(SessionRegistry::new()),
        }
    }

    async fn attach(registry: &SessionRegistry, port: u16) -> (Arc<Session>, mpsc::Receiver<Packet>) {
        let (session, rx) = Session::new(SocketAddr::from(([127, 0, 0, 1], port)));
        let session = Arc::new(session);
        registry.put(session.clone()).await;
        (session, rx)
    }

    fn routes_of(packet: Packet) -> Vec<Route> {
        assert!(packet.is(PacketId::Routes));
        packet.decode::<Routes>().unwrap().routes
    }

    #[tokio::test]
    async fn test_poll_skips_without_sessions() {
        let f = fixture();
        let sync = RouteSynchronizer::new(f.store.clone(), f.registry.clone(), SyncStrategy::default());
        f.store
            .add_route(Route::new("r1", "a.example.com", "h", 1))
            .await
            .unwrap();

        let mut last = Vec::new();
        assert_eq!(sync.poll_once(&mut last).await.unwrap(), None);
        assert!(last.is_empty());
    }

    #[tokio::test]
    async fn test_poll_broadcasts_only_on_change() {
        let f = fixture();
        let sync = RouteSynchronizer::new(f.store.clone(), f.registry.clone(), SyncStrategy::default());
        let (_session, mut rx) = attach(&f.registry, 1).await;

        let mut last = Vec::new();
        assert_eq!(sync.poll_once(&mut last).await.unwrap(), None);

        let route = Route::new("r1", "a.example.com", "h", 1);
        f.store.add_route(route.clone()).await.unwrap();

        let report = sync.poll_once(&mut last).await.unwrap().unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(routes_of(rx.recv().await.unwrap()), vec![route.clone()]);
        assert_eq!(last, vec![route]);

        assert_eq!(sync.poll_once(&mut last).await.unwrap(), None);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_poll_is_order_sensitive() {
        let f = fixture();
        let sync = RouteSynchronizer::new(f.store.clone(), f.registry.clone(), SyncStrategy::default());
        let (_session, mut rx) = attach(&f.registry, 1).await;

        let r1 = Route::new("r1", "a.example.com", "h", 1);
        let r2 = Route::new("r2", "b.example.com", "h", 2);
        f.store.set_routes(vec![r2.clone(), r1.clone()]).await.unwrap();

        let mut last = vec![r1.clone(), r2.clone()];
        assert!(sync.poll_once(&mut last).await.unwrap().is_some());
        assert_eq!(routes_of(rx.recv().await.unwrap()), vec![r2, r1]);
    }

    #[tokio::test]
    async fn test_dead_session_does_not_block_others() {
        let f = fixture();
        let sync = RouteSynchronizer::new(f.store.clone(), f.registry.clone(), SyncStrategy::default());
        let (dead, _dead_rx) = attach(&f.registry, 1).await;
        let (_live, mut live_rx) = attach(&f.registry, 2).await;
        dead.close();

        let route = Route::new("r1", "a.example.com", "h", 1);
        let report = sync.push_routes(&[route.clone()]).await.unwrap();

        assert_eq!(report, BroadcastReport { delivered: 1, failed: 1 });
        assert_eq!(routes_of(live_rx.recv().await.unwrap()), vec![route]);
    }

    #[tokio::test]
    async fn test_edge_triggered_pushes_on_change() {
        let f = fixture();
        let sync = Arc::new(RouteSynchronizer::new(
            f.store.clone(),
            f.registry.clone(),
            SyncStrategy::EdgeTriggered,
        ));
        let (_session, mut rx) = attach(&f.registry, 1).await;

        let shutdown = CancellationToken::new();
        let task = {
            let sync = sync.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { sync.run(shutdown).await })
        };
        tokio::task::yield_now().await;

        let route = Route::new("r1", "a.example.com", "h", 1);
        f.store.add_route(route.clone()).await.unwrap();
        let packet = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(routes_of(packet), vec![route]);

        f.store.delete_route("r1").await.unwrap();
        let packet = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(routes_of(packet).is_empty());

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_poll_loop_picks_up_change() {
        let f = fixture();
        let sync = Arc::new(RouteSynchronizer::new(
            f.store.clone(),
            f.registry.clone(),
            SyncStrategy::PollAndDiff {
                interval: Duration::from_millis(20),
            },
        ));
        let (_session, mut rx) = attach(&f.registry, 1).await;

        let shutdown = CancellationToken::new();
        let task = {
            let sync = sync.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { sync.run(shutdown).await })
        };

        // let the loop capture its baseline before mutating
        tokio::time::sleep(Duration::from_millis(50)).await;
        let route = Route::new("r1", "a.example.com", "h", 1);
        f.store.add_route(route.clone()).await.unwrap();

        let packet = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(routes_of(packet), vec![route]);

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_stalled_node_does_not_stall_polling() {
        let f = fixture();
        let registry = Arc::new(SessionRegistry::with_delivery_timeout(Duration::from_millis(50)));
        let sync = RouteSynchronizer::new(f.store.clone(), registry.clone(), SyncStrategy::default());
        let (stalled, _stalled_rx) = attach(&registry, 1).await;
        let (_healthy, mut healthy_rx) = attach(&registry, 2).await;

        // fill the stalled node's queue while the healthy one keeps up
        for _ in 0..OUTBOUND_CAPACITY {
            registry.broadcast(Packet::empty(PacketId::Pong)).await;
            assert!(healthy_rx.recv().await.unwrap().is(PacketId::Pong));
        }

        let r1 = Route::new("r1", "a.example.com", "h", 1);
        f.store.add_route(r1.clone()).await.unwrap();
        let mut last = Vec::new();
        let report = tokio::time::timeout(Duration::from_secs(2), sync.poll_once(&mut last))
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(report, BroadcastReport { delivered: 1, failed: 1 });
        assert!(stalled.is_closed());
        assert_eq!(routes_of(healthy_rx.recv().await.unwrap()), vec![r1.clone()]);

        let r2 = Route::new("r2", "b.example.com", "h", 2);
        f.store.add_route(r2.clone()).await.unwrap();
        let report = tokio::time::timeout(Duration::from_secs(2), sync.poll_once(&mut last))
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(report, BroadcastReport { delivered: 1, failed: 0 });
        assert_eq!(routes_of(healthy_rx.recv().await.unwrap()), vec![r1, r2]);
        assert_eq!(last.len(), 2);
    }
}
