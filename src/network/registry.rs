//! Registry of live node sessions
//!
//! Tracks every handshaken session and fans packets out to them.

use crate::network::session::{Session, SessionError, SessionInfo, DELIVERY_TIMEOUT};
use crate::protocol::Packet;
use futures::future::join_all;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Outcome of a broadcast
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

/// All sessions currently connected, keyed by remote address
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SocketAddr, Arc<Session>>>,
    delivery_timeout: Duration,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::with_delivery_timeout(DELIVERY_TIMEOUT)
    }

    /// Registry whose fan-out gives up on a node after `delivery_timeout`
    pub fn with_delivery_timeout(delivery_timeout: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            delivery_timeout,
        }
    }

    pub fn delivery_timeout(&self) -> Duration {
        self.delivery_timeout
    }

    /// Add a session, closing whatever was registered under the same address
    pub async fn put(&self, session: Arc<Session>) {
        let mut sessions = self.sessions.write().await;
        let addr = session.addr();

        if let Some(previous) = sessions.insert(addr, session) {
            log::warn!("Replacing stale session for {}", addr);
            previous.close();
        }

        log::info!("Added session: {} ({} live)", addr, sessions.len());
    }

    /// Remove and close `session`; a newer session under the same address is left alone
    pub async fn remove(&self, session: &Arc<Session>) -> bool {
        let mut sessions = self.sessions.write().await;
        let addr = session.addr();

        let current = sessions
            .get(&addr)
            .is_some_and(|registered| Arc::ptr_eq(registered, session));
        if current {
            sessions.remove(&addr);
            log::info!("Removed session: {}", addr);
        }
        session.close();
        current
    }

    pub async fn get(&self, addr: &SocketAddr) -> Option<Arc<Session>> {
        self.sessions.read().await.get(addr).cloned()
    }

    /// Point-in-time copy of the live sessions
    pub async fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions.read().await.values().cloned().collect()
    }

    pub async fn infos(&self) -> Vec<SessionInfo> {
        let mut infos = Vec::new();
        for session in self.snapshot().await {
            infos.push(session.info().await);
        }
        infos.sort_by(|a, b| a.address.cmp(&b.address));
        infos
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Send a packet to one session
    pub async fn send_to(&self, addr: &SocketAddr, packet: Packet) -> Result<(), SessionError> {
        match self.get(addr).await {
            Some(session) => session.send(packet).await,
            None => Err(SessionError::ChannelClosed),
        }
    }

    /// Send `packet` to every live session.
    ///
    /// Sends run concurrently, each bounded by the delivery timeout. A failed
    /// session is logged, counted and dropped from the registry without
    /// affecting delivery to the others.
    pub async fn broadcast(&self, packet: Packet) -> BroadcastReport {
        let sessions = self.snapshot().await;
        let limit = self.delivery_timeout;

        let sends = sessions.iter().map(|session| {
            let packet = packet.clone();
            async move {
                session
                    .deliver(packet, limit)
                    .await
                    .map_err(|e| SessionError::BroadcastDeliveryFailed {
                        addr: session.addr(),
                        reason: e.to_string(),
                    })
            }
        });

        let mut report = BroadcastReport::default();
        for (session, result) in sessions.iter().zip(join_all(sends).await) {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    log::warn!("{}", e);
                    report.failed += 1;
                    self.remove(session).await;
                }
            }
        }
        report
    }

    /// Close and forget every session
    pub async fn close_all(&self) {
        let mut sessions = self.sessions.write().await;
        for session in sessions.values() {
            session.close();
        }
        let closed = sessions.len();
        sessions.clear();
        if closed > 0 {
            log::info!("Closed {} sessions", closed);
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
