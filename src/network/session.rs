//! Live node sessions
//!
//! A session owns the write half of its channel through a dedicated writer
//! task fed by a bounded queue, so broadcasts and request/response replies
//! are written strictly in order without sharing the socket. The receive
//! loop owns the read half.

use crate::config::ConfigStore;
use crate::crypto::KeyPair;
use crate::network::channel::{PacketStream, SecureChannel};
use crate::network::registry::SessionRegistry;
use crate::protocol::{NodeMessage, Packet, PacketId, ProtocolError, Routes};
use futures::sink::SinkExt;
use futures::stream::StreamExt;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

/// Packets queued per session before senders wait
pub const OUTBOUND_CAPACITY: usize = 100;

/// Longest a fan-out send waits on a full queue before giving up on the node
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest the writer spends flushing on teardown
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Session errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Channel closed")]
    ChannelClosed,
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("No packet received for {0:?}")]
    Timeout(Duration),
    #[error("Outbound queue stayed full for {0:?}")]
    Backpressure(Duration),
    #[error("Delivery to {addr} failed: {reason}")]
    BroadcastDeliveryFailed { addr: SocketAddr, reason: String },
}

/// Identity a node reported in its hello
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    pub key: String,
    pub version: String,
    pub arch: Option<String>,
}

/// Summary of a session for the control surface
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub address: String,
    pub key: Option<String>,
    pub version: Option<String>,
    pub arch: Option<String>,
    pub connected_secs: u64,
    pub idle_secs: u64,
}

/// One connected, handshaken node
pub struct Session {
    addr: SocketAddr,
    outbound: mpsc::Sender<Packet>,
    identity: RwLock<Option<NodeIdentity>>,
    connected_at: Instant,
    last_seen: RwLock<Instant>,
    closed: CancellationToken,
}

impl Session {
    /// Create a session and the receiving end of its outbound queue
    pub fn new(addr: SocketAddr) -> (Self, mpsc::Receiver<Packet>) {
        let (outbound, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let now = Instant::now();
        let session = Self {
            addr,
            outbound,
            identity: RwLock::new(None),
            connected_at: now,
            last_seen: RwLock::new(now),
            closed: CancellationToken::new(),
        };
        (session, rx)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Queue a packet for this node
    pub async fn send(&self, packet: Packet) -> Result<(), SessionError> {
        if self.closed.is_cancelled() {
            return Err(SessionError::ChannelClosed);
        }

        tokio::select! {
            _ = self.closed.cancelled() => Err(SessionError::ChannelClosed),
            sent = self.outbound.send(packet) => sent.map_err(|_| SessionError::ChannelClosed),
        }
    }

    /// Queue a packet, closing the session if its queue stays full for `limit`.
    ///
    /// Used by fan-out paths so a node that stopped reading cannot hold up
    /// delivery to everyone else.
    pub async fn deliver(&self, packet: Packet, limit: Duration) -> Result<(), SessionError> {
        match tokio::time::timeout(limit, self.send(packet)).await {
            Ok(sent) => sent,
            Err(_) => {
                log::warn!("Node {} is not keeping up, closing session", self.addr);
                self.close();
                Err(SessionError::Backpressure(limit))
            }
        }
    }

    /// Close the session; unblocks the receive loop and the writer
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the session is closed
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    pub async fn identity(&self) -> Option<NodeIdentity> {
        self.identity.read().await.clone()
    }

    pub async fn set_identity(&self, identity: NodeIdentity) {
        *self.identity.write().await = Some(identity);
    }

    pub async fn touch(&self) {
        *self.last_seen.write().await = Instant::now();
    }

    pub async fn idle_for(&self) -> Duration {
        self.last_seen.read().await.elapsed()
    }

    pub async fn info(&self) -> SessionInfo {
        let identity = self.identity().await;
        SessionInfo {
            address: self.addr.to_string(),
            key: identity.as_ref().map(|i| i.key.clone()),
            version: identity.as_ref().map(|i| i.version.clone()),
            arch: identity.and_then(|i| i.arch),
            connected_secs: self.connected_at.elapsed().as_secs(),
            idle_secs: self.idle_for().await.as_secs(),
        }
    }
}

/// Shared state every connection handler needs
pub struct SessionContext {
    pub keys: Arc<KeyPair>,
    pub store: Arc<ConfigStore>,
    pub registry: Arc<SessionRegistry>,
    /// Longest wait for the next packet, `None` waits forever
    pub read_timeout: Option<Duration>,
}

/// Run a handshaken channel until the node goes away.
///
/// Registers the session, serves requests, and on exit removes it from the
/// registry and closes it.
pub async fn serve<S>(
    channel: SecureChannel<S>,
    addr: SocketAddr,
    ctx: &SessionContext,
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (session, mut outbound) = Session::new(addr);
    let session = Arc::new(session);
    let (mut sink, mut stream) = channel.split();

    ctx.registry.put(session.clone()).await;

    let writer_session = session.clone();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = writer_session.closed() => break,
                next = outbound.recv() => match next {
                    Some(packet) => {
                        // a peer that stopped reading must not pin the writer past close
                        let written = tokio::select! {
                            _ = writer_session.closed() => break,
                            written = sink.send(packet) => written,
                        };
                        if let Err(e) = written {
                            log::debug!("Write to {} failed: {}", writer_session.addr(), e);
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
        writer_session.close();
        let _ = tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await;
    });

    let result = receive_loop(&session, &mut stream, ctx).await;

    ctx.registry.remove(&session).await;
    session.close();
    let _ = writer.await;

    result
}

async fn receive_loop<S>(
    session: &Session,
    stream: &mut PacketStream<S>,
    ctx: &SessionContext,
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let next = tokio::select! {
            _ = session.closed() => return Ok(()),
            next = read_next(stream, ctx.read_timeout) => next?,
        };

        let packet = match next {
            Some(packet) => packet,
            None => {
                log::info!("Node {} disconnected", session.addr());
                return Ok(());
            }
        };

        session.touch().await;

        match NodeMessage::parse(&packet) {
            Ok(message) => handle_message(session, message, ctx).await?,
            Err(e) => log::warn!(
                "Dropping malformed {} packet from {}: {}",
                packet.type_name(),
                session.addr(),
                e
            ),
        }
    }
}

async fn read_next<S>(
    stream: &mut PacketStream<S>,
    timeout: Option<Duration>,
) -> Result<Option<Packet>, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let next = match timeout {
        Some(limit) => tokio::time::timeout(limit, stream.next())
            .await
            .map_err(|_| SessionError::Timeout(limit))?,
        None => stream.next().await,
    };

    next.transpose().map_err(SessionError::from)
}

async fn handle_message(
    session: &Session,
    message: NodeMessage,
    ctx: &SessionContext,
) -> Result<(), SessionError> {
    match message {
        NodeMessage::Hello(hello) => {
            log::info!(
                "Node {} connected from {} with version {}",
                hello.key,
                session.addr(),
                hello.version
            );

            session
                .set_identity(NodeIdentity {
                    key: hello.key.clone(),
                    version: hello.version.clone(),
                    arch: hello.arch.clone(),
                })
                .await;
            check_registration(&hello, ctx).await;

            let routes = ctx.store.routes().await;
            session.send(Routes::packet(&routes)?).await?;
        }

        NodeMessage::Ping => {
            session.send(Packet::empty(PacketId::Pong)).await?;
        }

        NodeMessage::Unhandled { id } => {
            log::debug!("Ignoring packet {} from {}", id, session.addr());
        }
    }

    Ok(())
}

/// Refresh the registered node's timestamp and flag stale builds
async fn check_registration(hello: &crate::protocol::Hello, ctx: &SessionContext) {
    match ctx.store.node(&hello.key).await {
        Some(node) if hello.passphrase.as_deref() == Some(node.passphrase.as_str()) => {
            let now = chrono::Utc::now().timestamp();
            if let Err(e) = ctx.store.touch_node(&node.id, now).await {
                log::warn!("Failed to record connection for {}: {}", node.id, e);
            }
        }
        Some(_) => log::warn!("Node {} presented a wrong passphrase", hello.key),
        None => log::debug!("Node {} is not registered", hello.key),
    }

    if let (Some(arch), Some(hash)) = (&hello.arch, &hello.hash) {
        if let Some(expected) = ctx.store.current_node_hash(arch).await {
            if !expected.eq_ignore_ascii_case(&hex::encode(hash)) {
                log::warn!("Node {} runs an outdated {} build", hello.key, arch);
            }
        }
    }
}
