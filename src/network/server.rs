//! TCP acceptor and per-connection handling

use crate::network::channel::SecureChannel;
use crate::network::handshake;
use crate::network::session::{self, SessionContext, SessionError};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

/// TCP server for node connections
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Bind to an address and create the server
    pub async fn bind(addr: SocketAddr) -> Result<Self, std::io::Error> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        log::info!("Communication server listening on {}", local_addr);

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Address actually bound, useful when binding port 0
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), std::io::Error> {
        self.listener.accept().await
    }

    /// Accept connections until `shutdown`, one task per connection
    pub async fn run(self, ctx: Arc<SessionContext>, shutdown: CancellationToken) {
        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.accept() => accepted,
            };

            match accepted {
                Ok((stream, addr)) => {
                    log::debug!("Incoming connection from {}", addr);
                    let ctx = ctx.clone();
                    tokio::spawn(async move {
                        handle_connection(stream, addr, &ctx).await;
                    });
                }
                Err(e) => {
                    log::error!("Accept error: {}", e);
                }
            }
        }
        log::debug!("Communication server on {} stopped", self.local_addr);
    }
}

/// Run the handshake, then serve the session until it ends
pub async fn handle_connection(stream: TcpStream, addr: SocketAddr, ctx: &SessionContext) {
    if let Err(e) = stream.set_nodelay(true) {
        log::debug!("Could not set TCP_NODELAY for {}: {}", addr, e);
    }

    let mut channel = SecureChannel::new(stream);
    if let Err(e) = handshake::accept(&mut channel, &ctx.keys).await {
        // the peer gets no reply, only the closed socket
        log::debug!("Handshake with {} failed: {}", addr, e);
        channel.close().await;
        return;
    }
    log::debug!("Channel with {} encrypted", addr);

    match session::serve(channel, addr, ctx).await {
        Ok(()) | Err(SessionError::ChannelClosed) => {}
        Err(e) => log::warn!("Session with {} ended: {}", addr, e),
    }
}
