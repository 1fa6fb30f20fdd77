//! Node-side client
//!
//! Connects to a master, runs the client half of the handshake and exchanges
//! packets over the encrypted channel.

use crate::network::channel::SecureChannel;
use crate::network::handshake::{self, HandshakeError};
use crate::network::session::SessionError;
use crate::protocol::{Hello, Packet, PacketId, Route, Routes};
use secp256k1::PublicKey;
use std::net::SocketAddr;
use tokio::net::TcpStream;

/// Encrypted connection to a master
pub struct NodeClient {
    channel: SecureChannel<TcpStream>,
    peer_addr: SocketAddr,
}

impl NodeClient {
    /// Connect and complete the handshake against `master_key`
    pub async fn connect(addr: SocketAddr, master_key: &PublicKey) -> Result<Self, HandshakeError> {
        let stream = TcpStream::connect(addr).await?;
        let peer_addr = stream.peer_addr()?;

        let mut channel = SecureChannel::new(stream);
        handshake::connect(&mut channel, master_key).await?;
        log::debug!("Connected to master at {}", peer_addr);

        Ok(Self { channel, peer_addr })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub async fn send(&mut self, packet: Packet) -> Result<(), SessionError> {
        self.channel.write_packet(packet).await
    }

    pub async fn recv(&mut self) -> Result<Packet, SessionError> {
        self.channel.read_packet().await
    }

    /// Wait for the next packet with the given id, skipping others
    pub async fn recv_kind(&mut self, id: PacketId) -> Result<Packet, SessionError> {
        loop {
            let packet = self.recv().await?;
            if packet.is(id) {
                return Ok(packet);
            }
            log::debug!("Skipping {} while waiting for {}", packet.type_name(), id.name());
        }
    }

    /// Identify to the master and return the route set it answers with
    pub async fn hello(&mut self, hello: &Hello) -> Result<Vec<Route>, SessionError> {
        self.send(hello.to_packet()?).await?;
        let packet = self.recv_kind(PacketId::Routes).await?;
        Ok(packet.decode::<Routes>()?.routes)
    }

    /// Round-trip a keepalive
    pub async fn ping(&mut self) -> Result<(), SessionError> {
        self.send(Packet::empty(PacketId::Ping)).await?;
        self.recv_kind(PacketId::Pong).await?;
        Ok(())
    }

    pub async fn close(mut self) {
        self.channel.close().await;
    }
}
