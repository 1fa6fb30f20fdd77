//! Secure channel over a raw byte stream
//!
//! Starts in plaintext; the handshake moves it to encrypted mode by
//! installing a [`ChannelCipher`] on the codec. Once encrypted, every frame
//! in both directions is sealed.

use crate::crypto::ChannelCipher;
use crate::network::session::SessionError;
use crate::protocol::{Packet, PacketCodec};
use futures::sink::SinkExt;
use futures::stream::{SplitSink, SplitStream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

/// Channel lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Plaintext, waiting for the shared secret
    Open,
    /// Shared secret read, cipher not installed yet
    SecretReceived,
    Encrypted,
    Closed,
}

pub type PacketSink<S> = SplitSink<Framed<S, PacketCodec>, Packet>;
pub type PacketStream<S> = SplitStream<Framed<S, PacketCodec>>;

/// Framed packet stream with handshake state
pub struct SecureChannel<S> {
    framed: Framed<S, PacketCodec>,
    state: ChannelState,
}

impl<S> SecureChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            framed: Framed::new(stream, PacketCodec::new()),
            state: ChannelState::Open,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Read one packet; a clean EOF reports [`SessionError::ChannelClosed`]
    pub async fn read_packet(&mut self) -> Result<Packet, SessionError> {
        if self.state == ChannelState::Closed {
            return Err(SessionError::ChannelClosed);
        }

        match self.framed.next().await {
            Some(Ok(packet)) => Ok(packet),
            Some(Err(e)) => {
                self.state = ChannelState::Closed;
                Err(SessionError::Protocol(e))
            }
            None => {
                self.state = ChannelState::Closed;
                Err(SessionError::ChannelClosed)
            }
        }
    }

    pub async fn write_packet(&mut self, packet: Packet) -> Result<(), SessionError> {
        if self.state == ChannelState::Closed {
            return Err(SessionError::ChannelClosed);
        }

        if let Err(e) = self.framed.send(packet).await {
            self.state = ChannelState::Closed;
            return Err(SessionError::Protocol(e));
        }
        Ok(())
    }

    pub fn mark_secret_received(&mut self) {
        if self.state == ChannelState::Open {
            self.state = ChannelState::SecretReceived;
        }
    }

    /// Switch to encrypted mode; later reads and writes go through `cipher`
    pub fn enable_encryption(&mut self, cipher: ChannelCipher) {
        self.framed.codec_mut().enable_encryption(cipher);
        self.state = ChannelState::Encrypted;
    }

    pub fn is_encrypted(&self) -> bool {
        self.state == ChannelState::Encrypted
    }

    /// Flush and shut down the write half
    pub async fn close(&mut self) {
        if self.state != ChannelState::Closed {
            let _ = SinkExt::<Packet>::close(&mut self.framed).await;
            self.state = ChannelState::Closed;
        }
    }

    /// Separate read and write halves for concurrent use
    pub fn split(self) -> (PacketSink<S>, PacketStream<S>) {
        self.framed.split()
    }
}
