//! Connection handshake
//!
//! 1. Node sends a plaintext `SharedSecret` packet holding a secret sealed
//!    to the master public key.
//! 2. Master opens it, derives the channel cipher, switches to encrypted mode.
//! 3. Master sends an empty `Ready` packet, already encrypted.
//!
//! Failures close the connection without a reply.

use crate::crypto::{open_secret, seal_secret, ChannelCipher, KeyError, KeyPair, Role};
use crate::network::channel::SecureChannel;
use crate::network::session::SessionError;
use crate::protocol::{Packet, PacketId, ProtocolError};
use rand::rngs::OsRng;
use rand::RngCore;
use secp256k1::PublicKey;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use zeroize::Zeroize;

/// Length of the secret a client generates
pub const CLIENT_SECRET_LEN: usize = 32;

/// Handshake failed; every variant aborts the connection without a reply
#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error("Handshake failed: expected {expected} packet, got {got}")]
    UnexpectedPacket { expected: &'static str, got: String },
    #[error("Handshake failed: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("Handshake failed: {0}")]
    Key(#[from] KeyError),
    #[error("Handshake failed: {0}")]
    Session(#[from] SessionError),
    #[error("Handshake failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Server half: returns once the channel is encrypted and `Ready` is sent
pub async fn accept<S>(channel: &mut SecureChannel<S>, keys: &KeyPair) -> Result<(), HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let packet = channel.read_packet().await?;
    expect(&packet, PacketId::SharedSecret)?;

    let sealed: Vec<u8> = packet.decode()?;
    channel.mark_secret_received();

    let mut secret = open_secret(keys, &sealed)?;
    let cipher = ChannelCipher::derive(&secret, Role::Server);
    secret.zeroize();

    channel.enable_encryption(cipher?);
    channel.write_packet(Packet::empty(PacketId::Ready)).await?;
    Ok(())
}

/// Client half: seal a fresh secret to `master_key` and wait for `Ready`
pub async fn connect<S>(
    channel: &mut SecureChannel<S>,
    master_key: &PublicKey,
) -> Result<(), HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut secret = [0u8; CLIENT_SECRET_LEN];
    OsRng.fill_bytes(&mut secret);

    let sealed = seal_secret(master_key, &secret);
    let cipher = ChannelCipher::derive(&secret, Role::Client);
    secret.zeroize();

    let packet = Packet::encode(PacketId::SharedSecret, &sealed?)?;
    channel.write_packet(packet).await?;
    channel.enable_encryption(cipher?);

    let ready = channel.read_packet().await?;
    expect(&ready, PacketId::Ready)
}

fn expect(packet: &Packet, id: PacketId) -> Result<(), HandshakeError> {
    if packet.is(id) {
        Ok(())
    } else {
        Err(HandshakeError::UnexpectedPacket {
            expected: id.name(),
            got: packet.type_name(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::channel::ChannelState;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_handshake_then_ping() {
        let keys = KeyPair::generate();
        let master_key = keys.public_key;
        let (a, b) = tokio::io::duplex(4096);

        let server = tokio::spawn(async move {
            let mut channel = SecureChannel::new(a);
            accept(&mut channel, &keys).await.unwrap();
            assert_eq!(channel.state(), ChannelState::Encrypted);

            let ping = channel.read_packet().await.unwrap();
            assert!(ping.is(PacketId::Ping));
            channel.write_packet(Packet::empty(PacketId::Pong)).await.unwrap();
        });

        let mut client = SecureChannel::new(b);
        connect(&mut client, &master_key).await.unwrap();
        client.write_packet(Packet::empty(PacketId::Ping)).await.unwrap();
        assert!(client.read_packet().await.unwrap().is(PacketId::Pong));

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_wrong_first_packet_is_rejected() {
        let keys = KeyPair::generate();
        let (a, b) = tokio::io::duplex(4096);

        let mut client = SecureChannel::new(b);
        client
            .write_packet(Packet::empty(PacketId::Hello))
            .await
            .unwrap();

        let mut server = SecureChannel::new(a);
        let err = accept(&mut server, &keys).await.unwrap_err();
        assert!(matches!(err, HandshakeError::UnexpectedPacket { .. }));
        assert!(err.to_string().starts_with("Handshake failed"));
    }

    #[tokio::test]
    async fn test_secret_for_other_key_is_rejected() {
        let keys = KeyPair::generate();
        let stranger = KeyPair::generate();
        let (a, b) = tokio::io::duplex(4096);

        let client = tokio::spawn(async move {
            let mut channel = SecureChannel::new(b);
            let _ = connect(&mut channel, &stranger.public_key).await;
        });

        let mut server = SecureChannel::new(a);
        assert!(matches!(
            accept(&mut server, &keys).await,
            Err(HandshakeError::Key(_))
        ));
        // nothing is written back on failure
        drop(server);
        client.await.unwrap();
    }

    #[tokio::test]
    async fn test_undecodable_secret_is_rejected() {
        let keys = KeyPair::generate();
        let (a, b) = tokio::io::duplex(4096);

        let mut client = SecureChannel::new(b);
        client
            .write_packet(Packet::new(
                PacketId::SharedSecret,
                Bytes::from_static(&[0x7f, 1, 2]),
            ))
            .await
            .unwrap();

        let mut server = SecureChannel::new(a);
        assert!(matches!(
            accept(&mut server, &keys).await,
            Err(HandshakeError::Protocol(ProtocolError::MalformedPacket(_)))
        ));
    }

    #[tokio::test]
    async fn test_client_sees_eof_on_rejection() {
        let keys = KeyPair::generate();
        let stranger = KeyPair::generate();
        let (a, b) = tokio::io::duplex(4096);

        let server = tokio::spawn(async move {
            let mut channel = SecureChannel::new(a);
            let _ = accept(&mut channel, &keys).await;
        });

        let mut client = SecureChannel::new(b);
        let result = connect(&mut client, &stranger.public_key).await;
        assert!(matches!(
            result,
            Err(HandshakeError::Session(SessionError::ChannelClosed))
        ));
        server.await.unwrap();
    }
}
