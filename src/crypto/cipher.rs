//! Per-connection frame cipher
//!
//! Both directions get their own AES-256-GCM key derived from the shared
//! secret, so each side can count nonces independently. Nonces are
//! `[0; 4] || counter_be(8)` and advance once per frame.

use crate::crypto::keys::KeyError;
use crate::crypto::seal::MIN_SECRET_LEN;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;

const CHANNEL_SALT: &[u8] = b"wired-channel-v1";
const MASTER_TO_NODE: &[u8] = b"master->node";
const NODE_TO_MASTER: &[u8] = b"node->master";

/// Which end of the connection a cipher belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

/// Symmetric cipher installed on a channel after the handshake
pub struct ChannelCipher {
    sealer: Aes256Gcm,
    opener: Aes256Gcm,
    sent: u64,
    received: u64,
}

impl ChannelCipher {
    /// Derive directional keys from the shared secret
    pub fn derive(secret: &[u8], role: Role) -> Result<Self, KeyError> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(KeyError::SecretTooShort(secret.len()));
        }

        let hk = Hkdf::<Sha256>::new(Some(CHANNEL_SALT), secret);
        let mut to_node = [0u8; 32];
        let mut to_master = [0u8; 32];
        hk.expand(MASTER_TO_NODE, &mut to_node)
            .map_err(|_| KeyError::SealFailed)?;
        hk.expand(NODE_TO_MASTER, &mut to_master)
            .map_err(|_| KeyError::SealFailed)?;

        let (seal_key, open_key) = match role {
            Role::Server => (&to_node, &to_master),
            Role::Client => (&to_master, &to_node),
        };
        let sealer = Aes256Gcm::new_from_slice(seal_key).map_err(|_| KeyError::SealFailed);
        let opener = Aes256Gcm::new_from_slice(open_key).map_err(|_| KeyError::SealFailed);

        to_node.zeroize();
        to_master.zeroize();

        Ok(Self {
            sealer: sealer?,
            opener: opener?,
            sent: 0,
            received: 0,
        })
    }

    fn nonce(counter: u64) -> [u8; 12] {
        let mut nonce = [0u8; 12];
        nonce[4..].copy_from_slice(&counter.to_be_bytes());
        nonce
    }

    /// Encrypt the next outgoing frame
    pub fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, KeyError> {
        let counter = self.sent;
        self.sent = counter.checked_add(1).ok_or(KeyError::NonceExhausted)?;

        self.sealer
            .encrypt(Nonce::from_slice(&Self::nonce(counter)), plaintext)
            .map_err(|_| KeyError::SealFailed)
    }

    /// Decrypt the next incoming frame; frames must arrive in order
    pub fn open(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, KeyError> {
        let plaintext = self
            .opener
            .decrypt(Nonce::from_slice(&Self::nonce(self.received)), ciphertext)
            .map_err(|_| KeyError::OpenFailed)?;
        self.received = self
            .received
            .checked_add(1)
            .ok_or(KeyError::NonceExhausted)?;
        Ok(plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (ChannelCipher, ChannelCipher) {
        let secret = b"0123456789abcdef0123456789abcdef";
        (
            ChannelCipher::derive(secret, Role::Server).unwrap(),
            ChannelCipher::derive(secret, Role::Client).unwrap(),
        )
    }

    #[test]
    fn test_both_directions() {
        let (mut server, mut client) = pair();

        let frame = server.seal(b"routes").unwrap();
        assert_eq!(client.open(&frame).unwrap(), b"routes");

        let frame = client.seal(b"ping").unwrap();
        assert_eq!(server.open(&frame).unwrap(), b"ping");
    }

    #[test]
    fn test_same_plaintext_differs_per_frame() {
        let (mut server, _) = pair();
        let first = server.seal(b"pong").unwrap();
        let second = server.seal(b"pong").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_replay_rejected() {
        let (mut server, mut client) = pair();
        let frame = server.seal(b"once").unwrap();

        client.open(&frame).unwrap();
        assert!(client.open(&frame).is_err());
    }

    #[test]
    fn test_reflection_rejected() {
        let (mut server, _) = pair();
        let frame = server.seal(b"mirror").unwrap();

        // a frame sealed by the master cannot be opened as if the node sent it
        let (mut other_server, _) = pair();
        assert!(other_server.open(&frame).is_err());
    }

    #[test]
    fn test_short_secret_rejected() {
        assert!(ChannelCipher::derive(&[1u8; 8], Role::Server).is_err());
    }
}
