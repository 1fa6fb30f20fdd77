//! Cryptographic utilities for the node channel
//!
//! This module provides:
//! - secp256k1 master key management and PEM export
//! - Sealing the handshake shared secret to the master key
//! - The AES-256-GCM frame cipher installed after the handshake
//! - SHA-256 hashing of node artifacts

pub mod cipher;
pub mod hash;
pub mod keys;
pub mod seal;

pub use cipher::{ChannelCipher, Role};
pub use hash::{sha256, sha256_hex};
pub use keys::{
    public_key_from_pem, public_key_to_pem, KeyError, KeyPair, PEM_LABEL,
};
pub use seal::{open_secret, seal_secret, MIN_SECRET_LEN};
