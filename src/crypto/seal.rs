//! Sealing the handshake shared secret to the master public key
//!
//! Layout: `ephemeral_pubkey(33) || nonce(12) || AES-256-GCM(secret)`.
//! The AEAD key is HKDF-SHA256 over the ECDH secret of the ephemeral key and
//! the master key, salted with the ephemeral public key.

use crate::crypto::keys::{KeyError, KeyPair};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use secp256k1::ecdh::SharedSecret;
use secp256k1::{PublicKey, SecretKey};
use sha2::Sha256;
use zeroize::Zeroize;

/// Shortest shared secret accepted from a node
pub const MIN_SECRET_LEN: usize = 16;

const EPHEMERAL_KEY_LEN: usize = 33;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const SEAL_INFO: &[u8] = b"wired-seal-v1";

/// Encrypt `secret` so only the holder of `master_key`'s private half can read it
pub fn seal_secret(master_key: &PublicKey, secret: &[u8]) -> Result<Vec<u8>, KeyError> {
    if secret.len() < MIN_SECRET_LEN {
        return Err(KeyError::SecretTooShort(secret.len()));
    }

    let ephemeral = KeyPair::generate();
    let cipher = seal_cipher(master_key, &ephemeral.secret_key, &ephemeral.public_key)?;

    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), secret)
        .map_err(|_| KeyError::SealFailed)?;

    let mut sealed = Vec::with_capacity(EPHEMERAL_KEY_LEN + NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&ephemeral.public_key.serialize());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Recover a secret sealed with [`seal_secret`]
pub fn open_secret(keys: &KeyPair, sealed: &[u8]) -> Result<Vec<u8>, KeyError> {
    if sealed.len() < EPHEMERAL_KEY_LEN + NONCE_LEN + TAG_LEN + MIN_SECRET_LEN {
        return Err(KeyError::SecretTooShort(
            sealed.len().saturating_sub(EPHEMERAL_KEY_LEN + NONCE_LEN + TAG_LEN),
        ));
    }

    let (ephemeral, rest) = sealed.split_at(EPHEMERAL_KEY_LEN);
    let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

    let ephemeral = PublicKey::from_slice(ephemeral).map_err(|_| KeyError::InvalidPublicKey)?;
    let cipher = seal_cipher(&ephemeral, &keys.secret_key, &ephemeral)?;

    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| KeyError::OpenFailed)
}

fn seal_cipher(
    peer: &PublicKey,
    own: &SecretKey,
    ephemeral: &PublicKey,
) -> Result<Aes256Gcm, KeyError> {
    let shared = SharedSecret::new(peer, own);
    let salt = ephemeral.serialize();
    let hk = Hkdf::<Sha256>::new(Some(&salt[..]), &shared.secret_bytes());

    let mut key = [0u8; 32];
    hk.expand(SEAL_INFO, &mut key)
        .map_err(|_| KeyError::SealFailed)?;
    let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| KeyError::SealFailed);
    key.zeroize();
    cipher
}
