//! Master key management
//!
//! The master holds a long-lived secp256k1 key pair. Nodes fetch the public
//! half in PEM form over the control surface and seal their per-connection
//! shared secret to it.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::rngs::OsRng;
use secp256k1::{PublicKey, Secp256k1, SecretKey};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// PEM label for the master public key
pub const PEM_LABEL: &str = "WIRED PUBLIC KEY";

/// Errors that can occur during key operations
#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Invalid private key")]
    InvalidPrivateKey,
    #[error("Invalid public key")]
    InvalidPublicKey,
    #[error("Invalid PEM: {0}")]
    InvalidPem(String),
    #[error("Shared secret too short: {0} bytes")]
    SecretTooShort(usize),
    #[error("Sealing failed")]
    SealFailed,
    #[error("Decryption/authentication failed")]
    OpenFailed,
    #[error("Nonce space exhausted")]
    NonceExhausted,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Secp256k1 error: {0}")]
    Secp256k1Error(#[from] secp256k1::Error),
}

/// A key pair consisting of a private key and its corresponding public key
#[derive(Clone)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let (secret_key, public_key) = secp.generate_keypair(&mut OsRng);
        Self {
            secret_key,
            public_key,
        }
    }

    /// Create a key pair from an existing secret key
    pub fn from_secret_key(secret_key: SecretKey) -> Self {
        let secp = Secp256k1::new();
        let public_key = PublicKey::from_secret_key(&secp, &secret_key);
        Self {
            secret_key,
            public_key,
        }
    }

    /// Create a key pair from a hex-encoded private key
    pub fn from_private_key_hex(hex_key: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_key.trim()).map_err(|_| KeyError::InvalidPrivateKey)?;
        let secret_key =
            SecretKey::from_slice(&bytes).map_err(|_| KeyError::InvalidPrivateKey)?;
        Ok(Self::from_secret_key(secret_key))
    }

    /// Get the private key as a hex string
    pub fn private_key_hex(&self) -> String {
        hex::encode(self.secret_key.secret_bytes())
    }

    /// Get the public key as a hex string (compressed format)
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key.serialize())
    }

    /// Public key in the textual form served to nodes
    pub fn public_key_pem(&self) -> String {
        public_key_to_pem(&self.public_key)
    }

    /// Load the key pair stored at `path`, creating one on first use.
    ///
    /// Returns the key pair and whether it was freshly generated.
    pub fn load_or_generate(path: &Path) -> Result<(Self, bool), KeyError> {
        if path.exists() {
            let contents = fs::read_to_string(path)?;
            return Ok((Self::from_private_key_hex(&contents)?, false));
        }

        let keys = Self::generate();
        keys.save(path)?;
        log::info!("Generated new master key pair at {}", path.display());
        Ok((keys, true))
    }

    /// Write the private key to `path` as hex, readable by the owner only
    pub fn save(&self, path: &Path) -> Result<(), KeyError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, self.private_key_hex())?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }
}

/// Render a public key as PEM
pub fn public_key_to_pem(public_key: &PublicKey) -> String {
    format!(
        "-----BEGIN {label}-----\n{body}\n-----END {label}-----\n",
        label = PEM_LABEL,
        body = STANDARD.encode(public_key.serialize()),
    )
}

/// Parse a public key produced by [`public_key_to_pem`]
pub fn public_key_from_pem(pem: &str) -> Result<PublicKey, KeyError> {
    let begin = format!("-----BEGIN {}-----", PEM_LABEL);
    let end = format!("-----END {}-----", PEM_LABEL);

    let mut lines = pem.lines().map(str::trim).filter(|l| !l.is_empty());
    if lines.next() != Some(begin.as_str()) {
        return Err(KeyError::InvalidPem("missing BEGIN line".to_string()));
    }

    let mut body = String::new();
    let mut terminated = false;
    for line in lines {
        if line == end {
            terminated = true;
            break;
        }
        body.push_str(line);
    }
    if !terminated {
        return Err(KeyError::InvalidPem("missing END line".to_string()));
    }

    let bytes = STANDARD
        .decode(body)
        .map_err(|e| KeyError::InvalidPem(e.to_string()))?;
    PublicKey::from_slice(&bytes).map_err(|_| KeyError::InvalidPublicKey)
}
