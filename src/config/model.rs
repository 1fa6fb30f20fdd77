//! Persisted configuration document

use crate::protocol::Route;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// A registered node identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub passphrase: String,
    /// Unix seconds of the last successful hello, 0 if never connected
    #[serde(default)]
    pub last_connection: i64,
}

impl Node {
    pub fn new(id: impl Into<String>, passphrase: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            passphrase: passphrase.into(),
            last_connection: 0,
        }
    }
}

/// Contents of `config.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub wired_host: String,
    pub system_key: String,
    pub current_amd64_hash: String,
    pub current_arm64_hash: String,
    pub passphrase: String,
    pub mode: String,
    pub nodes: Vec<Node>,
    pub routes: Vec<Route>,
    /// Keys owned by other tools (OAuth settings and the like), kept as-is
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            wired_host: "wired.rip".to_string(),
            system_key: format!("node-{}", generate_id(8)),
            current_amd64_hash: String::new(),
            current_arm64_hash: String::new(),
            passphrase: String::new(),
            mode: String::new(),
            nodes: Vec::new(),
            routes: Vec::new(),
            extra: serde_json::Map::new(),
        }
    }
}

impl SystemConfig {
    /// Configured artifact hash for an architecture
    pub fn node_hash(&self, arch: &str) -> Option<&str> {
        let hash = match arch {
            "amd64" => &self.current_amd64_hash,
            "arm64" => &self.current_arm64_hash,
            _ => return None,
        };
        (!hash.is_empty()).then_some(hash.as_str())
    }
}

/// Random alphanumeric identifier
pub fn generate_id(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
