//! Wired master: control plane for wired proxy nodes
//!
//! This crate provides the master side of the node protocol:
//! - Encrypted TCP channel bootstrapped from a secret sealed to the master key
//! - Compact binary packet codec with varint identifiers and framing
//! - Concurrent session registry with best-effort broadcast
//! - Route synchronization from a JSON config store to every live node
//! - Node binary build and distribution
//! - Localhost HTTP control surface
//!
//! # Example
//!
//! ```rust,no_run
//! use wired_master::network::{Master, MasterConfig};
//!
//! # async fn run() -> Result<(), wired_master::network::MasterError> {
//! let master = Master::new(MasterConfig::default())?;
//! master.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod network;
pub mod protocol;

// Re-export commonly used types
pub use api::{create_router, ApiState};
pub use config::{ConfigStore, Node, SystemConfig};
pub use crypto::KeyPair;
pub use network::{Master, MasterConfig, NodeClient, SessionRegistry, SyncStrategy};
pub use protocol::{Packet, PacketId, Route};
