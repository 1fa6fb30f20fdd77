//! Node networking
//!
//! Everything between an accepted TCP connection and a live, route-synced
//! node session.
//!
//! # Features
//! - Encrypted channel bootstrapped from a sealed shared secret
//! - Per-connection sessions with an ordered writer task
//! - Concurrency-safe session registry with best-effort broadcast
//! - Route synchronization (edge-triggered or poll-and-diff)
//! - Node binary distribution

pub mod channel;
pub mod client;
pub mod handshake;
pub mod master;
pub mod registry;
pub mod server;
pub mod session;
pub mod sync;
pub mod update;

pub use channel::{ChannelState, SecureChannel};
pub use client::NodeClient;
pub use handshake::HandshakeError;
pub use master::{Master, MasterConfig, MasterError, MasterHandle, DEFAULT_HTTP_PORT, DEFAULT_TCP_PORT};
pub use registry::{BroadcastReport, SessionRegistry};
pub use server::Server;
pub use session::{NodeIdentity, Session, SessionContext, SessionError, SessionInfo};
pub use sync::{RouteSynchronizer, SyncStrategy, DEFAULT_POLL_INTERVAL};
pub use update::{DistributionReport, UpdateConfig, UpdateDistributor, UpdateError, CHUNK_SIZE, UPGRADE_LABEL};
