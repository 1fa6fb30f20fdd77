//! Configuration persistence
//!
//! Routes, registered nodes and system settings live in a single JSON
//! document that is rewritten on every mutation.

pub mod model;
pub mod store;

pub use model::{generate_id, Node, SystemConfig};
pub use store::{load_from_file, save_to_file, ConfigError, ConfigStore};
