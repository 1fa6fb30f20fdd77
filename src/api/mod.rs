//! HTTP control surface
//!
//! Bound to localhost; every error path answers with `{"message": ...}`.
//!
//! # Endpoints
//!
//! ## Handshake
//! - `GET /api/connect/publickey` - Master public key (PEM)
//!
//! ## Routes
//! - `GET /api/routes` - Current route set
//! - `GET /api/routes/add?route_id=&proxy_domain=&server_host=&server_port=` - Add route
//! - `DELETE /api/routes/remove?id=` - Remove route
//!
//! ## Nodes
//! - `GET /api/nodes` - Registered nodes
//! - `GET /api/nodes/add?id=&passphrase=` - Register node
//! - `DELETE /api/nodes/remove?id=` - Unregister node
//! - `GET /api/sessions` - Live sessions
//! - `GET /api/player/disconnect?uuid=&host=` - Drop a player on every node
//! - `GET /api/node/update?folder=[&arch=]` - Build and push a node binary

pub mod handlers;
pub mod routes;

pub use handlers::{ApiMessage, ApiState};
pub use routes::create_router;
