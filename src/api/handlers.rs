//! Control surface handlers

use crate::config::{generate_id, ConfigError, ConfigStore, Node};
use crate::crypto::KeyPair;
use crate::network::{DistributionReport, SessionInfo, SessionRegistry, UpdateDistributor, UpdateError};
use crate::protocol::{DisconnectPlayer, Packet, PacketId, Route};
use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Shared application state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<ConfigStore>,
    pub registry: Arc<SessionRegistry>,
    pub keys: Arc<KeyPair>,
    pub distributor: Arc<UpdateDistributor>,
}

// ============================================================================
// Response Types
// ============================================================================

/// `{"message": ...}` envelope used for errors and acknowledgements
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiMessage {
    pub message: String,
}

impl ApiMessage {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Serialize)]
pub struct NodeResponse {
    pub id: String,
    pub last_connection: i64,
}

impl From<&Node> for NodeResponse {
    fn from(node: &Node) -> Self {
        Self {
            id: node.id.clone(),
            last_connection: node.last_connection,
        }
    }
}

#[derive(Serialize)]
pub struct BroadcastResponse {
    pub message: String,
    pub delivered: usize,
    pub failed: usize,
}

type ApiResult<T> = Result<T, (StatusCode, Json<ApiMessage>)>;

fn api_error(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<ApiMessage>) {
    (status, Json(ApiMessage::new(message)))
}

fn query_error(rejection: QueryRejection) -> (StatusCode, Json<ApiMessage>) {
    api_error(StatusCode::BAD_REQUEST, rejection.body_text())
}

fn config_error(e: ConfigError) -> (StatusCode, Json<ApiMessage>) {
    let status = match e {
        ConfigError::RouteNotFound(_) | ConfigError::NodeNotFound(_) => StatusCode::NOT_FOUND,
        ConfigError::DuplicateRoute(_)
        | ConfigError::DuplicateProxyDomain(_)
        | ConfigError::DuplicateNode(_) => StatusCode::CONFLICT,
        ConfigError::IoError(_) | ConfigError::SerializationError(_) => {
            log::error!("Config store failure: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    api_error(status, e.to_string())
}

// ============================================================================
// Request Types
// ============================================================================

#[derive(Deserialize)]
pub struct AddRouteQuery {
    /// Generated when absent
    pub route_id: Option<String>,
    pub proxy_domain: String,
    pub server_host: String,
    pub server_port: u16,
}

#[derive(Deserialize)]
pub struct IdQuery {
    pub id: String,
}

#[derive(Deserialize)]
pub struct AddNodeQuery {
    pub id: String,
    pub passphrase: String,
}

#[derive(Deserialize)]
pub struct UpdateQuery {
    pub folder: PathBuf,
    /// Record the artifact hash as current for this arch
    pub arch: Option<String>,
}

#[derive(Deserialize)]
pub struct DisconnectQuery {
    pub uuid: String,
    pub host: String,
}

// ============================================================================
// General
// ============================================================================

/// GET / - Service banner
pub async fn index(State(state): State<ApiState>) -> Json<ApiMessage> {
    let config = state.store.snapshot().await;
    Json(ApiMessage::new(format!(
        "wired master {}.{}",
        config.system_key, config.wired_host
    )))
}

/// Fallback for unknown paths
pub async fn not_found() -> (StatusCode, Json<ApiMessage>) {
    api_error(StatusCode::NOT_FOUND, "Not found")
}

/// Fallback for known paths hit with the wrong method
pub async fn method_not_allowed() -> (StatusCode, Json<ApiMessage>) {
    api_error(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
}

/// GET /api/connect/publickey - Master public key as PEM
pub async fn public_key(State(state): State<ApiState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain")],
        state.keys.public_key_pem(),
    )
}

// ============================================================================
// Routes
// ============================================================================

/// GET /api/routes - Current route set
pub async fn get_routes(State(state): State<ApiState>) -> Json<Vec<Route>> {
    Json(state.store.routes().await)
}

/// GET /api/routes/add - Append a route
pub async fn add_route(
    State(state): State<ApiState>,
    query: Result<Query<AddRouteQuery>, QueryRejection>,
) -> ApiResult<Json<Route>> {
    let Query(req) = query.map_err(query_error)?;

    let route_id = match req.route_id {
        Some(id) if !id.trim().is_empty() => id,
        _ => generate_id(8),
    };
    if req.proxy_domain.trim().is_empty() || req.server_host.trim().is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "proxy_domain and server_host must not be empty",
        ));
    }

    let route = Route::new(route_id, req.proxy_domain, req.server_host, req.server_port);
    state
        .store
        .add_route(route.clone())
        .await
        .map_err(config_error)?;

    log::info!(
        "Added route {}: {} -> {}:{}",
        route.route_id,
        route.proxy_domain,
        route.server_host,
        route.server_port
    );
    Ok(Json(route))
}

/// DELETE /api/routes/remove - Remove a route by id
pub async fn remove_route(
    State(state): State<ApiState>,
    query: Result<Query<IdQuery>, QueryRejection>,
) -> ApiResult<Json<ApiMessage>> {
    let Query(req) = query.map_err(query_error)?;
    let route = state
        .store
        .delete_route(&req.id)
        .await
        .map_err(config_error)?;

    log::info!("Removed route {} ({})", route.route_id, route.proxy_domain);
    Ok(Json(ApiMessage::new(format!("Route {} removed", route.route_id))))
}

// ============================================================================
// Nodes
// ============================================================================

/// GET /api/nodes - Registered nodes, passphrases omitted
pub async fn get_nodes(State(state): State<ApiState>) -> Json<Vec<NodeResponse>> {
    let nodes = state.store.nodes().await;
    Json(nodes.iter().map(NodeResponse::from).collect())
}

/// GET /api/nodes/add - Register a node
pub async fn add_node(
    State(state): State<ApiState>,
    query: Result<Query<AddNodeQuery>, QueryRejection>,
) -> ApiResult<Json<NodeResponse>> {
    let Query(req) = query.map_err(query_error)?;
    if req.id.trim().is_empty() || req.passphrase.is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "id and passphrase must not be empty",
        ));
    }

    let node = Node::new(req.id, req.passphrase);
    state
        .store
        .add_node(node.clone())
        .await
        .map_err(config_error)?;

    log::info!("Registered node {}", node.id);
    Ok(Json(NodeResponse::from(&node)))
}

/// DELETE /api/nodes/remove - Unregister a node
pub async fn remove_node(
    State(state): State<ApiState>,
    query: Result<Query<IdQuery>, QueryRejection>,
) -> ApiResult<Json<ApiMessage>> {
    let Query(req) = query.map_err(query_error)?;
    let node = state.store.delete_node(&req.id).await.map_err(config_error)?;

    log::info!("Unregistered node {}", node.id);
    Ok(Json(ApiMessage::new(format!("Node {} removed", node.id))))
}

// ============================================================================
// Sessions
// ============================================================================

/// GET /api/sessions - Live node sessions
pub async fn get_sessions(State(state): State<ApiState>) -> Json<Vec<SessionInfo>> {
    Json(state.registry.infos().await)
}

/// GET /api/player/disconnect - Ask every node to drop a player
pub async fn disconnect_player(
    State(state): State<ApiState>,
    query: Result<Query<DisconnectQuery>, QueryRejection>,
) -> ApiResult<Json<BroadcastResponse>> {
    let Query(req) = query.map_err(query_error)?;

    let packet = Packet::encode(
        PacketId::DisconnectPlayer,
        &DisconnectPlayer {
            player_uuid: req.uuid.clone(),
            proxy_host: req.host,
        },
    )
    .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let report = state.registry.broadcast(packet).await;
    Ok(Json(BroadcastResponse {
        message: format!("Disconnect for {} sent", req.uuid),
        delivered: report.delivered,
        failed: report.failed,
    }))
}

// ============================================================================
// Updates
// ============================================================================

/// GET /api/node/update - Build a node folder and push it to every session
pub async fn update_nodes(
    State(state): State<ApiState>,
    query: Result<Query<UpdateQuery>, QueryRejection>,
) -> ApiResult<Json<DistributionReport>> {
    let Query(req) = query.map_err(query_error)?;

    let report = state
        .distributor
        .distribute(&req.folder)
        .await
        .map_err(|e| {
            log::warn!("Update from {} aborted: {}", req.folder.display(), e);
            let status = match e {
                UpdateError::ValidationFailed(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            api_error(status, e.to_string())
        })?;

    if let Some(arch) = req.arch.as_deref() {
        state
            .store
            .set_current_node_hash(arch, &report.sha256)
            .await
            .map_err(config_error)?;
    }

    log::info!(
        "Update sent to {} nodes ({} failed)",
        report.delivered,
        report.failed
    );
    Ok(Json(report))
}
