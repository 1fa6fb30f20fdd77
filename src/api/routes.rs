//! Control surface routes configuration

use crate::api::handlers::{self, ApiState};
use axum::{
    routing::{delete, get},
    Router,
};

/// Create the API router with all routes
pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(handlers::index).fallback(handlers::method_not_allowed))
        // Node handshake bootstrap
        .route(
            "/api/connect/publickey",
            get(handlers::public_key).fallback(handlers::method_not_allowed),
        )
        // Routes
        .route(
            "/api/routes",
            get(handlers::get_routes).fallback(handlers::method_not_allowed),
        )
        .route(
            "/api/routes/add",
            get(handlers::add_route).fallback(handlers::method_not_allowed),
        )
        .route(
            "/api/routes/remove",
            delete(handlers::remove_route).fallback(handlers::method_not_allowed),
        )
        // Registered nodes
        .route(
            "/api/nodes",
            get(handlers::get_nodes).fallback(handlers::method_not_allowed),
        )
        .route(
            "/api/nodes/add",
            get(handlers::add_node).fallback(handlers::method_not_allowed),
        )
        .route(
            "/api/nodes/remove",
            delete(handlers::remove_node).fallback(handlers::method_not_allowed),
        )
        // Live sessions
        .route(
            "/api/sessions",
            get(handlers::get_sessions).fallback(handlers::method_not_allowed),
        )
        .route(
            "/api/player/disconnect",
            get(handlers::disconnect_player).fallback(handlers::method_not_allowed),
        )
        .route(
            "/api/node/update",
            get(handlers::update_nodes).fallback(handlers::method_not_allowed),
        )
        .fallback(handlers::not_found)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiMessage;
    use crate::config::ConfigStore;
    use crate::crypto::{public_key_from_pem, KeyPair};
    use crate::network::{Session, SessionRegistry, UpdateConfig, UpdateDistributor};
    use crate::protocol::{DisconnectPlayer, PacketId, Route};
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request, StatusCode};
    use axum::response::Response;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use tower::ServiceExt;

    struct TestApi {
        _temp_dir: tempfile::TempDir,
        state: ApiState,
    }

    fn test_api() -> TestApi {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ConfigStore::open(temp_dir.path().join("config.json")).unwrap());
        let registry = Arc::new(SessionRegistry::new());
        let distributor = Arc::new(UpdateDistributor::new(
            UpdateConfig {
                build_program: "true".to_string(),
                build_args: Vec::new(),
                ..Default::default()
            },
            registry.clone(),
        ));

        TestApi {
            _temp_dir: temp_dir,
            state: ApiState {
                store,
                registry,
                keys: Arc::new(KeyPair::generate()),
                distributor,
            },
        }
    }

    async fn call(state: &ApiState, method: Method, uri: &str) -> Response {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        create_router(state.clone()).oneshot(request).await.unwrap()
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()
    }

    async fn message(response: Response) -> String {
        let body: ApiMessage = serde_json::from_slice(&body_bytes(response).await).unwrap();
        body.message
    }

    #[tokio::test]
    async fn test_add_list_remove_route() {
        let api = test_api();

        let response = call(
            &api.state,
            Method::GET,
            "/api/routes/add?route_id=r1&proxy_domain=a.example.com&server_host=10.0.0.1&server_port=25565",
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = call(&api.state, Method::GET, "/api/routes").await;
        let routes: Vec<Route> = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(
            routes,
            vec![Route::new("r1", "a.example.com", "10.0.0.1", 25565)]
        );

        let response = call(&api.state, Method::DELETE, "/api/routes/remove?id=r1").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(api.state.store.routes().await.is_empty());
    }

    #[tokio::test]
    async fn test_add_route_generates_id() {
        let api = test_api();
        let response = call(
            &api.state,
            Method::GET,
            "/api/routes/add?proxy_domain=a.example.com&server_host=h&server_port=1",
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let route: Route = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(route.route_id.len(), 8);
    }

    #[tokio::test]
    async fn test_add_route_conflicts_and_bad_input() {
        let api = test_api();
        let add = "/api/routes/add?route_id=r1&proxy_domain=a.example.com&server_host=h&server_port=1";
        assert_eq!(call(&api.state, Method::GET, add).await.status(), StatusCode::OK);

        let response = call(&api.state, Method::GET, add).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert!(message(response).await.contains("r1"));

        let response = call(
            &api.state,
            Method::GET,
            "/api/routes/add?route_id=r2&proxy_domain=a.example.com&server_host=h&server_port=1",
        )
        .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = call(&api.state, Method::GET, "/api/routes/add?proxy_domain=x").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(!message(response).await.is_empty());

        let response = call(
            &api.state,
            Method::GET,
            "/api/routes/add?proxy_domain=b.example.com&server_host=h&server_port=99999",
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_remove_unknown_route() {
        let api = test_api();
        let response = call(&api.state, Method::DELETE, "/api/routes/remove?id=ghost").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(message(response).await.contains("ghost"));
    }

    #[tokio::test]
    async fn test_method_mismatch_and_unknown_path() {
        let api = test_api();

        let response = call(&api.state, Method::GET, "/api/routes/remove?id=r1").await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(message(response).await, "Method not allowed");

        let response = call(&api.state, Method::POST, "/api/routes").await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

        let response = call(&api.state, Method::GET, "/api/nope").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(message(response).await, "Not found");
    }

    #[tokio::test]
    async fn test_public_key_is_pem() {
        let api = test_api();
        let response = call(&api.state, Method::GET, "/api/connect/publickey").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[axum::http::header::CONTENT_TYPE],
            "text/plain"
        );

        let pem = String::from_utf8(body_bytes(response).await).unwrap();
        assert_eq!(public_key_from_pem(&pem).unwrap(), api.state.keys.public_key);
    }

    #[tokio::test]
    async fn test_node_management() {
        let api = test_api();

        let response = call(&api.state, Method::GET, "/api/nodes/add?id=node-1&passphrase=pw").await;
        assert_eq!(response.status(), StatusCode::OK);
        let response = call(&api.state, Method::GET, "/api/nodes/add?id=node-1&passphrase=pw").await;
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = call(&api.state, Method::GET, "/api/nodes").await;
        let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body[0]["id"], "node-1");
        assert!(body[0].get("passphrase").is_none());

        let response = call(&api.state, Method::DELETE, "/api/nodes/remove?id=node-1").await;
        assert_eq!(response.status(), StatusCode::OK);
        let response = call(&api.state, Method::DELETE, "/api/nodes/remove?id=node-1").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_player_disconnect_broadcasts() {
        let api = test_api();
        let (session, mut rx) = Session::new(SocketAddr::from(([127, 0, 0, 1], 1)));
        api.state.registry.put(Arc::new(session)).await;

        let response = call(
            &api.state,
            Method::GET,
            "/api/player/disconnect?uuid=abc-123&host=a.example.com",
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let packet = rx.recv().await.unwrap();
        assert!(packet.is(PacketId::DisconnectPlayer));
        let payload: DisconnectPlayer = packet.decode().unwrap();
        assert_eq!(payload.player_uuid, "abc-123");
        assert_eq!(payload.proxy_host, "a.example.com");
    }

    #[tokio::test]
    async fn test_sessions_listing() {
        let api = test_api();
        let (session, _rx) = Session::new(SocketAddr::from(([127, 0, 0, 1], 4242)));
        api.state.registry.put(Arc::new(session)).await;

        let response = call(&api.state, Method::GET, "/api/sessions").await;
        let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body[0]["address"], "127.0.0.1:4242");
        assert!(body[0]["key"].is_null());
    }

    #[tokio::test]
    async fn test_update_rejects_bad_folder() {
        let api = test_api();
        let folder = tempfile::tempdir().unwrap();
        let uri = format!("/api/node/update?folder={}", folder.path().display());

        let response = call(&api.state, Method::GET, &uri).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = call(&api.state, Method::GET, "/api/node/update").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_update_records_hash() {
        let api = test_api();
        let folder = tempfile::tempdir().unwrap();
        std::fs::write(folder.path().join("go.mod"), "module wirednode\n").unwrap();
        std::fs::write(folder.path().join("wirednode"), b"binary").unwrap();

        let uri = format!(
            "/api/node/update?folder={}&arch=amd64",
            folder.path().display()
        );
        let response = call(&api.state, Method::GET, &uri).await;
        assert_eq!(response.status(), StatusCode::OK);

        let expected = crate::crypto::sha256_hex(b"binary");
        assert_eq!(
            api.state.store.current_node_hash("amd64").await.as_deref(),
            Some(expected.as_str())
        );
    }

    #[tokio::test]
    async fn test_index_banner() {
        let api = test_api();
        let response = call(&api.state, Method::GET, "/").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(message(response).await.starts_with("wired master node-"));
    }
}
