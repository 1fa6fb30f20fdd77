//! JSON-backed configuration store
//!
//! Every mutation is applied to a copy, persisted, and only then made
//! visible. Route mutations bump a watch counter that the route
//! synchronizer can wait on.

use crate::config::model::{Node, SystemConfig};
use crate::protocol::Route;
use std::fs;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::{watch, RwLock};

/// Config store errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Route not found: {0}")]
    RouteNotFound(String),
    #[error("Route {0} already exists")]
    DuplicateRoute(String),
    #[error("Proxy domain {0} is already routed")]
    DuplicateProxyDomain(String),
    #[error("Node not found: {0}")]
    NodeNotFound(String),
    #[error("Node {0} already exists")]
    DuplicateNode(String),
}

/// Shared handle to `config.json`
pub struct ConfigStore {
    path: PathBuf,
    config: RwLock<SystemConfig>,
    route_version: watch::Sender<u64>,
}

impl ConfigStore {
    /// Open the store at `path`, writing defaults if the file does not exist
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();

        let config = if path.exists() {
            load_from_file(&path)?
        } else {
            log::info!("Creating default configuration at {}", path.display());
            let config = SystemConfig::default();
            save_to_file(&config, &path)?;
            config
        };

        let (route_version, _) = watch::channel(0);
        Ok(Self {
            path,
            config: RwLock::new(config),
            route_version,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `f` to a copy of the config, persist it, then publish it
    async fn update<R>(
        &self,
        f: impl FnOnce(&mut SystemConfig) -> Result<R, ConfigError>,
    ) -> Result<R, ConfigError> {
        let mut current = self.config.write().await;
        let mut next = current.clone();
        let result = f(&mut next)?;
        save_to_file(&next, &self.path)?;
        *current = next;
        Ok(result)
    }

    fn routes_changed(&self) {
        self.route_version.send_modify(|version| *version += 1);
    }

    /// Snapshot of the whole document
    pub async fn snapshot(&self) -> SystemConfig {
        self.config.read().await.clone()
    }

    // --- Routes ---

    pub async fn routes(&self) -> Vec<Route> {
        self.config.read().await.routes.clone()
    }

    pub async fn route(&self, route_id: &str) -> Option<Route> {
        let config = self.config.read().await;
        config.routes.iter().find(|r| r.route_id == route_id).cloned()
    }

    pub async fn route_by_proxy_domain(&self, proxy_domain: &str) -> Option<Route> {
        let config = self.config.read().await;
        config
            .routes
            .iter()
            .find(|r| r.proxy_domain == proxy_domain)
            .cloned()
    }

    /// Append a route; ids and proxy domains must stay unique
    pub async fn add_route(&self, route: Route) -> Result<(), ConfigError> {
        self.update(|config| {
            if config.routes.iter().any(|r| r.route_id == route.route_id) {
                return Err(ConfigError::DuplicateRoute(route.route_id));
            }
            if config
                .routes
                .iter()
                .any(|r| r.proxy_domain == route.proxy_domain)
            {
                return Err(ConfigError::DuplicateProxyDomain(route.proxy_domain));
            }
            config.routes.push(route);
            Ok(())
        })
        .await?;

        self.routes_changed();
        Ok(())
    }

    /// Remove a route by id, returning it
    pub async fn delete_route(&self, route_id: &str) -> Result<Route, ConfigError> {
        let removed = self
            .update(|config| {
                let index = config
                    .routes
                    .iter()
                    .position(|r| r.route_id == route_id)
                    .ok_or_else(|| ConfigError::RouteNotFound(route_id.to_string()))?;
                Ok(config.routes.remove(index))
            })
            .await?;

        self.routes_changed();
        Ok(removed)
    }

    /// Replace the whole route set
    pub async fn set_routes(&self, routes: Vec<Route>) -> Result<(), ConfigError> {
        self.update(|config| {
            config.routes = routes;
            Ok(())
        })
        .await?;

        self.routes_changed();
        Ok(())
    }

    /// Receiver that observes a new value after every route mutation
    pub fn subscribe_routes(&self) -> watch::Receiver<u64> {
        self.route_version.subscribe()
    }

    // --- Nodes ---

    pub async fn nodes(&self) -> Vec<Node> {
        self.config.read().await.nodes.clone()
    }

    pub async fn node(&self, node_id: &str) -> Option<Node> {
        let config = self.config.read().await;
        config.nodes.iter().find(|n| n.id == node_id).cloned()
    }

    pub async fn add_node(&self, node: Node) -> Result<(), ConfigError> {
        self.update(|config| {
            if config.nodes.iter().any(|n| n.id == node.id) {
                return Err(ConfigError::DuplicateNode(node.id));
            }
            config.nodes.push(node);
            Ok(())
        })
        .await
    }

    pub async fn delete_node(&self, node_id: &str) -> Result<Node, ConfigError> {
        self.update(|config| {
            let index = config
                .nodes
                .iter()
                .position(|n| n.id == node_id)
                .ok_or_else(|| ConfigError::NodeNotFound(node_id.to_string()))?;
            Ok(config.nodes.remove(index))
        })
        .await
    }

    /// Record a successful connection for a registered node
    pub async fn touch_node(&self, node_id: &str, timestamp: i64) -> Result<(), ConfigError> {
        self.update(|config| {
            let node = config
                .nodes
                .iter_mut()
                .find(|n| n.id == node_id)
                .ok_or_else(|| ConfigError::NodeNotFound(node_id.to_string()))?;
            node.last_connection = timestamp;
            Ok(())
        })
        .await
    }

    // --- System settings ---

    pub async fn system_key(&self) -> String {
        self.config.read().await.system_key.clone()
    }

    pub async fn wired_host(&self) -> String {
        self.config.read().await.wired_host.clone()
    }

    pub async fn current_node_hash(&self, arch: &str) -> Option<String> {
        self.config.read().await.node_hash(arch).map(str::to_string)
    }

    pub async fn set_current_node_hash(&self, arch: &str, hash: &str) -> Result<(), ConfigError> {
        self.update(|config| {
            match arch {
                "amd64" => config.current_amd64_hash = hash.to_string(),
                "arm64" => config.current_arm64_hash = hash.to_string(),
                other => log::warn!("Ignoring node hash for unknown arch {}", other),
            }
            Ok(())
        })
        .await
    }
}

/// Load a config document from a specific file path
pub fn load_from_file(path: &Path) -> Result<SystemConfig, ConfigError> {
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);
    Ok(serde_json::from_reader(reader)?)
}

/// Save a config document, replacing the file atomically
pub fn save_to_file(config: &SystemConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let temp_path = path.with_extension("json.tmp");
    let file = fs::File::create(&temp_path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, config)?;
    writer.flush()?;
    drop(writer);

    fs::rename(&temp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp() -> (tempfile::TempDir, ConfigStore) {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(temp_dir.path().join("config.json")).unwrap();
        (temp_dir, store)
    }

    #[tokio::test]
    async fn test_open_creates_defaults() {
        let (temp_dir, store) = open_temp();
        assert!(temp_dir.path().join("config.json").exists());
        assert_eq!(store.wired_host().await, "wired.rip");
        assert!(store.routes().await.is_empty());
    }

    #[tokio::test]
    async fn test_add_and_delete_route() {
        let (_temp_dir, store) = open_temp();
        let route = Route::new("r1", "a.example.com", "10.0.0.1", 25565);

        store.add_route(route.clone()).await.unwrap();
        assert_eq!(store.routes().await, vec![route.clone()]);
        assert_eq!(
            store.route_by_proxy_domain("a.example.com").await,
            Some(route.clone())
        );
        assert_eq!(store.route("r1").await, Some(route.clone()));
        assert_eq!(store.route("missing").await, None);

        let removed = store.delete_route("r1").await.unwrap();
        assert_eq!(removed, route);
        assert!(store.routes().await.is_empty());
    }

    #[tokio::test]
    async fn test_route_uniqueness() {
        let (_temp_dir, store) = open_temp();
        store
            .add_route(Route::new("r1", "a.example.com", "h", 1))
            .await
            .unwrap();

        assert!(matches!(
            store.add_route(Route::new("r1", "b.example.com", "h", 1)).await,
            Err(ConfigError::DuplicateRoute(_))
        ));
        assert!(matches!(
            store.add_route(Route::new("r2", "a.example.com", "h", 1)).await,
            Err(ConfigError::DuplicateProxyDomain(_))
        ));
        assert_eq!(store.routes().await.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_missing_route() {
        let (_temp_dir, store) = open_temp();
        assert!(matches!(
            store.delete_route("nope").await,
            Err(ConfigError::RouteNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_changes_persist() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.json");

        {
            let store = ConfigStore::open(&path).unwrap();
            store
                .add_route(Route::new("r1", "a.example.com", "h", 1))
                .await
                .unwrap();
            store.add_node(Node::new("node-1", "secret")).await.unwrap();
        }

        let reopened = ConfigStore::open(&path).unwrap();
        assert_eq!(reopened.routes().await.len(), 1);
        assert_eq!(reopened.node("node-1").await.unwrap().passphrase, "secret");
    }

    #[tokio::test]
    async fn test_route_changes_are_signalled() {
        let (_temp_dir, store) = open_temp();
        let mut changes = store.subscribe_routes();

        store
            .add_route(Route::new("r1", "a.example.com", "h", 1))
            .await
            .unwrap();
        assert!(changes.has_changed().unwrap());
        changes.borrow_and_update();

        store.add_node(Node::new("node-1", "pw")).await.unwrap();
        assert!(!changes.has_changed().unwrap());

        store.delete_route("r1").await.unwrap();
        assert!(changes.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_failed_mutation_leaves_state() {
        let (_temp_dir, store) = open_temp();
        let mut changes = store.subscribe_routes();

        assert!(store.delete_route("missing").await.is_err());
        assert!(!changes.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_touch_node_and_hashes() {
        let (_temp_dir, store) = open_temp();
        store.add_node(Node::new("node-1", "pw")).await.unwrap();

        store.touch_node("node-1", 1_700_000_000).await.unwrap();
        assert_eq!(
            store.node("node-1").await.unwrap().last_connection,
            1_700_000_000
        );
        assert!(store.touch_node("ghost", 1).await.is_err());

        store.set_current_node_hash("amd64", "abcd").await.unwrap();
        assert_eq!(store.current_node_hash("amd64").await.as_deref(), Some("abcd"));
        assert_eq!(store.current_node_hash("arm64").await, None);
    }
}
