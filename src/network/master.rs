//! Master orchestration
//!
//! Wires the config store, key pair, session registry, acceptor, route
//! synchronizer, update distributor and HTTP control surface together.

use crate::api::{create_router, ApiState};
use crate::config::ConfigStore;
use crate::crypto::KeyPair;
use crate::network::registry::SessionRegistry;
use crate::network::server::Server;
use crate::network::session::SessionContext;
use crate::network::sync::{RouteSynchronizer, SyncStrategy};
use crate::network::update::{UpdateConfig, UpdateDistributor};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub type MasterError = Box<dyn std::error::Error + Send + Sync>;

/// Default node protocol port
pub const DEFAULT_TCP_PORT: u16 = 37420;
/// Default control surface port
pub const DEFAULT_HTTP_PORT: u16 = 37421;

/// Master configuration
#[derive(Debug, Clone)]
pub struct MasterConfig {
    /// Node protocol listen address
    pub tcp_addr: SocketAddr,
    /// Control surface listen address
    pub http_addr: SocketAddr,
    pub config_path: PathBuf,
    pub key_path: PathBuf,
    pub sync_strategy: SyncStrategy,
    /// Longest a session may stay silent, `None` to never time out
    pub read_timeout: Option<Duration>,
    pub update: UpdateConfig,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            tcp_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_TCP_PORT)),
            http_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_HTTP_PORT)),
            config_path: PathBuf::from("config.json"),
            key_path: PathBuf::from("master.key"),
            sync_strategy: SyncStrategy::default(),
            read_timeout: None,
            update: UpdateConfig::default(),
        }
    }
}

/// Addresses and tasks of a started master
pub struct MasterHandle {
    pub tcp_addr: SocketAddr,
    pub http_addr: SocketAddr,
    tasks: Vec<JoinHandle<()>>,
}

impl MasterHandle {
    /// Wait for every background task to finish
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                log::error!("Master task failed: {}", e);
            }
        }
    }
}

/// The master process
pub struct Master {
    pub config: MasterConfig,
    keys: Arc<KeyPair>,
    store: Arc<ConfigStore>,
    registry: Arc<SessionRegistry>,
    synchronizer: Arc<RouteSynchronizer>,
    distributor: Arc<UpdateDistributor>,
    shutdown: CancellationToken,
}

impl Master {
    /// Load the key pair and config store named by `config`
    pub fn new(config: MasterConfig) -> Result<Self, MasterError> {
        let (keys, generated) = KeyPair::load_or_generate(&config.key_path)?;
        if generated {
            log::info!("Generated master key at {}", config.key_path.display());
        }
        let store = ConfigStore::open(&config.config_path)?;

        Ok(Self::with_parts(config, keys, store))
    }

    /// Build a master from already loaded parts
    pub fn with_parts(config: MasterConfig, keys: KeyPair, store: ConfigStore) -> Self {
        let keys = Arc::new(keys);
        let store = Arc::new(store);
        let registry = Arc::new(SessionRegistry::new());
        let synchronizer = Arc::new(RouteSynchronizer::new(
            store.clone(),
            registry.clone(),
            config.sync_strategy,
        ));
        let distributor = Arc::new(UpdateDistributor::new(
            config.update.clone(),
            registry.clone(),
        ));

        Self {
            config,
            keys,
            store,
            registry,
            synchronizer,
            distributor,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn keys(&self) -> Arc<KeyPair> {
        self.keys.clone()
    }

    pub fn store(&self) -> Arc<ConfigStore> {
        self.store.clone()
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.registry.clone()
    }

    /// State for the HTTP control surface
    pub fn api_state(&self) -> ApiState {
        ApiState {
            store: self.store.clone(),
            registry: self.registry.clone(),
            keys: self.keys.clone(),
            distributor: self.distributor.clone(),
        }
    }

    /// Bind both listeners and spawn the background tasks
    pub async fn start(&self) -> Result<MasterHandle, MasterError> {
        let server = Server::bind(self.config.tcp_addr).await?;
        let tcp_addr = server.local_addr();

        let http = TcpListener::bind(self.config.http_addr).await?;
        let http_addr = http.local_addr()?;
        log::info!("HTTP server listening on {}", http_addr);

        let ctx = Arc::new(SessionContext {
            keys: self.keys.clone(),
            store: self.store.clone(),
            registry: self.registry.clone(),
            read_timeout: self.config.read_timeout,
        });

        let mut tasks = Vec::new();

        let shutdown = self.shutdown.clone();
        tasks.push(tokio::spawn(async move {
            server.run(ctx, shutdown).await;
        }));

        let synchronizer = self.synchronizer.clone();
        let shutdown = self.shutdown.clone();
        tasks.push(tokio::spawn(async move {
            synchronizer.run(shutdown).await;
        }));

        let router = create_router(self.api_state());
        let shutdown = self.shutdown.clone();
        tasks.push(tokio::spawn(async move {
            let stopped = async move { shutdown.cancelled().await };
            if let Err(e) = axum::serve(http, router)
                .with_graceful_shutdown(stopped)
                .await
            {
                log::error!("HTTP server error: {}", e);
            }
        }));

        let config = self.store.snapshot().await;
        log::info!(
            "Master {}.{} started with {} routes",
            config.system_key,
            config.wired_host,
            config.routes.len()
        );

        Ok(MasterHandle {
            tcp_addr,
            http_addr,
            tasks,
        })
    }

    /// Run until Ctrl-C or [`Master::shutdown`]
    pub async fn run(&self) -> Result<(), MasterError> {
        let handle = self.start().await?;

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    log::error!("Failed to listen for Ctrl-C: {}", e);
                }
                log::info!("Master shutting down...");
            }
            _ = self.shutdown.cancelled() => {}
        }

        self.shutdown().await;
        handle.join().await;
        Ok(())
    }

    /// Stop accepting, stop the background tasks and close every session
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.registry.close_all().await;
    }
}
