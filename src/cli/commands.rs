//! CLI commands for the master
//!
//! Implements all command handlers for the CLI interface. Route and node
//! edits go through the same config store the running master uses.

use crate::config::{generate_id, ConfigStore, Node};
use crate::crypto::KeyPair;
use crate::network::{Master, MasterConfig};
use crate::protocol::Route;
use chrono::{TimeZone, Utc};
use std::path::Path;

/// Result type for CLI operations
pub type CliResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Run the master until Ctrl-C
pub async fn cmd_start(config: MasterConfig) -> CliResult<()> {
    println!("🚀 Starting wired master");
    println!("   📡 Nodes:   {}", config.tcp_addr);
    println!("   🌐 HTTP:    {}", config.http_addr);
    println!("   📁 Config:  {}", config.config_path.display());

    let master = Master::new(config)?;
    master.run().await?;

    println!("👋 Master stopped");
    Ok(())
}

/// Create the master key file and print the public key
pub fn cmd_keygen(key_path: &Path, force: bool) -> CliResult<()> {
    if key_path.exists() && !force {
        let (keys, _) = KeyPair::load_or_generate(key_path)?;
        println!("⚠️  Key already exists at {}", key_path.display());
        println!("   Use --force to replace it (connected nodes must refetch the public key)");
        println!();
        print!("{}", keys.public_key_pem());
        return Ok(());
    }

    let keys = KeyPair::generate();
    keys.save(key_path)?;

    println!("✅ Master key written to {}", key_path.display());
    println!();
    print!("{}", keys.public_key_pem());
    Ok(())
}

/// List routes
pub async fn cmd_routes_list(store: &ConfigStore) -> CliResult<()> {
    let routes = store.routes().await;

    if routes.is_empty() {
        println!("📭 No routes configured");
        return Ok(());
    }

    println!("🔀 Routes ({}):", routes.len());
    for route in routes {
        println!(
            "   {} {} → {}:{}",
            route.route_id, route.proxy_domain, route.server_host, route.server_port
        );
    }
    Ok(())
}

/// Add a route
pub async fn cmd_routes_add(
    store: &ConfigStore,
    route_id: Option<String>,
    proxy_domain: &str,
    server_host: &str,
    server_port: u16,
) -> CliResult<Route> {
    let route_id = route_id.unwrap_or_else(|| generate_id(8));
    let route = Route::new(route_id, proxy_domain, server_host, server_port);
    store.add_route(route.clone()).await?;

    println!(
        "✅ Route {} added: {} → {}:{}",
        route.route_id, route.proxy_domain, route.server_host, route.server_port
    );
    Ok(route)
}

/// Remove a route
pub async fn cmd_routes_remove(store: &ConfigStore, route_id: &str) -> CliResult<()> {
    let route = store.delete_route(route_id).await?;
    println!("🗑️  Route {} ({}) removed", route.route_id, route.proxy_domain);
    Ok(())
}

/// List registered nodes
pub async fn cmd_nodes_list(store: &ConfigStore) -> CliResult<()> {
    let nodes = store.nodes().await;

    if nodes.is_empty() {
        println!("📭 No nodes registered");
        return Ok(());
    }

    println!("🖥️  Nodes ({}):", nodes.len());
    for node in nodes {
        let seen = match Utc.timestamp_opt(node.last_connection, 0).single() {
            Some(at) if node.last_connection > 0 => at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            _ => "never".to_string(),
        };
        println!("   {} (last connection: {})", node.id, seen);
    }
    Ok(())
}

/// Register a node, generating a passphrase when none is given
pub async fn cmd_nodes_add(
    store: &ConfigStore,
    node_id: &str,
    passphrase: Option<String>,
) -> CliResult<Node> {
    let passphrase = passphrase.unwrap_or_else(|| generate_id(24));
    let node = Node::new(node_id, passphrase);
    store.add_node(node.clone()).await?;

    println!("✅ Node {} registered", node.id);
    println!("   🔑 Passphrase: {}", node.passphrase);
    Ok(node)
}

/// Unregister a node
pub async fn cmd_nodes_remove(store: &ConfigStore, node_id: &str) -> CliResult<()> {
    let node = store.delete_node(node_id).await?;
    println!("🗑️  Node {} removed", node.id);
    Ok(())
}
