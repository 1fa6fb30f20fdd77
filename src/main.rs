//! Wired master CLI application
//!
//! Runs the master or edits its configuration offline.

use clap::{Parser, Subcommand, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use wired_master::cli;
use wired_master::config::ConfigStore;
use wired_master::network::{MasterConfig, SyncStrategy, UpdateConfig};

#[derive(Parser)]
#[command(name = "wired-master")]
#[command(author = "Darshan")]
#[command(version = "0.1.0")]
#[command(about = "Control plane for wired proxy nodes", long_about = None)]
struct Cli {
    /// Configuration document
    #[arg(short, long, default_value = "config.json", global = true)]
    config: PathBuf,

    /// Master private key file
    #[arg(short, long, default_value = "master.key", global = true)]
    key_file: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the master
    Start {
        /// Node protocol listen address
        #[arg(long, default_value = "0.0.0.0:37420")]
        tcp_addr: SocketAddr,

        /// Control surface listen address
        #[arg(long, default_value = "127.0.0.1:37421")]
        http_addr: SocketAddr,

        /// How route changes reach nodes
        #[arg(long, value_enum, default_value = "poll")]
        sync: SyncMode,

        /// Seconds between route checks in poll mode
        #[arg(long, default_value = "5")]
        poll_interval: u64,

        /// Drop sessions silent for this many seconds (disabled by default)
        #[arg(long)]
        read_timeout: Option<u64>,

        /// Program used to build node binaries
        #[arg(long, default_value = "go")]
        build_program: String,

        /// Build output file, relative to the node folder
        #[arg(long, default_value = "wirednode")]
        artifact: String,
    },

    /// Create the master key and print its public half
    Keygen {
        /// Replace an existing key
        #[arg(long)]
        force: bool,
    },

    /// Route operations
    Routes {
        #[command(subcommand)]
        action: RouteCommands,
    },

    /// Registered node operations
    Nodes {
        #[command(subcommand)]
        action: NodeCommands,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SyncMode {
    /// Push as soon as routes change
    Edge,
    /// Diff against the last push on an interval
    Poll,
}

#[derive(Subcommand)]
enum RouteCommands {
    /// List routes
    List,

    /// Add a route
    Add {
        /// Public domain nodes accept
        #[arg(short, long)]
        domain: String,

        /// Backend host
        #[arg(long)]
        host: String,

        /// Backend port
        #[arg(short, long)]
        port: u16,

        /// Route id (generated when omitted)
        #[arg(long)]
        id: Option<String>,
    },

    /// Remove a route
    Remove {
        /// Route id
        #[arg(long)]
        id: String,
    },
}

#[derive(Subcommand)]
enum NodeCommands {
    /// List registered nodes
    List,

    /// Register a node
    Add {
        /// Node key
        #[arg(long)]
        id: String,

        /// Passphrase (generated when omitted)
        #[arg(long)]
        passphrase: Option<String>,
    },

    /// Unregister a node
    Remove {
        /// Node key
        #[arg(long)]
        id: String,
    },
}

fn main() -> cli::CliResult<()> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(cli))
}

async fn run(cli: Cli) -> cli::CliResult<()> {
    match cli.command {
        Commands::Keygen { force } => cli::cmd_keygen(&cli.key_file, force)?,

        Commands::Start {
            tcp_addr,
            http_addr,
            sync,
            poll_interval,
            read_timeout,
            build_program,
            artifact,
        } => {
            let sync_strategy = match sync {
                SyncMode::Edge => SyncStrategy::EdgeTriggered,
                SyncMode::Poll => SyncStrategy::PollAndDiff {
                    interval: Duration::from_secs(poll_interval.max(1)),
                },
            };

            let config = MasterConfig {
                tcp_addr,
                http_addr,
                config_path: cli.config,
                key_path: cli.key_file,
                sync_strategy,
                read_timeout: read_timeout.map(Duration::from_secs),
                update: UpdateConfig {
                    build_program,
                    artifact,
                    ..Default::default()
                },
            };
            cli::cmd_start(config).await?;
        }

        Commands::Routes { action } => {
            let store = ConfigStore::open(&cli.config)?;
            match action {
                RouteCommands::List => cli::cmd_routes_list(&store).await?,
                RouteCommands::Add {
                    domain,
                    host,
                    port,
                    id,
                } => {
                    cli::cmd_routes_add(&store, id, &domain, &host, port).await?;
                }
                RouteCommands::Remove { id } => cli::cmd_routes_remove(&store, &id).await?,
            }
        }

        Commands::Nodes { action } => {
            let store = ConfigStore::open(&cli.config)?;
            match action {
                NodeCommands::List => cli::cmd_nodes_list(&store).await?,
                NodeCommands::Add { id, passphrase } => {
                    cli::cmd_nodes_add(&store, &id, passphrase).await?;
                }
                NodeCommands::Remove { id } => cli::cmd_nodes_remove(&store, &id).await?,
            }
        }
    }

    Ok(())
}
