//! dvpn-node
//!
//! dVPN access node daemon: serves WireGuard peers, meters their traffic and
//! enforces the byte quota recorded on the ledger.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;

use dvpn_common::config::{load_node_config, resolve_home, NodeConfig, CONFIG_FILE_NAME};
use dvpn_core::config::CONFIG_FILE_NAME as WIREGUARD_CONFIG_FILE_NAME;
use dvpn_core::ledger::{HttpSettlement, QueryClient, RpcTransport};
use dvpn_core::service::SystemRunner;
use dvpn_core::{
    AddressPool, Node, NodeSettings, ServiceKind, SessionStore, TunnelService, WireGuardConfig,
};

#[derive(Parser)]
#[command(name = "dvpn-node")]
#[command(version)]
#[command(about = "dVPN access node daemon")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the node
    Start {
        /// Node home directory (default: ~/.dvpn-node)
        #[arg(long)]
        home: Option<PathBuf>,

        /// Path to config file (default: <home>/config.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Write default config.toml and wireguard.toml into the node home
    ///
    /// The WireGuard private key is generated fresh.
    Init {
        /// Node home directory (default: ~/.dvpn-node)
        #[arg(long)]
        home: Option<PathBuf>,

        /// Ledger address of this node
        #[arg(long, default_value = "")]
        address: String,

        /// Overwrite existing files
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    match &args.command {
        Command::Start { home, config } => {
            let home = resolve_home(home.as_deref())?;
            let config_path = config
                .as_deref()
                .map(dvpn_common::config::expand_tilde)
                .unwrap_or_else(|| home.join(CONFIG_FILE_NAME));
            run_node(&home, &config_path).await
        }
        Command::Init {
            home,
            address,
            force,
        } => {
            let home = resolve_home(home.as_deref())?;
            init_home(&home, address, *force)
        }
    }
}

fn init_home(home: &Path, address: &str, force: bool) -> Result<()> {
    let wg_path = home.join(WIREGUARD_CONFIG_FILE_NAME);
    if wg_path.exists() && !force {
        anyhow::bail!(
            "File already exists: {}. Use --force to overwrite.",
            wg_path.display()
        );
    }

    NodeConfig::new(address).save(&home.join(CONFIG_FILE_NAME), force)?;

    let wireguard = WireGuardConfig::generate();
    wireguard
        .save(&wg_path)
        .context("Failed to write WireGuard config")?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(&wg_path)?.permissions();
        perms.set_mode(0o600);
        std::fs::set_permissions(&wg_path, perms)?;
    }

    let keypair = wireguard
        .keypair()
        .context("Generated WireGuard key is invalid")?;
    log::info!("WireGuard config saved to: {}", wg_path.display());
    println!("WireGuard public key: {}", keypair.public_key_base64());
    if address.is_empty() {
        println!(
            "Set [node] address in {} before starting the node.",
            home.join(CONFIG_FILE_NAME).display()
        );
    }
    Ok(())
}

async fn run_node(home: &Path, config_path: &Path) -> Result<()> {
    let config = load_node_config(config_path)?
        .validate()
        .with_context(|| format!("Invalid config file: {}", config_path.display()))?;

    log::info!("Starting node {} from {}", config.address, home.display());

    let pool = Arc::new(
        AddressPool::new(config.pool_ipv4, config.pool_ipv6).context("Invalid address pool")?,
    );
    log::info!(
        "Address pool {} / {} ({} pairs)",
        config.pool_ipv4,
        config.pool_ipv6,
        pool.capacity()
    );

    let kind: ServiceKind = config.service_type.parse()?;
    match kind {
        ServiceKind::WireGuard => {
            let wg_path = home.join(WIREGUARD_CONFIG_FILE_NAME);
            WireGuardConfig::load(&wg_path)?
                .check_pool(&pool)
                .with_context(|| format!("[pool] conflicts with {}", wg_path.display()))?;
        }
    }

    let mut service = kind.build(pool, Arc::new(SystemRunner));
    service
        .initialize(home)
        .await
        .context("Failed to initialize tunnel service")?;
    let kind = service.kind();
    log::info!("Service {} (type {}) info: {}", kind, kind.code(), hex::encode(service.info()));
    let service: Arc<dyn TunnelService> = Arc::from(service);

    let transport = RpcTransport::new(&config.rpc_url, config.timeout)?;
    let settlement = HttpSettlement::new(&config.settlement_url, config.timeout)?;

    let settings = NodeSettings {
        address: config.address.clone(),
        operator: config.operator.clone(),
        interval_status: config.interval_status,
        interval_sessions: config.interval_sessions,
    };
    let node = Arc::new(Node::new(
        settings,
        service.clone(),
        Arc::new(SessionStore::new()),
        QueryClient::new(Arc::new(transport)),
        Arc::new(settlement),
    ));

    node.verify_registration()
        .await
        .context("Node registration check failed")?;

    service.start().await.context("Failed to start tunnel service")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => log::info!("Received shutdown signal"),
            Err(e) => log::error!("Failed to listen for shutdown signal: {}", e),
        }
        let _ = shutdown_tx.send(true);
    });

    let result = node.run(shutdown_rx).await;

    if let Err(e) = service.stop().await {
        log::warn!("Failed to stop tunnel service: {}", e);
    }

    result.context("Node stopped with error")
}
