//! Kernel WireGuard backend driven through `wg` and `wg-quick`.

use super::{CommandOutput, CommandRunner, PeerTransferSample, ServiceKind, TunnelService};
use crate::config::{WireGuardConfig, CONFIG_FILE_NAME};
use crate::error::{NodeError, NodeResult};
use crate::keys::{encode_identity, KEY_LEN};
use crate::pool::{AddressPair, AddressPool};
use async_trait::async_trait;
use dashmap::DashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Service info layout: listen port (2 bytes, big-endian) + public key.
pub const INFO_LEN: usize = 2 + KEY_LEN;

/// A provisioned peer and the addresses it owns.
#[derive(Debug, Clone)]
struct Peer {
    addresses: AddressPair,
}

pub struct WireGuardService {
    config: WireGuardConfig,
    info: [u8; INFO_LEN],
    /// Local peer records keyed by base64 identity.
    peers: DashMap<String, Peer>,
    /// Held across `wg set` so an add and a remove never interleave.
    provisioning: Mutex<()>,
    pool: Arc<AddressPool>,
    runner: Arc<dyn CommandRunner>,
}

impl WireGuardService {
    pub fn new(pool: Arc<AddressPool>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            config: WireGuardConfig::default(),
            info: [0u8; INFO_LEN],
            peers: DashMap::new(),
            provisioning: Mutex::new(()),
            pool,
            runner,
        }
    }

    async fn wg(&self, args: Vec<String>) -> NodeResult<CommandOutput> {
        self.runner
            .run("wg", &args)
            .await
            .map_err(|e| NodeError::backend_with_source("Failed to execute wg", e))
    }

    async fn wg_quick(&self, action: &str) -> NodeResult<()> {
        let args = vec![action.to_string(), self.config.interface.clone()];
        let output = self
            .runner
            .run("wg-quick", &args)
            .await
            .map_err(|e| NodeError::backend_with_source("Failed to execute wg-quick", e))?;

        if !output.success {
            let stderr = output.stderr_lossy();
            log::warn!("wg-quick {} {} failed: {}", action, self.config.interface, stderr);
            return Err(NodeError::backend(format!(
                "wg-quick {} {} failed: {}",
                action, self.config.interface, stderr
            )));
        }
        Ok(())
    }

    async fn release(&self, identity: &str, addresses: AddressPair) -> NodeResult<()> {
        log::debug!("Releasing {} held by {}", addresses, identity);
        self.pool.release(addresses).await
    }
}

#[async_trait]
impl TunnelService for WireGuardService {
    fn kind(&self) -> ServiceKind {
        ServiceKind::WireGuard
    }

    async fn initialize(&mut self, home: &Path) -> NodeResult<()> {
        let config = WireGuardConfig::load(&home.join(CONFIG_FILE_NAME))?;
        let keypair = config.keypair()?;

        let path = config.interface_config_path();
        tokio::fs::write(&path, config.render()).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            tokio::fs::set_permissions(&path, perms).await?;
        }

        self.info[..2].copy_from_slice(&config.listen_port.to_be_bytes());
        self.info[2..].copy_from_slice(&keypair.public_key_bytes());

        log::info!(
            "WireGuard interface {} configured at {} (port {}, public key {})",
            config.interface,
            path.display(),
            config.listen_port,
            keypair.public_key_base64()
        );

        self.config = config;
        Ok(())
    }

    fn info(&self) -> &[u8] {
        &self.info
    }

    async fn start(&self) -> NodeResult<()> {
        self.wg_quick("up").await
    }

    async fn stop(&self) -> NodeResult<()> {
        self.wg_quick("down").await
    }

    async fn add_peer(&self, key: &[u8]) -> NodeResult<Vec<u8>> {
        if key.len() != KEY_LEN {
            return Err(NodeError::Rejected(format!(
                "Invalid public key length: expected {} bytes, got {}",
                KEY_LEN,
                key.len()
            )));
        }
        let identity = encode_identity(key);
        let _provisioning = self.provisioning.lock().await;
        let addresses = self.pool.get().await?;

        let args = vec![
            "set".to_string(),
            self.config.interface.clone(),
            "peer".to_string(),
            identity.clone(),
            "allowed-ips".to_string(),
            addresses.to_string(),
        ];
        let provisioned = match self.wg(args).await {
            Ok(output) if output.success => Ok(()),
            Ok(output) => {
                let stderr = output.stderr_lossy();
                log::warn!("Failed to add peer {}: {}", identity, stderr);
                Err(NodeError::backend(format!("wg set peer {} failed: {}", identity, stderr)))
            }
            Err(e) => Err(e),
        };
        if let Err(e) = provisioned {
            self.release(&identity, addresses).await?;
            return Err(e);
        }

        // Re-adding an identity replaces its previous record
        if let Some(previous) = self.peers.insert(identity.clone(), Peer { addresses }) {
            self.release(&identity, previous.addresses).await?;
        }

        log::info!("Added peer {} with {}", identity, addresses);
        Ok(addresses.to_bytes().to_vec())
    }

    async fn remove_peer(&self, key: &[u8]) -> NodeResult<()> {
        let identity = encode_identity(key);
        let _provisioning = self.provisioning.lock().await;

        let args = vec![
            "set".to_string(),
            self.config.interface.clone(),
            "peer".to_string(),
            identity.clone(),
            "remove".to_string(),
        ];
        let output = self.wg(args).await?;
        if !output.success {
            let stderr = output.stderr_lossy();
            if is_peer_absent(&stderr) {
                log::debug!("Peer {} already absent: {}", identity, stderr);
            } else {
                log::warn!("Failed to remove peer {}: {}", identity, stderr);
                return Err(NodeError::backend(format!(
                    "wg set peer {} remove failed: {}",
                    identity, stderr
                )));
            }
        }

        if let Some((_, peer)) = self.peers.remove(&identity) {
            self.release(&identity, peer.addresses).await?;
            log::info!("Removed peer {}", identity);
        }
        Ok(())
    }

    async fn peers(&self) -> NodeResult<Vec<PeerTransferSample>> {
        let args = vec![
            "show".to_string(),
            self.config.interface.clone(),
            "transfer".to_string(),
        ];
        let output = self.wg(args).await?;
        if !output.success {
            return Err(NodeError::backend(format!(
                "wg show {} transfer failed: {}",
                self.config.interface,
                output.stderr_lossy()
            )));
        }
        parse_transfer(&String::from_utf8_lossy(&output.stdout))
    }

    fn peers_count(&self) -> usize {
        self.peers.len()
    }
}

/// Parse `wg show <iface> transfer` output (`identity\tdownload\tupload`).
///
/// Lines without exactly three fields are skipped; a counter that is not a
/// number fails the whole listing.
pub fn parse_transfer(output: &str) -> NodeResult<Vec<PeerTransferSample>> {
    let mut samples = Vec::new();
    for line in output.lines() {
        let columns: Vec<&str> = line.split('\t').collect();
        if columns.len() != 3 {
            continue;
        }

        let download = parse_counter(columns[1], columns[0])?;
        let upload = parse_counter(columns[2], columns[0])?;

        samples.push(PeerTransferSample {
            identity: columns[0].to_string(),
            upload,
            download,
        });
    }
    Ok(samples)
}

fn parse_counter(value: &str, identity: &str) -> NodeResult<u64> {
    value.trim().parse::<u64>().map_err(|e| {
        NodeError::backend_with_source(
            format!("Invalid transfer counter '{}' for peer {}", value, identity),
            e,
        )
    })
}

fn is_peer_absent(stderr: &str) -> bool {
    let stderr = stderr.to_ascii_lowercase();
    stderr.contains("no such peer") || stderr.contains("not found")
}
