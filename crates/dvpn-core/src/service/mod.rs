//! Tunnel service capability.
//!
//! The reconciliation jobs only talk to [`TunnelService`]; which backend
//! sits behind it is decided once at startup from [`ServiceKind`].

pub mod command;
pub mod wireguard;

use crate::error::{NodeError, NodeResult};
use crate::pool::AddressPool;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

pub use command::{CommandOutput, CommandRunner, SystemRunner};
pub use wireguard::WireGuardService;

/// Cumulative transfer counters of one backend peer, as observed now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerTransferSample {
    /// Base64 public key.
    pub identity: String,
    pub upload: u64,
    pub download: u64,
}

/// Backend-agnostic tunnel capability.
#[async_trait]
pub trait TunnelService: Send + Sync {
    fn kind(&self) -> ServiceKind;

    /// Load backend configuration from `home`, install the runtime
    /// configuration and derive the service info.
    async fn initialize(&mut self, home: &Path) -> NodeResult<()>;

    /// Descriptor advertised to clients and the ledger.
    fn info(&self) -> &[u8];

    async fn start(&self) -> NodeResult<()>;

    async fn stop(&self) -> NodeResult<()>;

    /// Provision a peer and return its packed address pair (v4 then v6).
    async fn add_peer(&self, key: &[u8]) -> NodeResult<Vec<u8>>;

    /// Deprovision a peer. Removing an absent peer succeeds.
    async fn remove_peer(&self, key: &[u8]) -> NodeResult<()>;

    /// Cumulative counters for every peer the backend knows about.
    async fn peers(&self) -> NodeResult<Vec<PeerTransferSample>>;

    /// Number of locally tracked peers.
    fn peers_count(&self) -> usize;
}

/// Available tunnel backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    WireGuard,
}

impl ServiceKind {
    /// Numeric service type registered on the ledger.
    pub fn code(&self) -> u64 {
        match self {
            ServiceKind::WireGuard => 1,
        }
    }

    /// Construct the backend for this kind.
    ///
    /// Call `initialize` on the returned box, then move it into an `Arc`.
    pub fn build(
        self,
        pool: Arc<AddressPool>,
        runner: Arc<dyn CommandRunner>,
    ) -> Box<dyn TunnelService> {
        match self {
            ServiceKind::WireGuard => Box::new(WireGuardService::new(pool, runner)),
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceKind::WireGuard => write!(f, "wireguard"),
        }
    }
}

impl FromStr for ServiceKind {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "wireguard" => Ok(ServiceKind::WireGuard),
            other => Err(NodeError::config(format!(
                "Service type '{}' is not supported",
                other
            ))),
        }
    }
}
