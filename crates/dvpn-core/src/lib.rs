//! Core of the dVPN access node.
//!
//! The node terminates client tunnels, meters each peer's traffic and
//! enforces the byte quota recorded on the ledger:
//! - **pool**: paired IPv4/IPv6 address allocation for peers
//! - **session**: in-memory usage records keyed by peer public key
//! - **service**: backend-agnostic tunnel capability, WireGuard via `wg`
//! - **ledger**: quota/subscription queries and the settlement write path
//! - **jobs**: the status heartbeat and the usage reconciliation loop
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                          Node                            │
//! ├──────────────────────────────────────────────────────────┤
//! │  sessions job ──► TunnelService.peers() ──► SessionStore │
//! │        │                                                 │
//! │        ├──► QueryClient.query_quota() ──► evict / keep   │
//! │        └──► Settlement.update_sessions(batch)            │
//! ├──────────────────────────────────────────────────────────┤
//! │  status job ──► Settlement.update_status()               │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod jobs;
pub mod keys;
pub mod ledger;
pub mod node;
pub mod pool;
pub mod service;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenience
pub use config::WireGuardConfig;
pub use error::{NodeError, NodeResult};
pub use jobs::{EvictionReason, TickReport};
pub use keys::WgKeyPair;
pub use node::{Node, NodeSettings};
pub use pool::{AddressPair, AddressPool};
pub use service::{ServiceKind, TunnelService};
pub use session::{Session, SessionStore};
