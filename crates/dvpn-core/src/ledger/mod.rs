//! Ledger collaborators: the quota/subscription read oracle and the
//! settlement write path.

pub mod client;
pub mod settlement;
pub mod transport;
pub mod types;

pub use client::QueryClient;
pub use settlement::{HttpSettlement, Settlement};
pub use transport::{QueryTransport, RpcTransport};
pub use types::{Account, LedgerNode, NodeStatus, Quota, SessionUsage, Status, Subscription};
