//! Node context shared by the reconciliation jobs and the connect path.

use crate::error::{NodeError, NodeResult};
use crate::keys::encode_identity;
use crate::ledger::{QueryClient, Settlement, Subscription};
use crate::service::TunnelService;
use crate::session::{Session, SessionStore};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Static node settings resolved from configuration.
#[derive(Debug, Clone)]
pub struct NodeSettings {
    /// Ledger address of this node.
    pub address: String,
    /// Account paying the node's transaction fees, if any.
    pub operator: Option<String>,
    pub interval_status: Duration,
    pub interval_sessions: Duration,
}

/// Everything the jobs need, constructed once at startup.
pub struct Node {
    pub(crate) settings: NodeSettings,
    pub(crate) service: Arc<dyn TunnelService>,
    pub(crate) sessions: Arc<SessionStore>,
    pub(crate) client: QueryClient,
    pub(crate) settlement: Arc<dyn Settlement>,
}

impl Node {
    pub fn new(
        settings: NodeSettings,
        service: Arc<dyn TunnelService>,
        sessions: Arc<SessionStore>,
        client: QueryClient,
        settlement: Arc<dyn Settlement>,
    ) -> Self {
        Self {
            settings,
            service,
            sessions,
            client,
            settlement,
        }
    }

    pub fn settings(&self) -> &NodeSettings {
        &self.settings
    }

    pub fn service(&self) -> &Arc<dyn TunnelService> {
        &self.service
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Check that this node and its operator are known to the ledger.
    pub async fn verify_registration(&self) -> NodeResult<()> {
        let address = &self.settings.address;
        let node = self
            .client
            .query_node(address)
            .await?
            .ok_or_else(|| NodeError::config(format!("Node {} is not registered", address)))?;
        log::info!("Node {} registered with status {:?}", node.address, node.status);

        if let Some(operator) = &self.settings.operator {
            if self.client.query_account(operator).await?.is_none() {
                return Err(NodeError::config(format!(
                    "Operator account {} does not exist",
                    operator
                )));
            }
            log::info!("Operator account {} found", operator);
        }
        Ok(())
    }

    /// Admit a client under `subscription_id` billed to `address`.
    ///
    /// Returns the packed address pair assigned to the peer.
    pub async fn connect_peer(
        &self,
        key: &[u8],
        subscription_id: u64,
        address: &str,
    ) -> NodeResult<Vec<u8>> {
        let subscription = self
            .client
            .query_subscription(subscription_id)
            .await?
            .ok_or_else(|| {
                NodeError::Rejected(format!("Subscription {} does not exist", subscription_id))
            })?;
        if !subscription.is_active() {
            return Err(NodeError::Rejected(format!(
                "Subscription {} is not active",
                subscription_id
            )));
        }
        self.check_subscription_node(&subscription).await?;

        let quota = self
            .client
            .query_quota(subscription_id, address)
            .await?
            .ok_or_else(|| {
                NodeError::Rejected(format!(
                    "No quota for {} under subscription {}",
                    address, subscription_id
                ))
            })?;
        if quota.consumed >= quota.allocated {
            return Err(NodeError::Rejected(format!(
                "Quota of {} under subscription {} is exhausted",
                address, subscription_id
            )));
        }

        let identity = encode_identity(key);
        if self.sessions.get(&identity).is_some() {
            log::info!("Purging stale session of {}", identity);
            self.service.remove_peer(key).await?;
            self.sessions.delete(&identity);
        }

        // The session exists before the peer does, so a sessions tick never
        // sees a provisioned peer without one.
        self.sessions
            .set(Session::new(identity.clone(), subscription_id, address, Instant::now()));
        let addresses = match self.service.add_peer(key).await {
            Ok(addresses) => addresses,
            Err(e) => {
                self.sessions.delete(&identity);
                return Err(e);
            }
        };

        log::info!(
            "Connected peer {} for subscription {} ({})",
            identity,
            subscription_id,
            address
        );
        Ok(addresses)
    }

    async fn check_subscription_node(&self, subscription: &Subscription) -> NodeResult<()> {
        if subscription.node == self.settings.address {
            return Ok(());
        }
        if subscription.plan != 0
            && self
                .client
                .has_node_for_plan(subscription.plan, &self.settings.address)
                .await?
        {
            return Ok(());
        }
        Err(NodeError::Rejected(format!(
            "Subscription {} is not served by node {}",
            subscription.id, self.settings.address
        )))
    }
}
