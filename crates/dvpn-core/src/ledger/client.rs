//! Typed ledger queries.

use super::transport::QueryTransport;
use super::types::{amount, Account, LedgerNode, Quota, Subscription};
use crate::error::{NodeError, NodeResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

pub const QUERY_ACCOUNT_PATH: &str = "custom/auth/account";
pub const QUERY_NODE_PATH: &str = "custom/vpn/node/query_node";
pub const QUERY_SUBSCRIPTION_PATH: &str = "custom/vpn/subscription/query_subscription";
pub const QUERY_QUOTA_PATH: &str = "custom/vpn/subscription/query_quota";
pub const QUERY_NODES_FOR_PLAN_PATH: &str = "custom/vpn/plan/query_nodes_for_plan";

#[derive(Debug, Serialize)]
pub(crate) struct AddressParams<'a> {
    pub address: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct IdParams {
    #[serde(with = "amount")]
    pub id: u64,
}

#[derive(Debug, Serialize)]
pub(crate) struct QuotaParams<'a> {
    #[serde(with = "amount")]
    pub id: u64,
    pub address: &'a str,
}

/// Read oracle over a [`QueryTransport`].
#[derive(Clone)]
pub struct QueryClient {
    transport: Arc<dyn QueryTransport>,
}

impl QueryClient {
    pub fn new(transport: Arc<dyn QueryTransport>) -> Self {
        Self { transport }
    }

    /// Encode `params` as JSON, query `path` and decode the result.
    pub async fn query<P, R>(&self, path: &str, params: &P) -> NodeResult<Option<R>>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let data = serde_json::to_vec(params)
            .map_err(|e| NodeError::oracle_with_source(format!("Invalid params for {}", path), e))?;

        match self.transport.query(path, data).await? {
            None => Ok(None),
            Some(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
                NodeError::oracle_with_source(format!("Invalid result for {}", path), e)
            }),
        }
    }

    pub async fn query_account(&self, address: &str) -> NodeResult<Option<Account>> {
        self.query(QUERY_ACCOUNT_PATH, &AddressParams { address }).await
    }

    pub async fn query_node(&self, address: &str) -> NodeResult<Option<LedgerNode>> {
        self.query(QUERY_NODE_PATH, &AddressParams { address }).await
    }

    pub async fn query_subscription(&self, id: u64) -> NodeResult<Option<Subscription>> {
        self.query(QUERY_SUBSCRIPTION_PATH, &IdParams { id }).await
    }

    pub async fn query_quota(&self, id: u64, address: &str) -> NodeResult<Option<Quota>> {
        self.query(QUERY_QUOTA_PATH, &QuotaParams { id, address }).await
    }

    /// Whether plan `id` includes the node at `address`.
    pub async fn has_node_for_plan(&self, id: u64, address: &str) -> NodeResult<bool> {
        let nodes: Option<Vec<LedgerNode>> =
            self.query(QUERY_NODES_FOR_PLAN_PATH, &IdParams { id }).await?;
        Ok(nodes
            .unwrap_or_default()
            .iter()
            .any(|node| node.address == address))
    }
}
