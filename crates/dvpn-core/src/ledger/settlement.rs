//! Write path towards the ledger: status heartbeats and usage batches.

use super::types::{NodeStatus, SessionUsage};
use crate::error::{NodeError, NodeResult};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

/// Accepts node status and per-tick usage deltas for settlement.
///
/// Idempotency and retries are the implementor's concern.
#[async_trait]
pub trait Settlement: Send + Sync {
    async fn update_status(&self, status: &NodeStatus) -> NodeResult<()>;

    async fn update_sessions(&self, sessions: &[SessionUsage]) -> NodeResult<()>;
}

#[derive(Serialize)]
struct SessionsRequest<'a> {
    sessions: &'a [SessionUsage],
}

/// Posts status and usage as JSON to a settlement endpoint.
pub struct HttpSettlement {
    base_url: String,
    http: reqwest::Client,
}

impl HttpSettlement {
    pub fn new(base_url: &str, timeout: Duration) -> NodeResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NodeError::config_with_source("Failed to build settlement client", e))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    async fn post<T: Serialize + ?Sized>(&self, endpoint: &str, body: &T) -> NodeResult<()> {
        let url = format!("{}/{}", self.base_url, endpoint);
        self.http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| NodeError::settlement_with_source(format!("POST {} failed", url), e))?
            .error_for_status()
            .map_err(|e| NodeError::settlement_with_source(format!("POST {} rejected", url), e))?;
        Ok(())
    }
}

#[async_trait]
impl Settlement for HttpSettlement {
    async fn update_status(&self, status: &NodeStatus) -> NodeResult<()> {
        self.post("status", status).await
    }

    async fn update_sessions(&self, sessions: &[SessionUsage]) -> NodeResult<()> {
        log::debug!("Submitting usage for {} session(s)", sessions.len());
        self.post("sessions", &SessionsRequest { sessions }).await
    }
}
