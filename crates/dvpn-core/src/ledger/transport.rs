//! Raw ledger query transport.

use crate::error::{NodeError, NodeResult};
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use std::time::Duration;

/// Path-addressed read access to the ledger.
#[async_trait]
pub trait QueryTransport: Send + Sync {
    /// Run a query; `Ok(None)` means the ledger has no data at that path.
    async fn query(&self, path: &str, data: Vec<u8>) -> NodeResult<Option<Vec<u8>>>;
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<AbciQueryResult>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct AbciQueryResult {
    response: AbciResponse,
}

#[derive(Debug, Deserialize)]
struct AbciResponse {
    #[serde(default)]
    code: u32,
    #[serde(default)]
    log: String,
    #[serde(default)]
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
    #[serde(default)]
    data: String,
}

/// Tendermint RPC `abci_query` transport.
pub struct RpcTransport {
    url: String,
    http: reqwest::Client,
}

impl RpcTransport {
    pub fn new(rpc_url: &str, timeout: Duration) -> NodeResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NodeError::config_with_source("Failed to build RPC client", e))?;

        Ok(Self {
            url: format!("{}/abci_query", rpc_url.trim_end_matches('/')),
            http,
        })
    }
}

#[async_trait]
impl QueryTransport for RpcTransport {
    async fn query(&self, path: &str, data: Vec<u8>) -> NodeResult<Option<Vec<u8>>> {
        log::debug!("abci_query {}", path);

        let params = [
            ("path", format!("\"{}\"", path)),
            ("data", format!("0x{}", hex::encode(&data))),
        ];
        let response = self
            .http
            .get(&self.url)
            .query(&params)
            .send()
            .await
            .map_err(|e| NodeError::oracle_with_source(format!("Query {} failed", path), e))?
            .error_for_status()
            .map_err(|e| NodeError::oracle_with_source(format!("Query {} failed", path), e))?;

        let parsed: RpcResponse = response.json().await.map_err(|e| {
            NodeError::oracle_with_source(format!("Invalid RPC response for {}", path), e)
        })?;

        decode_response(path, parsed)
    }
}

fn decode_response(path: &str, parsed: RpcResponse) -> NodeResult<Option<Vec<u8>>> {
    if let Some(err) = parsed.error {
        return Err(NodeError::oracle(format!(
            "RPC error {} for {}: {} {}",
            err.code, path, err.message, err.data
        )));
    }

    let result = parsed
        .result
        .ok_or_else(|| NodeError::oracle(format!("Empty RPC result for {}", path)))?;
    let response = result.response;
    if response.code != 0 {
        return Err(NodeError::oracle(format!(
            "Query {} returned code {}: {}",
            path, response.code, response.log
        )));
    }

    match response.value.filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(value) => base64::engine::general_purpose::STANDARD
            .decode(value)
            .map(Some)
            .map_err(|e| NodeError::oracle_with_source(format!("Invalid value for {}", path), e)),
    }
}
