//! JSON-RPC client for a single shard endpoint.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use crate::error::{Result, RpcError};
use crate::header::{header_is_fresh, Header};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

/// One entry of the sharding structure.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ShardEndpoint {
    /// Shard number
    #[serde(rename = "shardID", default)]
    pub shard_id: u32,
    /// HTTP RPC endpoint of the shard
    pub http: String,
    /// WebSocket endpoint, when advertised
    #[serde(default)]
    pub ws: Option<String>,
    /// Whether this is the shard the queried node belongs to
    #[serde(default)]
    pub current: bool,
}

/// RPC request.
#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: serde_json::Value,
    id: u64,
}

/// RPC response.
#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

/// RPC error object.
#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

/// RPC client bound to one shard endpoint.
#[derive(Debug, Clone)]
pub struct RpcClient {
    url: String,
    client: reqwest::Client,
}

impl RpcClient {
    /// Create a new RPC client. Requests time out after 3 s and redirects
    /// are not followed.
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    /// Endpoint this client talks to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Make an RPC call.
    pub async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: 1,
        };

        let body = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await?
            .bytes()
            .await?;

        let response: RpcResponse<T> = serde_json::from_slice(&body)?;

        if let Some(error) = response.error {
            return Err(RpcError::Node {
                code: error.code,
                message: error.message,
            });
        }

        response
            .result
            .ok_or_else(|| RpcError::Malformed(format!("{} returned no result", method)))
    }

    // ============ Convenience Methods ============

    /// Get the sharding structure of the network.
    pub async fn sharding_structure(&self) -> Result<Vec<ShardEndpoint>> {
        self.call("hmy_getShardingStructure", json!([])).await
    }

    /// Get the latest header of this shard.
    pub async fn latest_header(&self) -> Result<Header> {
        self.call("hmy_latestHeader", json!([])).await
    }

    /// Get the current epoch of this shard.
    pub async fn current_epoch(&self) -> Result<u64> {
        Ok(self.latest_header().await?.epoch)
    }

    /// Look up the HTTP endpoint of `shard` in the sharding structure.
    pub async fn endpoint_of_shard(&self, shard: usize) -> Result<String> {
        let structure = self.sharding_structure().await?;
        structure
            .get(shard)
            .map(|entry| entry.http.clone())
            .ok_or(RpcError::ShardOutOfRange {
                requested: shard,
                available: structure.len(),
            })
    }

    /// Whether the shard produced a header within `tolerance` of now.
    ///
    /// Any transport or parse failure counts as inactive.
    pub async fn is_active(&self, tolerance: Duration) -> bool {
        let now = Utc::now();
        match self.latest_header().await {
            Ok(header) => match header.time() {
                Some(time) => header_is_fresh(time, now, tolerance),
                None => {
                    debug!(endpoint = %self.url, timestamp = %header.timestamp, "unparseable header timestamp");
                    false
                }
            },
            Err(e) => {
                debug!(endpoint = %self.url, error = %e, "latest header unavailable");
                false
            }
        }
    }

    /// Whether the shard is strictly past epoch `n`. Fails closed.
    pub async fn is_after_epoch(&self, n: u64) -> bool {
        match self.current_epoch().await {
            Ok(epoch) => epoch > n,
            Err(e) => {
                debug!(endpoint = %self.url, error = %e, "epoch unavailable");
                false
            }
        }
    }
}

/// Resolve the HTTP endpoint of `shard` using any endpoint of the network.
pub async fn resolve_endpoint(shard: usize, endpoint: &str) -> Result<String> {
    RpcClient::new(endpoint)?.endpoint_of_shard(shard).await
}

/// Whether the shard behind `endpoint` is live and fresh.
pub async fn is_shard_active(endpoint: &str, tolerance: Duration) -> bool {
    match RpcClient::new(endpoint) {
        Ok(client) => client.is_active(tolerance).await,
        Err(_) => false,
    }
}

/// Whether the shard behind `endpoint` is strictly past epoch `n`.
pub async fn is_after_epoch(n: u64, endpoint: &str) -> bool {
    match RpcClient::new(endpoint) {
        Ok(client) => client.is_after_epoch(n).await,
        Err(_) => false,
    }
}
