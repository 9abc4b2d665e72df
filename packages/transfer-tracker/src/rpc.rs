//! JSON-RPC 2.0 client with ordered fallback endpoints
//!
//! Transport failures move on to the next URL; an error object returned by a
//! node is final and is not retried elsewhere.

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};
use transfer_pipeline::GatewayError;

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug)]
pub struct RpcClient {
    client: Client,
    urls: Vec<String>,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(urls: Vec<String>, timeout: Duration) -> Result<Self, GatewayError> {
        if urls.is_empty() {
            return Err(GatewayError::Transport("at least one RPC URL is required".into()));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            urls,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    /// Call `method`; a `null` result decodes as `None`
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<Option<T>, GatewayError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": id
        });

        let mut last_error = None;
        for url in &self.urls {
            match self.send::<T>(url, &body).await {
                Ok(response) => {
                    if let Some(error) = response.error {
                        return Err(GatewayError::Rpc {
                            code: error.code,
                            message: error.message,
                        });
                    }
                    debug!(method, url = %url, "RPC call succeeded");
                    return Ok(response.result);
                }
                Err(e) => {
                    warn!(method, url = %url, error = %e, "RPC endpoint failed, trying next");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| GatewayError::Transport("no RPC endpoint".into())))
    }

    /// Call `method`; a `null` result is missing chain state
    pub async fn call_required<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, GatewayError> {
        self.call(method, params)
            .await?
            .ok_or_else(|| GatewayError::MissingState(format!("{} returned no result", method)))
    }

    async fn send<T: DeserializeOwned>(
        &self,
        url: &str,
        body: &Value,
    ) -> Result<RpcResponse<T>, GatewayError> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        if !response.status().is_success() {
            return Err(GatewayError::Transport(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }
        response.json().await.map_err(transport_error)
    }
}

fn transport_error(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::Timeout(e.to_string())
    } else {
        GatewayError::Transport(e.to_string())
    }
}
