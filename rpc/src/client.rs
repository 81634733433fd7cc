//! Request/response client for one helper endpoint.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use reqwest::StatusCode;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use thiserror::Error;
use tipsd_types::{HelperEvent, RawEvent, Tip};

use crate::migrate::{patch_tip, patch_tips};
use crate::protocol::{Request, parse_response};

/// Default per-call deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("request timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),
    #[error("helper responded with HTTP {status}")]
    Status { status: u16 },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed response: {0}")]
    Parse(String),
    #[error("helper error {code}: {message}")]
    Remote { code: i64, message: String },
    #[error("response id {actual:?} does not match request id {expected}")]
    IdMismatch { expected: u64, actual: Option<u64> },
}

/// Shared connection pool for every helper endpoint.
///
/// Helpers listen on loopback, so proxies and redirects are disabled.
fn http_client() -> &'static reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .no_proxy()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::error!("Failed to build HTTP client: {e}. Using defaults.");
                reqwest::Client::new()
            })
    })
}

/// JSON-RPC client bound to one port.
///
/// Clones share the request-id counter.
#[derive(Debug, Clone)]
pub struct RpcClient {
    http: reqwest::Client,
    url: String,
    timeout: Duration,
    next_id: Arc<AtomicU64>,
}

impl RpcClient {
    #[must_use]
    pub fn new(port: u16) -> Self {
        Self::with_host("localhost", port)
    }

    #[must_use]
    pub fn with_host(host: &str, port: u16) -> Self {
        Self {
            http: http_client().clone(),
            url: format!("http://{host}:{port}/rpc"),
            timeout: DEFAULT_TIMEOUT,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Call `method` and deserialize its result.
    pub async fn invoke<P, R>(&self, method: &str, params: P) -> Result<R, RpcError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let result = self.invoke_value(method, params).await?;
        decode(result)
    }

    async fn invoke_value<P: Serialize>(&self, method: &str, params: P) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = Request::new(id, method, params);

        let exchange = async {
            let response = self
                .http
                .post(&self.url)
                .json(&request)
                .send()
                .await
                .map_err(transport_error)?;

            let status = response.status();
            if status != StatusCode::OK {
                return Err(RpcError::Status {
                    status: status.as_u16(),
                });
            }
            response
                .json::<Value>()
                .await
                .map_err(|e| RpcError::Parse(e.to_string()))
        };

        let frame = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| RpcError::Timeout(self.timeout))??;

        parse_response(frame, id).inspect_err(|e| {
            tracing::debug!(method, "RPC call failed: {e}");
        })
    }

    // ========================================================================
    // Helper methods
    // ========================================================================

    pub async fn fetch_tip(&self, tip_id: &str) -> Result<Tip, RpcError> {
        tracing::debug!(tip_id, "Fetching tip");
        let mut tip = self.invoke_value("fetch_tip", json!({ "tip_id": tip_id })).await?;
        patch_tip(&mut tip);
        decode(tip)
    }

    /// `limit` of `None` (or zero) lets the helper choose.
    pub async fn list_tips(&self, limit: Option<usize>) -> Result<Vec<Tip>, RpcError> {
        tracing::debug!(?limit, "Listing tips");
        let params = match limit.filter(|&n| n > 0) {
            Some(limit) => json!({ "limit": limit }),
            None => json!({}),
        };
        let mut tips = self.invoke_value("list_tips", params).await?;
        patch_tips(&mut tips);
        decode(tips)
    }

    pub async fn suggest(&self, new_only: bool) -> Result<(), RpcError> {
        tracing::debug!(new_only, "Suggesting tips");
        self.invoke_value("suggest", json!({ "new_only": new_only }))
            .await
            .map(drop)
    }

    pub async fn explain_tip(&self, tip_id: &str) -> Result<String, RpcError> {
        tracing::debug!(tip_id, "Explaining tip");
        let result = self
            .invoke_value("explain_tip", json!({ "tip_id": tip_id }))
            .await?;
        result
            .get("explanation")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| RpcError::Parse("explain_tip result has no explanation".to_string()))
    }

    pub async fn apply_tip(&self, tip_id: &str) -> Result<(), RpcError> {
        tracing::debug!(tip_id, "Applying tip");
        self.invoke_value("apply_tip", json!({ "tip_id": tip_id }))
            .await
            .map(drop)
    }

    pub async fn delete_tip(&self, tip_id: &str) -> Result<(), RpcError> {
        tracing::debug!(tip_id, "Deleting tip");
        self.invoke_value("delete_tip", json!({ "tip_id": tip_id }))
            .await
            .map(drop)
    }

    /// Tell the helper that files changed on disk.
    pub async fn changed(&self, file_names: &[String]) -> Result<(), RpcError> {
        tracing::debug!(
            count = file_names.len(),
            first = file_names.first().map(String::as_str),
            "Notifying helper of changed files"
        );
        self.invoke_value("changed", json!({ "file_names": file_names }))
            .await
            .map(drop)
    }

    /// Drain the helper's event queue.
    ///
    /// A known event kind whose payload does not decode is passed through as
    /// [`HelperEvent::Other`] rather than failing the whole batch.
    pub async fn poll_events(&self) -> Result<Vec<HelperEvent>, RpcError> {
        let raw: Vec<RawEvent> = self.invoke("poll_events", json!({})).await?;
        Ok(raw.into_iter().map(decode_event).collect())
    }

    /// Answer a `complete` request the helper issued.
    pub async fn complete_response(&self, request_id: &str, response: Value) -> Result<(), RpcError> {
        tracing::debug!(request_id, "Sending completion response");
        self.invoke_value(
            "complete_response",
            json!({ "request_id": request_id, "response": response }),
        )
        .await
        .map(drop)
    }
}

fn decode<R: DeserializeOwned>(value: Value) -> Result<R, RpcError> {
    serde_json::from_value(value).map_err(|e| RpcError::Parse(e.to_string()))
}

fn transport_error(error: reqwest::Error) -> RpcError {
    RpcError::Transport(error.without_url().to_string())
}

fn decode_event(mut raw: RawEvent) -> HelperEvent {
    if raw.kind == "tips"
        && let Some(tips) = raw.data.get_mut("tips")
    {
        patch_tips(tips);
    }

    let kind = raw.kind.clone();
    let data = raw.data.clone();
    HelperEvent::decode(raw).unwrap_or_else(|e| {
        tracing::warn!(%kind, "Undecodable helper event: {e}");
        HelperEvent::Other { kind, data }
    })
}
