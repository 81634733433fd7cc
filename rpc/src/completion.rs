//! Answering the helper's `complete` requests.
//!
//! The helper cannot reach a language model itself, so it queues a
//! `complete` event and waits for the host to post the result back with
//! `complete_response`.

use std::future::Future;

use serde_json::{Value, json};
use thiserror::Error;
use tipsd_types::CompleteRequest;

use crate::{RpcClient, RpcError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompletionError {
    #[error("no completion provider is configured")]
    Unavailable,
    #[error("completion failed: {0}")]
    Failed(String),
}

/// Produces completions for the helper.
pub trait CompletionProvider: Send + Sync + 'static {
    /// Text or a JSON object on success. `Ok(None)` means the request was
    /// declined and nothing is sent back.
    fn complete(
        &self,
        request: &CompleteRequest,
    ) -> impl Future<Output = Result<Option<Value>, CompletionError>> + Send;
}

/// Run `provider` for `request` and post the outcome to the helper.
///
/// A provider error is reported to the helper as `{"error": message}` so it
/// stops waiting. Returns whether anything was sent.
pub async fn answer_completion<P: CompletionProvider>(
    provider: &P,
    client: &RpcClient,
    request: &CompleteRequest,
) -> Result<bool, RpcError> {
    let request_id = request.request_id.as_str();
    let response = match provider.complete(request).await {
        Ok(Some(response @ (Value::String(_) | Value::Object(_)))) => response,
        Ok(Some(other)) => {
            tracing::warn!(request_id, "Completion must be text or an object, got {other}");
            return Ok(false);
        }
        Ok(None) => {
            tracing::info!(request_id, "No completion produced");
            return Ok(false);
        }
        Err(e) => {
            tracing::warn!(request_id, "{e}");
            json!({ "error": e.to_string() })
        }
    };

    client.complete_response(request_id, response).await?;
    Ok(true)
}
