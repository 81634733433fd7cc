//! JSON-RPC 2.0 envelopes.

use serde::Serialize;
use serde_json::Value;

use crate::RpcError;

#[derive(Debug, Serialize)]
pub(crate) struct Request<'a, P: Serialize> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: P,
}

impl<'a, P: Serialize> Request<'a, P> {
    pub fn new(id: u64, method: &'a str, params: P) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

/// Extract the `result` of a response frame.
///
/// An `error` member wins over everything else; otherwise the id must match
/// the request and a `result` member must be present (it may be `null`).
pub(crate) fn parse_response(frame: Value, expected_id: u64) -> Result<Value, RpcError> {
    let Value::Object(mut frame) = frame else {
        return Err(RpcError::Parse("response is not a JSON object".to_string()));
    };

    if let Some(error) = frame.remove("error").filter(|e| !e.is_null()) {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or_default();
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| error.to_string(), String::from);
        return Err(RpcError::Remote { code, message });
    }

    match frame.get("id").and_then(Value::as_u64) {
        Some(id) if id == expected_id => {}
        other => {
            return Err(RpcError::IdMismatch {
                expected: expected_id,
                actual: other,
            });
        }
    }

    frame
        .remove("result")
        .ok_or_else(|| RpcError::Parse("response has neither result nor error".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_envelope() {
        let request = Request::new(7, "list_tips", json!({ "limit": 5 }));
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({ "jsonrpc": "2.0", "id": 7, "method": "list_tips", "params": { "limit": 5 } })
        );
    }

    #[test]
    fn result_is_extracted() {
        let frame = json!({ "jsonrpc": "2.0", "id": 3, "result": [1, 2] });
        assert_eq!(parse_response(frame, 3).unwrap(), json!([1, 2]));
    }

    #[test]
    fn null_result_is_valid() {
        let frame = json!({ "jsonrpc": "2.0", "id": 3, "result": null });
        assert_eq!(parse_response(frame, 3).unwrap(), Value::Null);
    }

    #[test]
    fn error_object_is_remote_error() {
        let frame = json!({
            "jsonrpc": "2.0",
            "id": 3,
            "error": { "code": -32601, "message": "Method not found" }
        });
        match parse_response(frame, 3) {
            Err(RpcError::Remote { code, message }) => {
                assert_eq!(code, -32601);
                assert_eq!(message, "Method not found");
            }
            other => panic!("expected Remote, got {other:?}"),
        }
    }

    #[test]
    fn mismatched_id_is_rejected() {
        let frame = json!({ "jsonrpc": "2.0", "id": 4, "result": 1 });
        assert!(matches!(
            parse_response(frame, 3),
            Err(RpcError::IdMismatch {
                expected: 3,
                actual: Some(4)
            })
        ));
    }

    #[test]
    fn missing_result_is_parse_error() {
        let frame = json!({ "jsonrpc": "2.0", "id": 3 });
        assert!(matches!(parse_response(frame, 3), Err(RpcError::Parse(_))));
        assert!(matches!(
            parse_response(json!("nope"), 3),
            Err(RpcError::Parse(_))
        ));
    }
}
