//! Events queued by the helper and drained through `poll_events`.

use serde::{Deserialize, Serialize};

use crate::Tip;

/// Event exactly as it arrives on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TipList {
    pub tips: Vec<Tip>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TipDeleted {
    pub tip_id: String,
    #[serde(default)]
    pub reason: String,
}

/// The helper asking the host to run a language-model completion on its behalf.
///
/// The host answers with the `complete_response` RPC, echoing `request_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompleteRequest {
    pub request_id: String,
    pub directory: String,
    pub prompt: String,
    pub user_message: String,
    #[serde(default)]
    pub temperature: f64,
    #[serde(default)]
    pub response_format: Option<String>,
}

/// A decoded helper event.
///
/// Unknown kinds are carried through untouched so newer helpers don't break
/// older hosts.
#[derive(Debug, Clone, PartialEq)]
pub enum HelperEvent {
    Tips(TipList),
    TipDeleted(TipDeleted),
    Complete(CompleteRequest),
    Other {
        kind: String,
        data: serde_json::Value,
    },
}

impl HelperEvent {
    /// Decode the payload of a known event kind.
    ///
    /// Fails only when a known kind carries a payload of the wrong shape.
    pub fn decode(raw: RawEvent) -> Result<Self, serde_json::Error> {
        match raw.kind.as_str() {
            "tips" => serde_json::from_value(raw.data).map(Self::Tips),
            "tip_deleted" => serde_json::from_value(raw.data).map(Self::TipDeleted),
            "complete" => serde_json::from_value(raw.data).map(Self::Complete),
            _ => Ok(Self::Other {
                kind: raw.kind,
                data: raw.data,
            }),
        }
    }

    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::Tips(_) => "tips",
            Self::TipDeleted(_) => "tip_deleted",
            Self::Complete(_) => "complete",
            Self::Other { kind, .. } => kind,
        }
    }
}
