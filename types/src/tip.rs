//! Tip records and the encoded tip identifier.

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Schema versions a tip id may carry.
pub const SUPPORTED_TIP_VERSIONS: &[&str] = &["1.0", "1.1"];

/// URL-safe alphabet; the helper strips padding, but padded ids are accepted too.
const TIP_ID_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TipIdError {
    #[error("tip id is not valid base64: {0}")]
    Encoding(String),
    #[error("tip id is not valid UTF-8")]
    Utf8,
    #[error("invalid tip id: expected 3 fields, found {0}")]
    FieldCount(usize),
    #[error("unsupported tip id version: {0}")]
    UnsupportedVersion(String),
}

/// Decoded form of a tip identifier.
///
/// On the wire the id is `base64url(version \n directory \n local_id)` with
/// padding stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TipId {
    version: String,
    directory: String,
    local_id: String,
}

impl TipId {
    #[must_use]
    pub fn new(
        version: impl Into<String>,
        directory: impl Into<String>,
        local_id: impl Into<String>,
    ) -> Self {
        Self {
            version: version.into(),
            directory: directory.into(),
            local_id: local_id.into(),
        }
    }

    pub fn decode(encoded: &str) -> Result<Self, TipIdError> {
        let bytes = TIP_ID_ENGINE
            .decode(encoded.trim())
            .map_err(|e| TipIdError::Encoding(e.to_string()))?;
        let text = String::from_utf8(bytes).map_err(|_| TipIdError::Utf8)?;

        let fields: Vec<&str> = text.split('\n').collect();
        let [version, directory, local_id] = fields.as_slice() else {
            return Err(TipIdError::FieldCount(fields.len()));
        };
        if !SUPPORTED_TIP_VERSIONS.contains(version) {
            return Err(TipIdError::UnsupportedVersion((*version).to_string()));
        }

        Ok(Self::new(*version, *directory, *local_id))
    }

    #[must_use]
    pub fn encode(&self) -> String {
        let joined = format!("{}\n{}\n{}", self.version, self.directory, self.local_id);
        TIP_ID_ENGINE.encode(joined.as_bytes())
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Directory the helper was analysing when it produced the tip.
    #[must_use]
    pub fn directory(&self) -> &str {
        &self.directory
    }

    #[must_use]
    pub fn local_id(&self) -> &str {
        &self.local_id
    }
}

/// An analysis result produced by the helper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tip {
    /// Encoded [`TipId`].
    pub id: String,
    pub directory: String,
    pub file: String,
    pub line: u32,
    #[serde(rename = "type")]
    pub kind: String,
    pub label: String,
    pub description: String,
    pub priority: String,
    #[serde(default)]
    pub complexity: String,
    #[serde(default)]
    pub context: String,
}

impl Tip {
    /// Decode this tip's id.
    pub fn tip_id(&self) -> Result<TipId, TipIdError> {
        TipId::decode(&self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_helper_issued_id() {
        let id = TipId::decode(
            "MS4xCi9Vc2Vycy9rZ2lscGluL3NvdXJjZS9rZ2lscGluL29wZW50aXBzLXZzY29kZQppWERBa0R2OU8zQ0VKR1hvbE9xaHpxWTJ2RmNUQUd1N2dwRUhCbU0zUDlv",
        )
        .unwrap();
        assert_eq!(id.version(), "1.1");
        assert_eq!(id.directory(), "/Users/kgilpin/source/kgilpin/opentips-vscode");
        assert_eq!(id.local_id(), "iXDAkDv9O3CEJGXolOqhzqY2vFcTAGu7gpEHBmM3P9o");
    }

    #[test]
    fn encode_strips_padding() {
        let id = TipId::new("1.0", "/work/app", "tip-7");
        assert_eq!(id.encode(), "MS4wCi93b3JrL2FwcAp0aXAtNw");
        assert_eq!(TipId::decode(&id.encode()).unwrap(), id);
    }

    #[test]
    fn padded_id_is_accepted() {
        let id = TipId::decode("MS4wCi93b3JrL2FwcAp0aXAtNw==").unwrap();
        assert_eq!(id.local_id(), "tip-7");
    }

    #[test]
    fn rejects_unsupported_version() {
        let encoded = TipId::new("2.0", "/work", "x").encode();
        assert_eq!(
            TipId::decode(&encoded),
            Err(TipIdError::UnsupportedVersion("2.0".to_string()))
        );
    }

    #[test]
    fn rejects_wrong_field_count() {
        let encoded = TIP_ID_ENGINE.encode(b"1.0\n/work");
        assert_eq!(TipId::decode(&encoded), Err(TipIdError::FieldCount(2)));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            TipId::decode("not base64 at all!"),
            Err(TipIdError::Encoding(_))
        ));
    }

    #[test]
    fn tip_deserializes_with_type_field() {
        let tip: Tip = serde_json::from_value(serde_json::json!({
            "id": "MS4wCi93b3JrL2FwcAp0aXAtNw",
            "directory": "/work/app",
            "file": "src/main.py",
            "line": 12,
            "type": "performance",
            "label": "Cache lookup",
            "description": "Repeated dictionary lookup in a loop",
            "priority": "high"
        }))
        .unwrap();
        assert_eq!(tip.kind, "performance");
        assert!(tip.context.is_empty());
        assert_eq!(tip.tip_id().unwrap().directory(), "/work/app");
    }
}
