//! Read-side upgrade of tip records from older schema versions.

use serde_json::Value;
use tipsd_types::TipId;

/// Priority assumed for version `1.0` tips, which predate the field.
pub const DEFAULT_PRIORITY: &str = "medium";

/// Fill fields missing from an older tip record in place.
///
/// Only version `1.0` records are touched, and only where the field is absent
/// or null, so newer data is never overwritten. Applying it twice is the same
/// as applying it once.
pub fn patch_tip(tip: &mut Value) {
    let Some(record) = tip.as_object_mut() else {
        return;
    };
    let Some(version) = record
        .get("id")
        .and_then(Value::as_str)
        .and_then(|id| TipId::decode(id).ok())
        .map(|id| id.version().to_string())
    else {
        return;
    };

    if version == "1.0" && record.get("priority").is_none_or(Value::is_null) {
        record.insert(
            "priority".to_string(),
            Value::String(DEFAULT_PRIORITY.to_string()),
        );
    }
}

/// Patch every element of a JSON array of tips.
pub fn patch_tips(tips: &mut Value) {
    if let Some(tips) = tips.as_array_mut() {
        tips.iter_mut().for_each(patch_tip);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tip(version: &str, priority: Option<&str>) -> Value {
        let mut tip = json!({
            "id": TipId::new(version, "/work/app", "t1").encode(),
            "directory": "/work/app",
            "file": "src/main.py",
            "line": 3,
            "type": "bug",
            "label": "Unchecked None",
            "description": "value may be None",
        });
        if let Some(priority) = priority {
            tip["priority"] = json!(priority);
        }
        tip
    }

    #[test]
    fn version_1_0_gets_default_priority() {
        let mut value = tip("1.0", None);
        patch_tip(&mut value);
        assert_eq!(value["priority"], "medium");
    }

    #[test]
    fn patch_is_idempotent() {
        let mut once = tip("1.0", None);
        patch_tip(&mut once);
        let mut twice = once.clone();
        patch_tip(&mut twice);
        assert_eq!(once, twice);
    }

    #[test]
    fn existing_priority_is_kept() {
        let mut value = tip("1.0", Some("high"));
        patch_tip(&mut value);
        assert_eq!(value["priority"], "high");
    }

    #[test]
    fn newer_versions_are_untouched() {
        let mut value = tip("1.1", None);
        let before = value.clone();
        patch_tip(&mut value);
        assert_eq!(value, before);
    }

    #[test]
    fn undecodable_id_is_untouched() {
        let mut value = json!({ "id": "%%%", "label": "x" });
        let before = value.clone();
        patch_tip(&mut value);
        assert_eq!(value, before);
    }

    #[test]
    fn patched_record_deserializes() {
        let mut tips = json!([tip("1.0", None), tip("1.1", Some("low"))]);
        patch_tips(&mut tips);
        let tips: Vec<tipsd_types::Tip> = serde_json::from_value(tips).unwrap();
        assert_eq!(tips[0].priority, "medium");
        assert_eq!(tips[1].priority, "low");
    }
}
