//! Change-document decoding
//!
//! Turns raw change notifications and scanned documents into payloads
//! the normalizer can hash: object-shaped, with backend identifier
//! wrappers rewritten to portable strings.
//!
//! Document stores serialize internal types as extended-JSON singletons
//! (`{"$oid": "..."}`, `{"$date": ...}`, `{"$numberLong": "..."}`).
//! Those are flattened to plain strings at this boundary - imprecise
//! typing beats silently dropped fields. Everything else passes through
//! unmodified.

use crate::common::{Operation, RawChange, RawRow, Result, SyncError};
use crate::docstore::ChangeDocument;
use serde_json::{Map, Value};

/// Payload field carrying the source operation type, mirrored from the
/// change notification.
pub const CDC_TYPE_FIELD: &str = "cdc_type";

/// Document identifier field backfill chunks are keyed by.
pub const ID_FIELD: &str = "_id";

/// Decode one change notification.
///
/// Returns `Ok(None)` for non-data events (`drop`, `invalidate`,
/// `rename`, ...) - the feed filter, not an error. A data event whose
/// payload is missing or not an object is a [`SyncError::Decode`].
pub fn decode_change(doc: &ChangeDocument) -> Result<Option<RawChange>> {
    let op = match doc.operation_type.as_str() {
        "insert" => Operation::Insert,
        "update" | "replace" => Operation::Update,
        "delete" => Operation::Delete,
        _ => return Ok(None),
    };

    // Deletes only carry the document key; updates may lose their
    // post-image to a later delete, in which case the key is all that
    // is left to forward.
    let source = doc
        .full_document
        .as_ref()
        .or(doc.document_key.as_ref())
        .ok_or_else(|| {
            SyncError::decode(format!(
                "{} change without document payload",
                doc.operation_type
            ))
        })?;

    let mut payload = as_object(source)?;
    payload.insert(
        CDC_TYPE_FIELD.to_string(),
        Value::String(doc.operation_type.clone()),
    );
    normalize_identifiers(&mut payload);

    Ok(Some(RawChange { op, payload }))
}

/// Decode one scanned document into a backfill row.
pub fn decode_row(doc: &Value) -> Result<RawRow> {
    let mut payload = as_object(doc)?;
    normalize_identifiers(&mut payload);
    Ok(RawRow { payload })
}

fn as_object(value: &Value) -> Result<Map<String, Value>> {
    value
        .as_object()
        .cloned()
        .ok_or_else(|| SyncError::decode(format!("expected document object, got {value}")))
}

/// Rewrite extended-JSON identifier wrappers to plain strings, at any
/// nesting depth.
fn normalize_identifiers(payload: &mut Map<String, Value>) {
    for value in payload.values_mut() {
        normalize_value(value);
    }
}

fn normalize_value(value: &mut Value) {
    match value {
        Value::Object(map) => {
            if let Some(flat) = flatten_wrapper(map) {
                *value = Value::String(flat);
            } else {
                for nested in map.values_mut() {
                    normalize_value(nested);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                normalize_value(item);
            }
        }
        _ => {}
    }
}

/// A single-entry object whose key starts with `$` is an extended-JSON
/// wrapper; everything else is an ordinary nested document.
fn flatten_wrapper(map: &Map<String, Value>) -> Option<String> {
    if map.len() != 1 {
        return None;
    }
    let (key, inner) = map.iter().next()?;
    if !key.starts_with('$') {
        return None;
    }
    Some(match inner {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn change(op: &str, full_document: Option<Value>, key: Option<Value>) -> ChangeDocument {
        ChangeDocument {
            operation_type: op.to_string(),
            full_document,
            document_key: key,
            resume_token: "tok".to_string(),
        }
    }

    #[test]
    fn test_decode_insert() {
        let doc = change(
            "insert",
            Some(json!({"_id": {"$oid": "6543ab"}, "status": "open"})),
            None,
        );
        let raw = decode_change(&doc).unwrap().unwrap();

        assert_eq!(raw.op, Operation::Insert);
        assert_eq!(raw.payload["_id"], json!("6543ab"));
        assert_eq!(raw.payload[CDC_TYPE_FIELD], json!("insert"));
        assert_eq!(raw.payload["status"], json!("open"));
    }

    #[test]
    fn test_decode_delete_uses_document_key() {
        let doc = change("delete", None, Some(json!({"_id": {"$oid": "6543ab"}})));
        let raw = decode_change(&doc).unwrap().unwrap();

        assert_eq!(raw.op, Operation::Delete);
        assert_eq!(raw.payload["_id"], json!("6543ab"));
        assert_eq!(raw.payload[CDC_TYPE_FIELD], json!("delete"));
    }

    #[test]
    fn test_decode_filters_non_data_events() {
        assert!(decode_change(&change("drop", None, None)).unwrap().is_none());
        assert!(decode_change(&change("invalidate", None, None))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_decode_rejects_missing_payload() {
        let err = decode_change(&change("insert", None, None)).unwrap_err();
        assert!(matches!(err, SyncError::Decode(_)));

        let err = decode_change(&change("insert", Some(json!("not an object")), None)).unwrap_err();
        assert!(matches!(err, SyncError::Decode(_)));
    }

    #[test]
    fn test_identifier_normalization_is_recursive() {
        let row = decode_row(&json!({
            "_id": {"$oid": "6543ab"},
            "created": {"$date": 1700000000000i64},
            "amount": {"$numberLong": "42"},
            "items": [{"ref": {"$oid": "aa11"}}],
            "nested": {"inner": {"$oid": "bb22"}},
            "plain": {"a": 1, "b": 2}
        }))
        .unwrap();

        assert_eq!(row.payload["_id"], json!("6543ab"));
        assert_eq!(row.payload["created"], json!("1700000000000"));
        assert_eq!(row.payload["amount"], json!("42"));
        assert_eq!(row.payload["items"][0]["ref"], json!("aa11"));
        assert_eq!(row.payload["nested"]["inner"], json!("bb22"));
        // Ordinary nested documents are untouched.
        assert_eq!(row.payload["plain"], json!({"a": 1, "b": 2}));
    }
}
