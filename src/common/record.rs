//! Canonical record representation and normalization
//!
//! Every captured change - live or backfilled - is converted into a
//! [`CanonicalRecord`] before it reaches a sink. The record carries a
//! deterministic identity hash derived from the stream's configured key
//! fields (or the full payload when none are configured), which is what
//! downstream writers use for deduplication and upserts.
//!
//! Payloads are ordered mappings of field name to JSON value. Backend
//! internal identifier types are rewritten to portable strings at the
//! adapter boundary before normalization; unmappable values arrive here
//! already stringified, never dropped.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Kind of change a record represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Row/document inserted (backfilled rows are inserts)
    Insert,
    /// Row/document updated
    Update,
    /// Row/document deleted
    Delete,
}

impl Operation {
    /// Operation name as emitted in payload metadata.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

/// Normalized, backend-agnostic representation of one captured change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    /// Deterministic fingerprint of the record's logical key (hex SHA-256)
    pub identity: String,
    /// Operation kind
    pub op: Operation,
    /// Field name -> value mapping
    pub payload: Map<String, Value>,
    /// Ingestion sequence within the emitting run (per-stream monotonic)
    pub sequence: u64,
}

/// Compute the identity hash for a payload.
///
/// Hashes `name=value` pairs in ascending field-name order, so the result
/// is independent of the order fields arrived in. When `key_fields` is
/// empty the full payload participates; otherwise only the named fields
/// do, with absent fields hashed as JSON `null` so that adding an
/// unrelated field never changes an entity's identity.
pub fn identity_hash(payload: &Map<String, Value>, key_fields: &[String]) -> String {
    let mut hasher = Sha256::new();

    if key_fields.is_empty() {
        // serde_json::Map iterates in ascending key order
        for (name, value) in payload {
            hash_pair(&mut hasher, name, value);
        }
    } else {
        let mut fields: Vec<&String> = key_fields.iter().collect();
        fields.sort();
        fields.dedup();
        for name in fields {
            hash_pair(&mut hasher, name, payload.get(name).unwrap_or(&Value::Null));
        }
    }

    hex::encode(hasher.finalize())
}

fn hash_pair(hasher: &mut Sha256, name: &str, value: &Value) {
    hasher.update(name.as_bytes());
    hasher.update(b"=");
    hasher.update(value.to_string().as_bytes());
    hasher.update(b";");
}

/// Converts decoded changes and rows into canonical records.
///
/// One normalizer is owned by one stream's worker for the duration of a
/// run; the ingestion sequence counter is scoped to that run.
#[derive(Debug)]
pub struct RecordNormalizer {
    key_fields: Vec<String>,
    next_sequence: u64,
}

impl RecordNormalizer {
    /// Create a normalizer for a stream's configured key fields.
    pub fn new(key_fields: Vec<String>) -> Self {
        Self {
            key_fields,
            next_sequence: 0,
        }
    }

    /// Normalize one decoded change into a canonical record.
    pub fn normalize(&mut self, op: Operation, payload: Map<String, Value>) -> CanonicalRecord {
        let identity = identity_hash(&payload, &self.key_fields);
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        CanonicalRecord {
            identity,
            op,
            payload,
            sequence,
        }
    }

    /// Number of records normalized so far in this run.
    pub fn emitted(&self) -> u64 {
        self.next_sequence
    }
}
