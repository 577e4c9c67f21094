//! Stream identity and per-stream sync configuration
//!
//! A stream is one replicable unit: a collection in a document store or
//! a table in a relational system. Descriptors are produced by external
//! discovery/config and are immutable for the duration of a run.

use serde::{Deserialize, Serialize};

/// How a stream is synchronized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Chunked full load on every run; no live feed, no resume position.
    FullRefresh,
    /// One-time backfill when no usable state exists, then live change
    /// consumption with durable resume positions.
    #[default]
    Cdc,
}

/// One replicable unit: namespace + name plus its sync configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    /// Namespace (database or schema)
    pub namespace: String,
    /// Stream name (collection or table)
    pub name: String,
    /// Configured sync mode
    pub sync_mode: SyncMode,
    /// Fields the identity hash is derived from.
    ///
    /// Empty means "hash the full payload".
    pub key_fields: Vec<String>,
}

impl StreamDescriptor {
    /// Create a descriptor with the default (CDC) sync mode.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            sync_mode: SyncMode::default(),
            key_fields: Vec::new(),
        }
    }

    /// Create a CDC stream descriptor.
    pub fn cdc(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(namespace, name)
    }

    /// Create a full-refresh stream descriptor.
    pub fn full_refresh(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        let mut stream = Self::new(namespace, name);
        stream.sync_mode = SyncMode::FullRefresh;
        stream
    }

    /// Set the sync mode.
    pub fn with_sync_mode(mut self, mode: SyncMode) -> Self {
        self.sync_mode = mode;
        self
    }

    /// Set the key fields used for identity hashing.
    pub fn with_key_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Fully qualified stream identifier (`namespace.name`).
    pub fn id(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }
}

impl std::fmt::Display for StreamDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}
