//! # Durable Sync State
//!
//! Resume positions and backfill progress, persisted per scope.
//!
//! ## Scopes
//!
//! Some backends expose one change feed for the whole database; others
//! expose one per stream. The adapter declares which it needs via
//! [`StateScope`] and the rest of the engine never branches on it:
//!
//! - [`StateScope::Global`] - one shared feed/cursor per source
//! - [`StateScope::Stream`] - independent cursor per stream
//!
//! ## Persisted layout
//!
//! One JSON document per scope:
//!
//! ```json
//! {
//!   "positions": { "_data": "8264be63..." },
//!   "chunks": [ { "lower": null, "upper": "100", "done": true } ]
//! }
//! ```
//!
//! All operations are keyed, last-writer-wins, and safe for concurrent
//! use by independent streams. No cross-key transactionality is offered;
//! a write failure is fatal to the owning stream's sync only.

use crate::common::{Result, SyncError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Opaque, source-specific resume cursor.
///
/// A resume token string, a stringified log sequence number - the engine
/// never inspects or compares the contents, it only stores and replays
/// them. Ordering is backend-defined.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Position(String);

impl Position {
    /// Wrap a backend-specific cursor value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw cursor value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One bounded backfill unit: a key range processed atomically.
///
/// `lower` is exclusive, `upper` inclusive; `None` bounds are open ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Lower bound (exclusive), None for the first chunk
    pub lower: Option<String>,
    /// Upper bound (inclusive), None for the last chunk
    pub upper: Option<String>,
    /// Whether every row of this chunk has been accepted by the sink
    pub done: bool,
}

impl Chunk {
    /// Create a pending chunk covering `(lower, upper]`.
    pub fn new(lower: Option<String>, upper: Option<String>) -> Self {
        Self {
            lower,
            upper,
            done: false,
        }
    }

    fn same_range(&self, other: &Chunk) -> bool {
        self.lower == other.lower && self.upper == other.upper
    }
}

/// The set of backfill chunks for a scope, done or pending.
///
/// An absent set, like one with pending chunks, means "backfill
/// required". Once every chunk is done the stream is caught up and
/// subsequent runs resume from the stored position alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkSet {
    chunks: Vec<Chunk>,
}

impl ChunkSet {
    /// Create a chunk set.
    pub fn new(chunks: Vec<Chunk>) -> Self {
        Self { chunks }
    }

    /// All chunks, done and pending.
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Chunks not yet completed.
    pub fn pending(&self) -> Vec<Chunk> {
        self.chunks.iter().filter(|c| !c.done).cloned().collect()
    }

    /// True if any chunk still needs processing.
    pub fn has_pending(&self) -> bool {
        self.chunks.iter().any(|c| !c.done)
    }

    /// Total number of chunks.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// True if the set holds no chunks at all.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Mark the chunk with the given range as done.
    pub fn mark_done(&mut self, chunk: &Chunk) {
        if let Some(c) = self.chunks.iter_mut().find(|c| c.same_range(chunk)) {
            c.done = true;
        }
    }
}

/// Granularity at which state is stored, declared by the adapter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateScope {
    /// One shared feed/cursor for all streams of the source.
    Global,
    /// Independent cursor per stream, keyed by the stream id.
    Stream(String),
}

impl StateScope {
    /// Stable key this scope's state document is stored under.
    pub fn key(&self) -> String {
        match self {
            StateScope::Global => "global".to_string(),
            StateScope::Stream(id) => format!("stream.{id}"),
        }
    }
}

impl std::fmt::Display for StateScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key())
    }
}

/// State document for one scope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ScopeState {
    /// Resume positions by field name
    #[serde(default)]
    positions: HashMap<String, Position>,
    /// Backfill progress, if a backfill has been planned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    chunks: Option<ChunkSet>,
}

/// Durable per-scope state storage.
///
/// Point-in-time read-your-writes consistency per key; independent keys
/// need no cross-stream locking.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Read the resume position stored under `field`, if any.
    async fn position(&self, scope: &StateScope, field: &str) -> Result<Option<Position>>;

    /// Store the resume position under `field` (last-writer-wins).
    async fn set_position(&self, scope: &StateScope, field: &str, position: Position)
        -> Result<()>;

    /// Read the backfill chunk set, if one was ever planned.
    async fn chunks(&self, scope: &StateScope) -> Result<Option<ChunkSet>>;

    /// Store the backfill chunk set (last-writer-wins).
    async fn set_chunks(&self, scope: &StateScope, chunks: ChunkSet) -> Result<()>;
}

/// In-memory state store (testing, or embedding without durability).
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    scopes: RwLock<HashMap<String, ScopeState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn position(&self, scope: &StateScope, field: &str) -> Result<Option<Position>> {
        let scopes = self.scopes.read().await;
        Ok(scopes
            .get(&scope.key())
            .and_then(|s| s.positions.get(field))
            .cloned())
    }

    async fn set_position(
        &self,
        scope: &StateScope,
        field: &str,
        position: Position,
    ) -> Result<()> {
        let mut scopes = self.scopes.write().await;
        scopes
            .entry(scope.key())
            .or_default()
            .positions
            .insert(field.to_string(), position);
        Ok(())
    }

    async fn chunks(&self, scope: &StateScope) -> Result<Option<ChunkSet>> {
        let scopes = self.scopes.read().await;
        Ok(scopes.get(&scope.key()).and_then(|s| s.chunks.clone()))
    }

    async fn set_chunks(&self, scope: &StateScope, chunks: ChunkSet) -> Result<()> {
        let mut scopes = self.scopes.write().await;
        scopes.entry(scope.key()).or_default().chunks = Some(chunks);
        Ok(())
    }
}

/// File-backed state store.
///
/// Persists one JSON document per scope with atomic temp-file + rename
/// writes and an in-memory cache for reads. Existing documents are
/// loaded on startup.
pub struct FileStateStore {
    base_dir: PathBuf,
    cache: RwLock<HashMap<String, ScopeState>>,
    fsync: bool,
}

impl FileStateStore {
    /// Create a store rooted at `base_dir`, creating the directory and
    /// loading any existing state documents.
    pub async fn new(base_dir: impl AsRef<Path>) -> Result<Self> {
        Self::with_options(base_dir, true).await
    }

    /// Create a store with explicit fsync behavior.
    pub async fn with_options(base_dir: impl AsRef<Path>, fsync: bool) -> Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        fs::create_dir_all(&base_dir).await.map_err(SyncError::Io)?;

        let store = Self {
            base_dir,
            cache: RwLock::new(HashMap::new()),
            fsync,
        };
        store.load_all().await?;
        Ok(store)
    }

    async fn load_all(&self) -> Result<()> {
        let mut entries = fs::read_dir(&self.base_dir).await.map_err(SyncError::Io)?;
        let mut loaded = 0usize;

        while let Some(entry) = entries.next_entry().await.map_err(SyncError::Io)? {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "json") {
                let Some(key) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                match fs::read_to_string(&path).await {
                    Ok(contents) => match serde_json::from_str::<ScopeState>(&contents) {
                        Ok(state) => {
                            self.cache.write().await.insert(key.to_string(), state);
                            loaded += 1;
                        }
                        Err(e) => warn!(key = %key, error = %e, "Skipping unreadable state document"),
                    },
                    Err(e) => warn!(key = %key, error = %e, "Failed to read state document"),
                }
            }
        }

        if loaded > 0 {
            info!(
                count = loaded,
                dir = %self.base_dir.display(),
                "Loaded sync state documents"
            );
        }
        Ok(())
    }

    fn file_path(&self, key: &str) -> PathBuf {
        self.base_dir.join(format!("{key}.json"))
    }

    fn validate_key(key: &str) -> Result<()> {
        if key.is_empty() || key.contains('/') || key.contains('\\') {
            return Err(SyncError::state(format!("invalid state key {key:?}")));
        }
        Ok(())
    }

    async fn persist(&self, key: &str, state: &ScopeState) -> Result<()> {
        let file_path = self.file_path(key);
        let temp_path = file_path.with_extension("tmp");

        let json = serde_json::to_string_pretty(state)?;

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .await
            .map_err(SyncError::Io)?;
        file.write_all(json.as_bytes())
            .await
            .map_err(SyncError::Io)?;
        if self.fsync {
            file.sync_all().await.map_err(SyncError::Io)?;
        }

        fs::rename(&temp_path, &file_path)
            .await
            .map_err(SyncError::Io)?;

        debug!(key = %key, "Persisted sync state");
        Ok(())
    }

    async fn update<F>(&self, scope: &StateScope, apply: F) -> Result<()>
    where
        F: FnOnce(&mut ScopeState),
    {
        let key = scope.key();
        Self::validate_key(&key)?;

        let mut cache = self.cache.write().await;
        let mut state = cache.get(&key).cloned().unwrap_or_default();
        apply(&mut state);
        self.persist(&key, &state).await?;
        cache.insert(key, state);
        Ok(())
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn position(&self, scope: &StateScope, field: &str) -> Result<Option<Position>> {
        let cache = self.cache.read().await;
        Ok(cache
            .get(&scope.key())
            .and_then(|s| s.positions.get(field))
            .cloned())
    }

    async fn set_position(
        &self,
        scope: &StateScope,
        field: &str,
        position: Position,
    ) -> Result<()> {
        self.update(scope, |state| {
            state.positions.insert(field.to_string(), position);
        })
        .await
    }

    async fn chunks(&self, scope: &StateScope) -> Result<Option<ChunkSet>> {
        let cache = self.cache.read().await;
        Ok(cache.get(&scope.key()).and_then(|s| s.chunks.clone()))
    }

    async fn set_chunks(&self, scope: &StateScope, chunks: ChunkSet) -> Result<()> {
        self.update(scope, |state| {
            state.chunks = Some(chunks);
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn stream_scope() -> StateScope {
        StateScope::Stream("inventory.orders".to_string())
    }

    #[test]
    fn test_scope_keys() {
        assert_eq!(StateScope::Global.key(), "global");
        assert_eq!(stream_scope().key(), "stream.inventory.orders");
    }

    #[test]
    fn test_chunk_set_pending() {
        let mut set = ChunkSet::new(vec![
            Chunk::new(None, Some("100".into())),
            Chunk::new(Some("100".into()), Some("200".into())),
        ]);
        assert!(set.has_pending());
        assert_eq!(set.pending().len(), 2);

        let first = set.chunks()[0].clone();
        set.mark_done(&first);
        assert_eq!(set.pending().len(), 1);
        assert_eq!(set.pending()[0].lower, Some("100".to_string()));

        let second = set.chunks()[1].clone();
        set.mark_done(&second);
        assert!(!set.has_pending());
        assert_eq!(set.len(), 2);
    }

    #[tokio::test]
    async fn test_memory_store_positions() {
        let store = MemoryStateStore::new();
        let scope = stream_scope();

        assert_eq!(store.position(&scope, "_data").await.unwrap(), None);

        store
            .set_position(&scope, "_data", Position::new("T0"))
            .await
            .unwrap();
        assert_eq!(
            store.position(&scope, "_data").await.unwrap(),
            Some(Position::new("T0"))
        );

        // Last writer wins
        store
            .set_position(&scope, "_data", Position::new("T1"))
            .await
            .unwrap();
        assert_eq!(
            store.position(&scope, "_data").await.unwrap(),
            Some(Position::new("T1"))
        );

        // Independent field names and scopes don't interfere
        assert_eq!(store.position(&scope, "lsn").await.unwrap(), None);
        assert_eq!(
            store.position(&StateScope::Global, "_data").await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_file_store_survives_restart() {
        let dir = tempdir().unwrap();
        let scope = stream_scope();

        let store = FileStateStore::new(dir.path()).await.unwrap();
        store
            .set_position(&scope, "_data", Position::new("T1"))
            .await
            .unwrap();
        let mut chunks = ChunkSet::new(vec![Chunk::new(None, Some("100".into()))]);
        let chunk = chunks.chunks()[0].clone();
        chunks.mark_done(&chunk);
        store.set_chunks(&scope, chunks.clone()).await.unwrap();

        // Simulate restart
        let store2 = FileStateStore::new(dir.path()).await.unwrap();
        assert_eq!(
            store2.position(&scope, "_data").await.unwrap(),
            Some(Position::new("T1"))
        );
        assert_eq!(store2.chunks(&scope).await.unwrap(), Some(chunks));
    }

    #[tokio::test]
    async fn test_file_store_global_scope() {
        let dir = tempdir().unwrap();
        let store = FileStateStore::new(dir.path()).await.unwrap();

        store
            .set_position(&StateScope::Global, "lsn", Position::new("0/1234ABCD"))
            .await
            .unwrap();

        let store2 = FileStateStore::new(dir.path()).await.unwrap();
        assert_eq!(
            store2.position(&StateScope::Global, "lsn").await.unwrap(),
            Some(Position::new("0/1234ABCD"))
        );
    }

    #[tokio::test]
    async fn test_file_store_rejects_bad_keys() {
        let dir = tempdir().unwrap();
        let store = FileStateStore::new(dir.path()).await.unwrap();

        let bad = StateScope::Stream("../escape".to_string());
        assert!(store
            .set_position(&bad, "_data", Position::new("T0"))
            .await
            .is_err());
    }
}
