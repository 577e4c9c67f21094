//! Source adapter capability interface
//!
//! A backend family implements [`SourceAdapter`] once and the rest of
//! the engine stays untouched: resume semantics (token string vs. log
//! position) hide behind the opaque [`Position`] type, state granularity
//! behind [`StateScope`], and the live feed behind [`ChangeFeed`].
//!
//! Capturing "now" ([`SourceAdapter::current_position`]) is deliberately
//! decoupled from opening a feed at a position
//! ([`SourceAdapter::open_feed`]): the orchestrator snapshots a safe
//! resume point before scanning existing data, independent of how the
//! backend represents that snapshot.

use crate::common::{Chunk, ChunkSet, Operation, Position, Result, StateScope, StreamDescriptor};
use async_trait::async_trait;
use serde_json::{Map, Value};

/// One decoded live change, ready for normalization.
#[derive(Debug, Clone)]
pub struct RawChange {
    /// Operation kind reported by the source
    pub op: Operation,
    /// Decoded payload with backend identifiers already made portable
    pub payload: Map<String, Value>,
}

/// One decoded backfill row, ready for normalization.
#[derive(Debug, Clone)]
pub struct RawRow {
    /// Decoded payload with backend identifiers already made portable
    pub payload: Map<String, Value>,
}

/// A live change feed opened at a concrete position.
#[async_trait]
pub trait ChangeFeed: Send {
    /// Wait for the next change.
    ///
    /// Blocks until a change is available or an error occurs; returns
    /// `Ok(None)` on graceful end-of-stream (rare; most feeds are
    /// unbounded). Cancellation is handled by the caller racing this
    /// future against a cancellation token.
    async fn next(&mut self) -> Result<Option<RawChange>>;

    /// Resumable position after the last successfully returned change.
    fn checkpoint(&self) -> Position;
}

/// Capability set a conforming source backend implements.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// State granularity this backend needs.
    fn state_scope(&self, stream: &StreamDescriptor) -> StateScope;

    /// Field name resume positions are stored under for this backend.
    fn position_field(&self) -> &'static str {
        "position"
    }

    /// Obtain the feed position for "now" without consuming any events.
    ///
    /// Used to capture the pre-backfill checkpoint. Must not block
    /// indefinitely; fails with [`SyncError::Connection`] if the feed
    /// cannot be opened.
    ///
    /// [`SyncError::Connection`]: crate::common::SyncError::Connection
    async fn current_position(&self, stream: &StreamDescriptor) -> Result<Position>;

    /// Open (or resume) a live change feed at the given position.
    ///
    /// Fails with [`SyncError::ResumeTokenExpired`] - fatal and
    /// non-retryable - when the backend has garbage-collected the
    /// requested position, and [`SyncError::Connection`] otherwise.
    ///
    /// [`SyncError::ResumeTokenExpired`]: crate::common::SyncError::ResumeTokenExpired
    /// [`SyncError::Connection`]: crate::common::SyncError::Connection
    async fn open_feed(
        &self,
        stream: &StreamDescriptor,
        from: &Position,
    ) -> Result<Box<dyn ChangeFeed>>;

    /// Partition the stream's current data into backfill chunks.
    ///
    /// The strategy is backend-specific (e.g. primary-key range buckets
    /// sized by a row-count target).
    async fn plan_chunks(&self, stream: &StreamDescriptor, target_rows: u64) -> Result<ChunkSet>;

    /// Read every row of one backfill chunk.
    async fn read_chunk(&self, stream: &StreamDescriptor, chunk: &Chunk) -> Result<Vec<RawRow>>;
}
