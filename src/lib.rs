//! # driftwatch - Resumable CDC Synchronization
//!
//! A change-data-capture sync engine that unifies token-based replay
//! (change-stream resume tokens) and position-based replay (replication
//! log positions) behind one per-stream state machine.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                     SyncController                        │
//! │        (bounded fan-out, per-stream error isolation)      │
//! └─────────────┬─────────────────────────────────────────────┘
//!               │ one task per stream
//!               ▼
//! ┌───────────────────────────────────────────────────────────┐
//! │                      StreamSyncer                         │
//! │   DECIDE ──► BACKFILL (optional) ──► STREAM ⟲ CHECKPOINT  │
//! └──────┬───────────────┬───────────────────┬────────────────┘
//!        │               │                   │
//!        ▼               ▼                   ▼
//! ┌────────────┐  ┌──────────────┐  ┌────────────────┐
//! │ StateStore │  │ SourceAdapter│  │   RecordSink   │
//! │ positions, │  │ feeds, chunk │  │ one writer per │
//! │ chunk sets │  │    reads     │  │ stream per run │
//! └────────────┘  └──────────────┘  └────────────────┘
//! ```
//!
//! Every change is normalized into a [`CanonicalRecord`] with a stable
//! identity hash before it reaches the sink, and the resume position is
//! persisted only after the sink has accepted the change
//! (checkpoint-after-emit, at-least-once).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # async fn example(client: impl driftwatch::docstore::DocumentClient + 'static) -> driftwatch::Result<()> {
//! use std::sync::Arc;
//! use driftwatch::{MemoryStateStore, MemorySink, StreamDescriptor, StreamSyncer, SyncController};
//! use driftwatch::docstore::DocStoreAdapter;
//! use tokio_util::sync::CancellationToken;
//!
//! let syncer = StreamSyncer::new(
//!     Arc::new(DocStoreAdapter::new(client)),
//!     Arc::new(MemoryStateStore::new()),
//!     Arc::new(MemorySink::new()),
//! );
//!
//! let streams = vec![StreamDescriptor::cdc("inventory", "orders").with_key_fields(["_id"])];
//! let report = SyncController::new(Arc::new(syncer))
//!     .run(&CancellationToken::new(), streams)
//!     .await;
//! report.into_result()
//! # }
//! ```

pub mod common;
pub mod docstore;

pub use common::{
    BackfillConfig, BackfillExecutor, CanonicalRecord, ChangeFeed, Chunk, ChunkSet,
    ControllerConfig, FileStateStore, MemorySink, MemoryStateStore, Operation, Position, RawChange,
    RawRow, RecordNormalizer, RecordSink, RecordWriter, Result, SourceAdapter, StateScope,
    StateStore, StreamDescriptor, StreamSyncer, SyncController, SyncError, SyncMode, SyncReport,
    SyncerConfig,
};
