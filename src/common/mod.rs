//! # Common Sync Types and Traits
//!
//! Backend-agnostic abstractions for the CDC sync engine:
//!
//! - [`SyncError`] - Error taxonomy with retriability classification
//! - [`StreamDescriptor`] - One replicable unit (namespace + name)
//! - [`CanonicalRecord`] / [`RecordNormalizer`] - Normalized change representation
//! - [`Position`] / [`ChunkSet`] / [`StateStore`] - Durable resume state
//! - [`SourceAdapter`] / [`ChangeFeed`] - Capability interface a backend implements
//! - [`RecordSink`] / [`RecordWriter`] - Downstream write channel
//! - [`BackfillExecutor`] - Chunked full load with per-chunk checkpointing
//! - [`StreamSyncer`] - Per-stream DECIDE/BACKFILL/STREAM state machine
//! - [`SyncController`] - Bounded fan-out across streams with error aggregation

mod backfill;
mod controller;
mod error;
mod orchestrator;
mod record;
mod sink;
mod source;
mod state;
mod stream;

pub use backfill::{BackfillConfig, BackfillExecutor};
pub use controller::{ControllerConfig, SyncController, SyncReport};
pub use error::{Result, SyncError};
pub use orchestrator::{StreamSyncer, SyncerConfig};
pub use record::{CanonicalRecord, Operation, RecordNormalizer};
pub use sink::{MemorySink, RecordSink, RecordWriter};
pub use source::{ChangeFeed, RawChange, RawRow, SourceAdapter};
pub use state::{Chunk, ChunkSet, FileStateStore, MemoryStateStore, Position, StateScope, StateStore};
pub use stream::{StreamDescriptor, SyncMode};
