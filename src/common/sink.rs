//! Sink write channel
//!
//! The engine consumes a sink through two narrow traits: a registry that
//! opens one writer per stream per run, and the writer itself. The
//! physical format (Parquet files, warehouse tables, ...) is an external
//! concern. A writer is owned exclusively by its stream's worker and is
//! closed exactly once on exit, success or error.

use crate::common::{CanonicalRecord, Result, StreamDescriptor, SyncError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Per-stream write handle.
#[async_trait]
pub trait RecordWriter: Send {
    /// Durably hand one record to the sink.
    ///
    /// Returning `Ok` is the signal the orchestrator needs before it may
    /// advance the stream's checkpoint past this record.
    async fn write(&mut self, record: CanonicalRecord) -> Result<()>;

    /// Flush and release the writer.
    async fn close(&mut self) -> Result<()>;
}

/// Registry handing out per-stream writers.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Open the write channel for a stream's sync run.
    async fn open_writer(&self, stream: &StreamDescriptor) -> Result<Box<dyn RecordWriter>>;
}

/// In-memory sink collecting records per stream (testing, embedding).
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    records: Arc<RwLock<HashMap<String, Vec<CanonicalRecord>>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records written for a stream so far.
    pub async fn records(&self, stream_id: &str) -> Vec<CanonicalRecord> {
        self.records
            .read()
            .await
            .get(stream_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of records written for a stream so far.
    pub async fn len(&self, stream_id: &str) -> usize {
        self.records
            .read()
            .await
            .get(stream_id)
            .map_or(0, |r| r.len())
    }
}

struct MemoryWriter {
    stream_id: String,
    records: Arc<RwLock<HashMap<String, Vec<CanonicalRecord>>>>,
    closed: bool,
}

#[async_trait]
impl RecordWriter for MemoryWriter {
    async fn write(&mut self, record: CanonicalRecord) -> Result<()> {
        if self.closed {
            return Err(SyncError::sink("writer already closed"));
        }
        let mut records = self.records.write().await;
        records.entry(self.stream_id.clone()).or_default().push(record);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn open_writer(&self, stream: &StreamDescriptor) -> Result<Box<dyn RecordWriter>> {
        Ok(Box::new(MemoryWriter {
            stream_id: stream.id(),
            records: Arc::clone(&self.records),
            closed: false,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{Operation, RecordNormalizer};
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_sink_isolates_streams() {
        let sink = MemorySink::new();
        let orders = StreamDescriptor::cdc("inventory", "orders");
        let users = StreamDescriptor::cdc("inventory", "users");

        let mut normalizer = RecordNormalizer::new(vec![]);
        let record = normalizer.normalize(
            Operation::Insert,
            json!({"id": 1}).as_object().cloned().unwrap(),
        );

        let mut writer = sink.open_writer(&orders).await.unwrap();
        writer.write(record).await.unwrap();
        writer.close().await.unwrap();

        assert_eq!(sink.len("inventory.orders").await, 1);
        assert_eq!(sink.len(&users.id()).await, 0);
    }
}
