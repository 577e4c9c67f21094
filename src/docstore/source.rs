//! Document-store source adapter

use crate::common::{
    ChangeFeed, Chunk, ChunkSet, Position, RawChange, RawRow, Result, SourceAdapter, StateScope,
    StreamDescriptor,
};
use crate::docstore::client::{ChangeStream, DocumentClient};
use crate::docstore::decoder::{decode_change, decode_row};
use crate::docstore::snapshot::chunks_from_split_points;
use async_trait::async_trait;
use tracing::debug;

/// Token-based [`SourceAdapter`] over a [`DocumentClient`].
///
/// Every stream has its own change stream and resume token, so state is
/// per-stream, stored under the `_data` field.
pub struct DocStoreAdapter<C> {
    client: C,
}

impl<C: DocumentClient> DocStoreAdapter<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    /// The wrapped client.
    pub fn client(&self) -> &C {
        &self.client
    }
}

struct DocStoreFeed {
    stream: Box<dyn ChangeStream>,
    last_token: String,
}

#[async_trait]
impl ChangeFeed for DocStoreFeed {
    async fn next(&mut self) -> Result<Option<RawChange>> {
        loop {
            match self.stream.try_next().await? {
                Some(doc) => {
                    self.last_token = doc.resume_token.clone();
                    // Non-data events advance the token but yield nothing.
                    if let Some(change) = decode_change(&doc)? {
                        return Ok(Some(change));
                    }
                }
                None => return Ok(None),
            }
        }
    }

    fn checkpoint(&self) -> Position {
        Position::new(self.last_token.clone())
    }
}

#[async_trait]
impl<C: DocumentClient> SourceAdapter for DocStoreAdapter<C> {
    fn state_scope(&self, stream: &StreamDescriptor) -> StateScope {
        StateScope::Stream(stream.id())
    }

    fn position_field(&self) -> &'static str {
        "_data"
    }

    async fn current_position(&self, stream: &StreamDescriptor) -> Result<Position> {
        // An un-consumed stream's token is the "now" snapshot; the
        // stream is dropped without reading any events.
        let feed = self
            .client
            .watch(&stream.namespace, &stream.name, None)
            .await?;
        let token = feed.resume_token();
        debug!(stream = %stream, token = %token, "Captured current feed position");
        Ok(Position::new(token))
    }

    async fn open_feed(
        &self,
        stream: &StreamDescriptor,
        from: &Position,
    ) -> Result<Box<dyn ChangeFeed>> {
        let inner = self
            .client
            .watch(&stream.namespace, &stream.name, Some(from.as_str()))
            .await?;
        Ok(Box::new(DocStoreFeed {
            stream: inner,
            last_token: from.as_str().to_string(),
        }))
    }

    async fn plan_chunks(&self, stream: &StreamDescriptor, target_rows: u64) -> Result<ChunkSet> {
        let points = self
            .client
            .split_points(&stream.namespace, &stream.name, target_rows)
            .await?;
        Ok(chunks_from_split_points(points))
    }

    async fn read_chunk(&self, stream: &StreamDescriptor, chunk: &Chunk) -> Result<Vec<RawRow>> {
        let docs = self
            .client
            .scan_range(
                &stream.namespace,
                &stream.name,
                chunk.lower.as_deref(),
                chunk.upper.as_deref(),
            )
            .await?;
        docs.iter().map(decode_row).collect()
    }
}
