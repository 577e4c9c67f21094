//! Narrow client interface to a document store
//!
//! Connection and authentication setup live outside the engine; a
//! deployment hands the adapter an implementation of [`DocumentClient`]
//! wrapping its existing driver. Implementations map their driver's
//! failure modes onto the engine taxonomy: a garbage-collected resume
//! token must surface as [`SyncError::ResumeTokenExpired`], everything
//! transient as [`SyncError::Connection`].
//!
//! [`SyncError::ResumeTokenExpired`]: crate::common::SyncError::ResumeTokenExpired
//! [`SyncError::Connection`]: crate::common::SyncError::Connection

use crate::common::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One notification delivered by a change stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeDocument {
    /// Backend operation type (`insert`, `update`, `delete`, but also
    /// non-data events like `drop` or `invalidate`)
    pub operation_type: String,
    /// Full post-image of the document, when the backend supplies one
    pub full_document: Option<Value>,
    /// Key of the affected document (the only payload for deletes)
    pub document_key: Option<Value>,
    /// Resume token valid after this notification
    pub resume_token: String,
}

/// An open change stream over one collection.
#[async_trait]
pub trait ChangeStream: Send {
    /// Wait for the next notification; `Ok(None)` on graceful close.
    async fn try_next(&mut self) -> Result<Option<ChangeDocument>>;

    /// The stream's current resume token, valid even before the first
    /// notification (the "now" snapshot the pre-backfill capture needs).
    fn resume_token(&self) -> String;
}

/// The backend driver surface the adapter needs.
#[async_trait]
pub trait DocumentClient: Send + Sync {
    /// Open a change stream over `namespace.collection`, resuming after
    /// `resume_after` when given, positioned at "now" otherwise.
    async fn watch(
        &self,
        namespace: &str,
        collection: &str,
        resume_after: Option<&str>,
    ) -> Result<Box<dyn ChangeStream>>;

    /// Interior `_id` split points partitioning the collection into
    /// ranges of roughly `target_rows` documents each, in ascending
    /// order. Empty means the collection fits in a single chunk.
    async fn split_points(
        &self,
        namespace: &str,
        collection: &str,
        target_rows: u64,
    ) -> Result<Vec<String>>;

    /// All documents with `_id` in `(lower, upper]`, ascending by `_id`;
    /// `None` bounds are open ends.
    async fn scan_range(
        &self,
        namespace: &str,
        collection: &str,
        lower: Option<&str>,
        upper: Option<&str>,
    ) -> Result<Vec<Value>>;
}
