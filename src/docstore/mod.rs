//! # Document-Store Source
//!
//! Token-based source adapter for document databases that expose a
//! change stream with opaque resume tokens (the MongoDB family).
//!
//! The adapter consumes a deployment-provided [`DocumentClient`] - the
//! backend's existing protocol client behind a narrow interface - and
//! translates its concepts into the engine's:
//!
//! - resume token string -> opaque [`Position`](crate::common::Position),
//!   stored per stream under the `_data` field
//! - change stream -> [`ChangeFeed`](crate::common::ChangeFeed)
//! - `_id`-ordered range scans -> backfill chunks
//!
//! Change documents are decoded into portable payloads: extended-JSON
//! wrapped identifiers (`{"$oid": ...}` and friends) are rewritten to
//! plain strings, and the operation type is stamped into the payload
//! under `cdc_type`.

mod client;
mod decoder;
mod snapshot;
mod source;

pub use client::{ChangeDocument, ChangeStream, DocumentClient};
pub use decoder::{decode_change, decode_row, CDC_TYPE_FIELD, ID_FIELD};
pub use snapshot::chunks_from_split_points;
pub use source::DocStoreAdapter;
