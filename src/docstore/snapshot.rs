//! Backfill chunk planning over `_id` ranges
//!
//! The client supplies interior split points (backends can sample or
//! use native split commands); the planner turns them into half-open
//! `(lower, upper]` ranges covering the whole keyspace, with open ends
//! so documents inserted during planning still land in a chunk.

use crate::common::{Chunk, ChunkSet};

/// Build a chunk set from ascending interior split points.
///
/// `n` split points produce `n + 1` chunks; no points produce a single
/// full-collection chunk.
pub fn chunks_from_split_points(points: Vec<String>) -> ChunkSet {
    let mut chunks = Vec::with_capacity(points.len() + 1);
    let mut lower: Option<String> = None;

    for point in points {
        chunks.push(Chunk::new(lower.clone(), Some(point.clone())));
        lower = Some(point);
    }
    chunks.push(Chunk::new(lower, None));

    ChunkSet::new(chunks)
}
