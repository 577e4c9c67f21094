//! # Per-Stream Sync Orchestration
//!
//! The state machine driving one stream:
//!
//! ```text
//! INIT ──► DECIDE ──► BACKFILL (optional) ──► STREAM ⟲ CHECKPOINT
//!                                               │
//!                                               ▼
//!                                  TERMINATED (error | cancelled)
//! ```
//!
//! - DECIDE reads the stored position and chunk set once per run;
//!   backfill is required unless a stored position and an all-done
//!   chunk set both exist. The decision is never revisited mid-run.
//! - BACKFILL captures a pre-backfill position and persists it before
//!   any chunk read, so the live feed later replays from a point at or
//!   before backfill start (overlap is expected, a gap never is). A
//!   resumed interrupted backfill keeps the originally captured
//!   position for the same reason.
//! - STREAM is the terminal steady state: consume the feed, normalize,
//!   emit, and persist the position only after the sink accepted the
//!   change (checkpoint-after-emit, at-least-once).
//!
//! An expired resume position surfaces immediately - no silent fallback
//! to a fresh backfill, since that can skip data the operator has not
//! opted into re-reading.

use crate::common::{
    BackfillConfig, BackfillExecutor, ChangeFeed, Position, RecordNormalizer, RecordSink,
    RecordWriter, Result, SourceAdapter, StateScope, StateStore, StreamDescriptor, SyncError,
    SyncMode,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Configuration for per-stream sync runs.
#[derive(Debug, Clone)]
pub struct SyncerConfig {
    /// Persist the position after this many emitted changes.
    ///
    /// 1 bounds replay-on-crash to a single change at the cost of one
    /// state write per event; larger windows trade durability overhead
    /// for a larger at-least-once replay bound.
    pub checkpoint_every: u64,
    /// Immediate reopen attempts on a retriable feed-open failure
    /// before the error surfaces to the controller.
    pub feed_reopen_attempts: u32,
    /// Backfill chunk sizing
    pub backfill: BackfillConfig,
}

impl Default for SyncerConfig {
    fn default() -> Self {
        Self {
            checkpoint_every: 1,
            feed_reopen_attempts: 3,
            backfill: BackfillConfig::default(),
        }
    }
}

/// Runs the DECIDE/BACKFILL/STREAM state machine for individual streams.
///
/// One syncer is shared across streams; all per-run state (writer,
/// normalizer, feed, position) lives on the stack of [`StreamSyncer::run`].
pub struct StreamSyncer {
    adapter: Arc<dyn SourceAdapter>,
    state: Arc<dyn StateStore>,
    sink: Arc<dyn RecordSink>,
    config: SyncerConfig,
}

impl StreamSyncer {
    pub fn new(
        adapter: Arc<dyn SourceAdapter>,
        state: Arc<dyn StateStore>,
        sink: Arc<dyn RecordSink>,
    ) -> Self {
        Self {
            adapter,
            state,
            sink,
            config: SyncerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SyncerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sync one stream until cancellation, end-of-feed, or a fatal error.
    pub async fn run(&self, cancel: &CancellationToken, stream: &StreamDescriptor) -> Result<()> {
        let scope = self.adapter.state_scope(stream);
        let mut writer = self.sink.open_writer(stream).await?;
        let mut normalizer = RecordNormalizer::new(stream.key_fields.clone());

        let result = match stream.sync_mode {
            SyncMode::FullRefresh => {
                self.run_backfill(cancel, stream, &scope, &mut *writer, &mut normalizer)
                    .await
                    .map(|_| ())
            }
            SyncMode::Cdc => {
                self.run_cdc(cancel, stream, &scope, &mut *writer, &mut normalizer)
                    .await
            }
        };

        // The writer is closed exactly once, success or error; a close
        // failure never masks the run's own error.
        match writer.close().await {
            Ok(()) => result,
            Err(close_err) => {
                warn!(stream = %stream, error = %close_err, "Failed to close sink writer");
                result.and(Err(close_err))
            }
        }
    }

    async fn run_cdc(
        &self,
        cancel: &CancellationToken,
        stream: &StreamDescriptor,
        scope: &StateScope,
        writer: &mut dyn RecordWriter,
        normalizer: &mut RecordNormalizer,
    ) -> Result<()> {
        let field = self.adapter.position_field();

        // DECIDE: one decision per run. An absent chunk set is not
        // "caught up": a crash between persisting the pre-backfill
        // position and persisting the planned chunk set leaves exactly
        // this state, and a completed backfill always leaves an
        // all-done chunk set behind.
        let stored = self.state.position(scope, field).await?;
        let chunks = self.state.chunks(scope).await?;
        let needs_backfill = stored.is_none() || chunks.as_ref().is_none_or(|c| c.has_pending());

        let resume = if needs_backfill {
            // BACKFILL: the pre-backfill position must be on disk before
            // the first chunk read. When resuming an interrupted
            // backfill the originally captured position is kept; taking
            // a fresh one would open the feed past changes that hit
            // already-completed chunks.
            let pre = match stored {
                Some(pos) => {
                    info!(stream = %stream, position = %pos, "Resuming interrupted backfill");
                    pos
                }
                None => {
                    let pos = self.adapter.current_position(stream).await?;
                    self.state.set_position(scope, field, pos.clone()).await?;
                    info!(stream = %stream, position = %pos, "Captured pre-backfill position");
                    pos
                }
            };

            self.run_backfill(cancel, stream, scope, writer, normalizer)
                .await?;
            if cancel.is_cancelled() {
                return Ok(());
            }
            pre
        } else {
            match stored {
                Some(pos) => pos,
                // DECIDE guarantees a stored position on this branch.
                None => {
                    return Err(SyncError::state(format!(
                        "stream {stream}: no stored position and no backfill decided"
                    )))
                }
            }
        };

        // STREAM
        let mut feed = self.open_feed_with_retry(stream, &resume).await?;
        let mut current = resume;
        let outcome = self
            .stream_changes(
                cancel,
                stream,
                &mut *feed,
                writer,
                normalizer,
                scope,
                field,
                &mut current,
            )
            .await;

        // Best-effort persist of the last known position on any exit.
        if let Err(e) = self.state.set_position(scope, field, current.clone()).await {
            warn!(stream = %stream, error = %e, "Failed to persist final position");
        }
        outcome
    }

    async fn run_backfill(
        &self,
        cancel: &CancellationToken,
        stream: &StreamDescriptor,
        scope: &StateScope,
        writer: &mut dyn RecordWriter,
        normalizer: &mut RecordNormalizer,
    ) -> Result<u64> {
        BackfillExecutor::new(&*self.adapter, &*self.state)
            .with_config(self.config.backfill.clone())
            .run(cancel, stream, scope, writer, normalizer)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn stream_changes(
        &self,
        cancel: &CancellationToken,
        stream: &StreamDescriptor,
        feed: &mut dyn ChangeFeed,
        writer: &mut dyn RecordWriter,
        normalizer: &mut RecordNormalizer,
        scope: &StateScope,
        field: &str,
        current: &mut Position,
    ) -> Result<()> {
        let checkpoint_every = self.config.checkpoint_every.max(1);
        let mut since_checkpoint = 0u64;

        info!(stream = %stream, position = %current, "Streaming live changes");

        loop {
            let change = tokio::select! {
                _ = cancel.cancelled() => {
                    info!(stream = %stream, emitted = normalizer.emitted(), "Shutdown requested; stopping stream");
                    return Ok(());
                }
                next = feed.next() => match next? {
                    Some(change) => change,
                    None => {
                        info!(stream = %stream, emitted = normalizer.emitted(), "Change feed ended");
                        return Ok(());
                    }
                },
            };

            let record = normalizer.normalize(change.op, change.payload);
            writer.write(record).await?;

            // Checkpoint-after-emit: the in-memory position advances
            // only past changes the sink has accepted.
            *current = feed.checkpoint();
            since_checkpoint += 1;
            if since_checkpoint >= checkpoint_every {
                self.state.set_position(scope, field, current.clone()).await?;
                since_checkpoint = 0;
            }
        }
    }

    async fn open_feed_with_retry(
        &self,
        stream: &StreamDescriptor,
        from: &Position,
    ) -> Result<Box<dyn ChangeFeed>> {
        let attempts = self.config.feed_reopen_attempts.max(1);
        let mut last_err = None;

        for attempt in 1..=attempts {
            match self.adapter.open_feed(stream, from).await {
                Ok(feed) => return Ok(feed),
                Err(e) if e.is_retriable() && attempt < attempts => {
                    warn!(stream = %stream, attempt, error = %e, "Feed open failed; retrying");
                    last_err = Some(e);
                }
                // An expired resume position lands here too: fatal,
                // surfaced untouched.
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or_else(|| SyncError::connection("feed open failed")))
    }
}
