//! # Multi-Stream Fan-Out
//!
//! Runs the per-stream orchestrator across every configured stream as
//! independent tasks with bounded parallelism. One stream's fatal error
//! never cancels siblings (unless fail-fast is opted into); the
//! aggregated report is produced only after every stream has reached a
//! terminal state, so an operator sees all failures, not just the first.

use crate::common::{Result, StreamDescriptor, StreamSyncer, SyncError};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Configuration for the fan-out.
#[derive(Debug, Clone, Default)]
pub struct ControllerConfig {
    /// Worker bound; `None` means one worker per stream.
    pub max_parallel: Option<usize>,
    /// Cancel sibling streams as soon as any stream fails.
    pub fail_fast: bool,
}

/// Terminal outcome of a controller run.
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Streams that reached a clean terminal state (including
    /// cancellation, which is a graceful stop, not a failure).
    pub completed: Vec<String>,
    /// Streams that terminated in error.
    pub failed: Vec<(String, SyncError)>,
}

impl SyncReport {
    /// True when no stream terminated in error.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Collapse the report into a process outcome: an error if any
    /// stream failed, after all streams terminated.
    pub fn into_result(self) -> Result<()> {
        if self.failed.is_empty() {
            return Ok(());
        }
        let summary = self
            .failed
            .iter()
            .map(|(id, e)| format!("{id}: {e}"))
            .collect::<Vec<_>>()
            .join("; ");
        Err(SyncError::other(format!(
            "{} stream(s) failed: {summary}",
            self.failed.len()
        )))
    }
}

/// Fans [`StreamSyncer`] out across streams and aggregates results.
pub struct SyncController {
    syncer: Arc<StreamSyncer>,
    config: ControllerConfig,
}

impl SyncController {
    pub fn new(syncer: Arc<StreamSyncer>) -> Self {
        Self {
            syncer,
            config: ControllerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sync every stream to a terminal state.
    ///
    /// Cancelling `cancel` propagates to every in-flight feed read and
    /// chunk read; workers then stop gracefully at their next
    /// suspension point.
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        streams: Vec<StreamDescriptor>,
    ) -> SyncReport {
        let workers = self.config.max_parallel.unwrap_or(streams.len()).max(1);
        let semaphore = Arc::new(Semaphore::new(workers));
        // Child token: external shutdown reaches the workers, fail-fast
        // cancellation stays scoped to this run.
        let scoped = cancel.child_token();

        info!(streams = streams.len(), workers, "Starting sync fan-out");

        let mut handles = Vec::with_capacity(streams.len());
        for stream in streams {
            let syncer = Arc::clone(&self.syncer);
            let semaphore = Arc::clone(&semaphore);
            let token = scoped.clone();
            let fail_fast = self.config.fail_fast;

            handles.push(tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    // Nothing closes the semaphore; treat it as fatal
                    // for this stream if it ever happens.
                    Err(_) => return (stream.id(), Err(SyncError::other("semaphore closed"))),
                };
                let result = syncer.run(&token, &stream).await;
                if fail_fast && result.is_err() {
                    token.cancel();
                }
                (stream.id(), result)
            }));
        }

        let mut report = SyncReport::default();
        for handle in handles {
            match handle.await {
                Ok((id, Ok(()))) => {
                    info!(stream = %id, "Stream sync terminated cleanly");
                    report.completed.push(id);
                }
                Ok((id, Err(e))) => {
                    error!(stream = %id, error = %e, code = e.error_code(), "Stream sync failed");
                    report.failed.push((id, e));
                }
                Err(join_err) => {
                    error!(error = %join_err, "Stream worker panicked");
                    report.failed.push((
                        "<unknown>".to_string(),
                        SyncError::other(format!("stream worker panicked: {join_err}")),
                    ));
                }
            }
        }

        info!(
            completed = report.completed.len(),
            failed = report.failed.len(),
            "Sync fan-out finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{
        ChangeFeed, Chunk, ChunkSet, MemorySink, MemoryStateStore, Position, RawChange, RawRow,
        SourceAdapter, StateScope, StateStore,
    };
    use async_trait::async_trait;

    /// Global-scope adapter whose behavior is keyed by stream name:
    /// `bad_*` streams fail to capture a position, `slow_*` streams
    /// block on their feed until cancelled.
    struct BehaviorAdapter;

    struct IdleFeed {
        position: Position,
    }

    #[async_trait]
    impl ChangeFeed for IdleFeed {
        async fn next(&mut self) -> Result<Option<RawChange>> {
            // Unbounded feed with no traffic; the orchestrator's
            // cancellation arm is what ends it.
            std::future::pending::<()>().await;
            Ok(None)
        }

        fn checkpoint(&self) -> Position {
            self.position.clone()
        }
    }

    struct EmptyFeed {
        position: Position,
    }

    #[async_trait]
    impl ChangeFeed for EmptyFeed {
        async fn next(&mut self) -> Result<Option<RawChange>> {
            Ok(None)
        }

        fn checkpoint(&self) -> Position {
            self.position.clone()
        }
    }

    #[async_trait]
    impl SourceAdapter for BehaviorAdapter {
        fn state_scope(&self, _stream: &StreamDescriptor) -> StateScope {
            StateScope::Global
        }

        async fn current_position(&self, stream: &StreamDescriptor) -> Result<Position> {
            if stream.name.starts_with("bad_") {
                return Err(SyncError::connection("feed refused"));
            }
            Ok(Position::new("P0"))
        }

        async fn open_feed(
            &self,
            stream: &StreamDescriptor,
            from: &Position,
        ) -> Result<Box<dyn ChangeFeed>> {
            if stream.name.starts_with("slow_") {
                Ok(Box::new(IdleFeed {
                    position: from.clone(),
                }))
            } else {
                Ok(Box::new(EmptyFeed {
                    position: from.clone(),
                }))
            }
        }

        async fn plan_chunks(
            &self,
            _stream: &StreamDescriptor,
            _target_rows: u64,
        ) -> Result<ChunkSet> {
            Ok(ChunkSet::new(vec![Chunk::new(None, None)]))
        }

        async fn read_chunk(
            &self,
            _stream: &StreamDescriptor,
            _chunk: &Chunk,
        ) -> Result<Vec<RawRow>> {
            Ok(Vec::new())
        }
    }

    fn controller() -> (SyncController, Arc<MemoryStateStore>) {
        let state = Arc::new(MemoryStateStore::new());
        let syncer = StreamSyncer::new(
            Arc::new(BehaviorAdapter),
            Arc::clone(&state) as Arc<dyn StateStore>,
            Arc::new(MemorySink::new()),
        );
        (SyncController::new(Arc::new(syncer)), state)
    }

    #[tokio::test]
    async fn test_failure_is_isolated_per_stream() {
        let (controller, state) = controller();
        let streams = vec![
            StreamDescriptor::cdc("db", "bad_orders"),
            StreamDescriptor::cdc("db", "users"),
        ];

        let report = controller.run(&CancellationToken::new(), streams).await;

        assert_eq!(report.completed, vec!["db.users".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "db.bad_orders");
        assert!(!report.is_success());
        assert!(report.into_result().is_err());

        // The healthy stream checkpointed under the adapter's global
        // scope despite its sibling failing.
        assert_eq!(
            state.position(&StateScope::Global, "position").await.unwrap(),
            Some(Position::new("P0"))
        );
    }

    #[tokio::test]
    async fn test_fail_fast_cancels_siblings() {
        let (controller, _state) = controller();
        let controller = controller.with_config(ControllerConfig {
            max_parallel: None,
            fail_fast: true,
        });
        let streams = vec![
            StreamDescriptor::cdc("db", "bad_orders"),
            // Would never terminate without the fail-fast cancellation.
            StreamDescriptor::cdc("db", "slow_users"),
        ];

        let report = controller.run(&CancellationToken::new(), streams).await;

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.completed, vec!["db.slow_users".to_string()]);
    }

    #[tokio::test]
    async fn test_bounded_parallelism_still_completes_all() {
        let (controller, _state) = controller();
        let controller = controller.with_config(ControllerConfig {
            max_parallel: Some(1),
            fail_fast: false,
        });
        let streams: Vec<_> = (0..4)
            .map(|i| StreamDescriptor::cdc("db", format!("s{i}")))
            .collect();

        let report = controller.run(&CancellationToken::new(), streams).await;
        assert_eq!(report.completed.len(), 4);
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn test_external_cancellation_stops_all_streams() {
        let (controller, _state) = controller();
        let streams = vec![
            StreamDescriptor::cdc("db", "slow_a"),
            StreamDescriptor::cdc("db", "slow_b"),
        ];

        let cancel = CancellationToken::new();
        let shutdown = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            shutdown.cancel();
        });

        let report = controller.run(&cancel, streams).await;
        assert!(report.is_success());
        assert_eq!(report.completed.len(), 2);
    }
}
