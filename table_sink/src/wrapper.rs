//! The per-table sink wrapper.

use crate::{
    core::{SinkFactory, TableSink, TableSinkError},
    range_ledger::{RangeEventCount, RangeEventCountLedger},
};
use changeflow_time::{Time, TimeProvider};
use data_types::{ChangefeedId, Position, ResolvedTs, RowChangedEvent, TableSpan, TableState, Ts};
use observability_deps::tracing::{info, warn};
use parking_lot::{Mutex, RwLock};
use std::{
    sync::{
        atomic::{AtomicU32, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio_util::sync::CancellationToken;
use tso::{FetchError, TsOracle};

static WRAPPER_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// The sink slot. Version is the non-zero id handed out by the factory
/// while a sink is attached, 0 otherwise.
#[derive(Debug)]
struct AttachedSink {
    sink: Option<Box<dyn TableSink>>,
    version: u64,
}

/// Cached timestamp state mirroring the attached sink, kept so progress
/// survives sink detachment.
#[derive(Debug)]
struct TsCache {
    /// Last wall-clock instant at which the checkpoint advanced (or the
    /// sink proved idle-healthy).
    advanced: Time,
    resolved_ts: ResolvedTs,
    checkpoint_ts: ResolvedTs,
    last_synced_ts: Ts,
}

/// Wraps one table's downstream sink and manages its lifecycle.
///
/// Concurrent writers, the close/restart sequence, and the sorter-cleanup
/// signal all meet here, so the hot paths are guarded by atomics and a pair
/// of reader-writer locks: the outer lock guards the sink slot itself (read
/// to forward calls, write to replace the sink), the inner lock guards the
/// cached timestamp state. The outer lock is always acquired before the
/// inner one, never the other way around.
#[derive(Debug)]
pub struct TableSinkWrapper {
    id: u64,

    /// Used for logging.
    changefeed: ChangefeedId,
    /// Used for logging.
    span: TableSpan,

    sink_factory: Arc<dyn SinkFactory>,
    sink: RwLock<AttachedSink>,
    sink_state: RwLock<TsCache>,

    /// Lifecycle state of the table; transitions are monotonic.
    state: AtomicU32,

    /// The start ts of the table.
    start_ts: Ts,

    /// Barrier bound of the table sink.
    barrier_ts: AtomicU64,
    /// The resolved ts received from the sorter.
    received_sorter_resolved_ts: AtomicU64,

    /// The ts at which the sink started (or restarted) replicating. 0 until
    /// `start` ran.
    replicate_ts: AtomicU64,
    oracle: Arc<dyn TsOracle>,

    range_event_counts: Mutex<RangeEventCountLedger>,

    time_provider: Arc<dyn TimeProvider>,
}

impl TableSinkWrapper {
    pub fn new(
        changefeed: ChangefeedId,
        span: TableSpan,
        sink_factory: Arc<dyn SinkFactory>,
        oracle: Arc<dyn TsOracle>,
        state: TableState,
        start_ts: Ts,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        let now = time_provider.now();
        Self {
            id: WRAPPER_ID_COUNTER.fetch_add(1, Ordering::AcqRel) + 1,
            changefeed,
            span,
            sink_factory,
            sink: RwLock::new(AttachedSink {
                sink: None,
                version: 0,
            }),
            sink_state: RwLock::new(TsCache {
                advanced: now,
                resolved_ts: ResolvedTs::new(start_ts),
                checkpoint_ts: ResolvedTs::new(start_ts),
                last_synced_ts: 0,
            }),
            state: AtomicU32::new(state as u32),
            start_ts,
            barrier_ts: AtomicU64::new(start_ts),
            received_sorter_resolved_ts: AtomicU64::new(start_ts),
            replicate_ts: AtomicU64::new(0),
            oracle,
            range_event_counts: Mutex::new(RangeEventCountLedger::default()),
            time_provider,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn span(&self) -> TableSpan {
        self.span
    }

    pub fn start_ts(&self) -> Ts {
        self.start_ts
    }

    pub fn replicate_ts(&self) -> Ts {
        self.replicate_ts.load(Ordering::Acquire)
    }

    pub fn state(&self) -> TableState {
        TableState::from_u32(self.state.load(Ordering::Acquire)).expect("valid table state")
    }

    /// Begin replicating from `start_ts`.
    ///
    /// `start_ts` may be greater than the construction-time start ts: with
    /// two-phase scheduling the table may have been advanced to a later ts
    /// before the sink attaches, and replication just continues from there.
    ///
    /// # Panics
    ///
    /// Panics when called on a wrapper that already holds a non-zero
    /// replicate ts; starting twice is a programmer error.
    pub async fn start(&self, start_ts: Ts, cancel: &CancellationToken) -> Result<(), FetchError> {
        let old_replicate_ts = self.replicate_ts.load(Ordering::Acquire);
        if old_replicate_ts != 0 {
            panic!(
                "table sink already started: changefeed={}, span={}, startTs={}, oldReplicateTs={}",
                self.changefeed, self.span, start_ts, old_replicate_ts,
            );
        }

        let replicate_ts = tso::fetch_replicate_ts(self.oracle.as_ref(), cancel).await?;
        self.replicate_ts.store(replicate_ts, Ordering::Release);

        info!(
            changefeed = %self.changefeed,
            span = %self.span,
            start_ts,
            replicate_ts,
            "table sink started",
        );

        self.received_sorter_resolved_ts
            .fetch_max(start_ts, Ordering::AcqRel);

        {
            let mut state = self.sink_state.write();
            if ResolvedTs::new(start_ts).is_greater_than(state.checkpoint_ts) {
                state.checkpoint_ts = ResolvedTs::new(start_ts);
                state.resolved_ts = ResolvedTs::new(start_ts);
                state.advanced = self.time_provider.now();
            }
        }
        self.state
            .store(TableState::Replicating as u32, Ordering::Release);
        Ok(())
    }

    /// Forward pre-validated row events to the downstream sink.
    pub fn append_row_changed_events(
        &self,
        events: Vec<RowChangedEvent>,
    ) -> Result<(), TableSinkError> {
        let sink = self.sink.read();
        match &sink.sink {
            Some(s) => {
                s.append_row_changed_events(events);
                Ok(())
            }
            None => Err(TableSinkError::SinkClosed),
        }
    }

    /// Raise the barrier ts. Regressions are no-ops.
    pub fn update_barrier_ts(&self, ts: Ts) {
        self.barrier_ts.fetch_max(ts, Ordering::AcqRel);
    }

    /// Raise the sorter-resolved ts. Regressions are no-ops; the first
    /// advance past the start ts moves a preparing table to prepared.
    pub fn update_received_sorter_resolved_ts(&self, ts: Ts) {
        let old = self
            .received_sorter_resolved_ts
            .fetch_max(ts, Ordering::AcqRel);
        if ts > old {
            let _ = self.state.compare_exchange(
                TableState::Preparing as u32,
                TableState::Prepared as u32,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
    }

    /// Surface a resolved ts to the downstream sink.
    pub fn update_resolved_ts(&self, resolved_ts: ResolvedTs) -> Result<(), TableSinkError> {
        let sink = self.sink.read();
        let Some(s) = &sink.sink else {
            return Err(TableSinkError::SinkClosed);
        };
        let mut state = self.sink_state.write();
        state.resolved_ts = resolved_ts;
        s.update_resolved_ts(resolved_ts)
            .map_err(|source| TableSinkError::SinkInternal { source })
    }

    /// Commit ts of the last successful downstream write; falls back to the
    /// snapshot taken at clear time when no sink is attached.
    pub fn get_last_synced_ts(&self) -> Ts {
        let sink = self.sink.read();
        if let Some(s) = &sink.sink {
            return s.get_last_synced_ts();
        }
        let state = self.sink_state.read();
        state.last_synced_ts
    }

    /// The checkpoint published by this table, monotone non-decreasing
    /// across the wrapper's entire lifetime.
    ///
    /// Also refreshes the "last advanced" wall-clock marker: either the
    /// sink checkpoint advanced the cache, or the sink has caught up with
    /// everything we handed it (idle but healthy). Both count as liveness
    /// for the stuck detector.
    pub fn get_checkpoint_ts(&self) -> ResolvedTs {
        let sink = self.sink.read();
        let mut state = self.sink_state.write();

        if let Some(s) = &sink.sink {
            let checkpoint_ts = s.get_checkpoint_ts();
            if state.checkpoint_ts.is_less_than(checkpoint_ts) {
                state.checkpoint_ts = checkpoint_ts;
                state.advanced = self.time_provider.now();
            } else if !checkpoint_ts.is_less_than(state.resolved_ts) {
                state.advanced = self.time_provider.now();
            }
        }

        state.checkpoint_ts
    }

    pub fn get_received_sorter_resolved_ts(&self) -> Ts {
        self.received_sorter_resolved_ts.load(Ordering::Acquire)
    }

    /// The ts up to which the sink manager may emit: the sorter resolved ts
    /// clamped by the barrier.
    pub fn get_upper_bound_ts(&self) -> Ts {
        let resolved_ts = self.received_sorter_resolved_ts.load(Ordering::Acquire);
        let barrier_ts = self.barrier_ts.load(Ordering::Acquire);
        resolved_ts.min(barrier_ts)
    }

    /// Move the table to stopping. Idempotent once stopping or stopped; a
    /// stopped table stays stopped.
    pub fn mark_as_closing(&self) {
        loop {
            let current = self.state.load(Ordering::Acquire);
            if current == TableState::Stopped as u32 || current == TableState::Stopping as u32 {
                return;
            }
            if self
                .state
                .compare_exchange(
                    current,
                    TableState::Stopping as u32,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                info!(
                    changefeed = %self.changefeed,
                    span = %self.span,
                    "table sink is closing",
                );
                return;
            }
        }
    }

    /// Try to close the attached sink asynchronously. Returns `true` once
    /// the sink is fully closed and detached.
    pub fn async_close(&self) -> bool {
        let closed = {
            let sink = self.sink.read();
            match &sink.sink {
                // Nothing attached means already closed.
                None => return true,
                Some(s) => s.async_close(),
            }
        };
        if closed {
            self.clear();
        }
        closed
    }

    /// Compose `mark_as_closing` and `async_close`; on success the table is
    /// stopped.
    pub fn async_stop(&self) -> bool {
        self.mark_as_closing();
        if self.async_close() {
            self.state
                .store(TableState::Stopped as u32, Ordering::Release);
            info!(
                changefeed = %self.changefeed,
                span = %self.span,
                "table sink is closed",
            );
            return true;
        }
        false
    }

    /// Close the attached sink synchronously under the shared lock, so the
    /// hot append path is not blocked for the duration.
    pub fn close(&self) {
        let sink = self.sink.read();
        if let Some(s) = &sink.sink {
            s.close();
        }
    }

    /// Synchronous close followed by detaching the sink. Only needed when
    /// the whole sink factory restarts; the write lock can block appends
    /// for a while.
    pub fn close_and_clear(&self) {
        self.close();
        self.clear();
    }

    /// Detach the sink, preserving its final checkpoint and last-synced ts
    /// in the cache first.
    fn clear(&self) {
        let mut sink = self.sink.write();
        let mut state = self.sink_state.write();

        let Some(s) = &sink.sink else {
            return;
        };

        let checkpoint_ts = s.get_checkpoint_ts();
        if state.checkpoint_ts.is_less_than(checkpoint_ts) {
            state.checkpoint_ts = checkpoint_ts;
        }
        state.resolved_ts = checkpoint_ts;
        state.last_synced_ts = s.get_last_synced_ts();
        state.advanced = self.time_provider.now();

        sink.sink = None;
        sink.version = 0;
    }

    pub fn check_health(&self) -> Result<(), TableSinkError> {
        let sink = self.sink.read();
        if let Some(s) = &sink.sink {
            s.check_health()
                .map_err(|source| TableSinkError::SinkInternal { source })?;
        }
        Ok(())
    }

    /// Refresh the replicate ts after a sink failure: events the old sink
    /// may already have committed downstream will be re-sent by the new
    /// sink, and the new replicate ts marks that boundary for downstream
    /// consumers.
    pub async fn restart(&self, cancel: &CancellationToken) -> Result<(), FetchError> {
        let replicate_ts = tso::fetch_replicate_ts(self.oracle.as_ref(), cancel).await?;
        self.replicate_ts.store(replicate_ts, Ordering::Release);
        info!(
            changefeed = %self.changefeed,
            span = %self.span,
            replicate_ts,
            "table sink restarted",
        );
        Ok(())
    }

    /// Record a newly ingested batch for sorter-cleanup bookkeeping.
    pub fn update_range_event_counts(&self, count: RangeEventCount) {
        self.range_event_counts.lock().update(count);
    }

    /// Whether a sorter cleanup below `upper_bound` is worth its cost. See
    /// [`RangeEventCountLedger::clean`].
    pub fn clean_range_event_counts(&self, upper_bound: Position, min_events: u64) -> bool {
        self.range_event_counts.lock().clean(upper_bound, min_events)
    }

    /// `(true, sink version)` when a sink is attached and its checkpoint
    /// has not advanced for longer than `stuck_check`.
    pub fn sink_maybe_stuck(&self, stuck_check: Duration) -> (bool, u64) {
        // Refresh the advanced marker first.
        self.get_checkpoint_ts();

        let sink = self.sink.read();
        let state = self.sink_state.read();
        if sink.version > 0 {
            let idle = self
                .time_provider
                .now()
                .checked_duration_since(state.advanced)
                .unwrap_or_default();
            if idle > stuck_check {
                return (true, sink.version);
            }
        }
        (false, 0)
    }

    /// Ensure a sink is attached, invoking the factory when the slot is
    /// empty. `false` means the factory was not ready; retriable.
    pub fn is_ready(&self) -> bool {
        let mut sink = self.sink.write();
        let mut state = self.sink_state.write();

        if sink.sink.is_none() {
            match self.sink_factory.create() {
                Some((s, version)) => {
                    sink.sink = Some(s);
                    sink.version = version;
                    state.advanced = self.time_provider.now();
                    true
                }
                None => false,
            }
        } else {
            true
        }
    }
}

/// Drop events that carry no data before they reach the sink, returning the
/// retained events and their accumulated approximate size in bytes.
///
/// Transactions like `begin; insert ...; delete ...; commit;` produce row
/// changes with neither columns nor pre-columns.
pub fn filter_row_changed_events(
    changefeed: &ChangefeedId,
    span: TableSpan,
    events: Vec<RowChangedEvent>,
) -> (Vec<RowChangedEvent>, u64) {
    let mut size = 0u64;
    let retained = events
        .into_iter()
        .filter(|event| {
            if event.is_empty() {
                warn!(
                    changefeed = %changefeed,
                    span = %span,
                    commit_ts = event.commit_ts,
                    "skip emitting empty row changed event",
                );
                return false;
            }
            size += event.approximate_bytes() as u64;
            true
        })
        .collect();
    (retained, size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockSinkFactory, MockSinkSharedState};
    use changeflow_time::MockProvider;
    use data_types::Column;
    use tso::MockTsOracle;

    struct Harness {
        wrapper: TableSinkWrapper,
        factory: Arc<MockSinkFactory>,
        oracle: Arc<MockTsOracle>,
        time_provider: Arc<MockProvider>,
    }

    fn harness(start_ts: Ts) -> Harness {
        let factory = Arc::new(MockSinkFactory::new());
        let oracle = Arc::new(MockTsOracle::new());
        let time_provider = Arc::new(MockProvider::new(Time::from_timestamp_millis(1_000)));
        let wrapper = TableSinkWrapper::new(
            ChangefeedId::new("test"),
            TableSpan::for_table(1),
            Arc::clone(&factory) as _,
            Arc::clone(&oracle) as _,
            TableState::Preparing,
            start_ts,
            Arc::clone(&time_provider) as _,
        );
        Harness {
            wrapper,
            factory,
            oracle,
            time_provider,
        }
    }

    fn row(commit_ts: Ts) -> RowChangedEvent {
        RowChangedEvent {
            schema: "test".to_string(),
            table: "t1".to_string(),
            table_id: 1,
            is_partition: false,
            start_ts: commit_ts.saturating_sub(1),
            commit_ts,
            columns: vec![Column {
                name: "id".to_string(),
                value: Some("1".to_string()),
            }],
            pre_columns: vec![],
        }
    }

    fn attached(h: &Harness) -> MockSinkSharedState {
        assert!(h.wrapper.is_ready());
        h.factory.latest()
    }

    #[tokio::test]
    async fn checkpoint_survives_sink_reconstruction() {
        let h = harness(100);
        let sink = attached(&h);
        h.oracle.push_ts(2_000, 0);
        h.wrapper
            .start(100, &CancellationToken::new())
            .await
            .unwrap();

        h.wrapper
            .append_row_changed_events(vec![row(150), row(200)])
            .unwrap();
        sink.set_checkpoint_ts(ResolvedTs::new(150));

        h.wrapper.close_and_clear();
        assert!(sink.is_closed());
        assert_eq!(h.wrapper.get_checkpoint_ts(), ResolvedTs::new(150));

        // A fresh sink comes up with an empty checkpoint; the published
        // checkpoint must not regress.
        assert!(h.wrapper.is_ready());
        let fresh = h.factory.latest();
        assert_eq!(fresh.checkpoint_ts(), ResolvedTs::new(0));
        assert!(h.wrapper.get_checkpoint_ts().equal_or_greater(ResolvedTs::new(150)));
    }

    #[tokio::test]
    async fn start_bootstraps_checkpoint_only_forward() {
        let h = harness(100);
        h.oracle.push_ts(2_000, 0);
        h.wrapper
            .start(100, &CancellationToken::new())
            .await
            .unwrap();

        // startTs == start-ts is not strictly greater: checkpoint keeps its
        // constructed value.
        assert_eq!(h.wrapper.get_checkpoint_ts(), ResolvedTs::new(100));
        assert_eq!(h.wrapper.state(), TableState::Replicating);
        assert_eq!(h.wrapper.get_received_sorter_resolved_ts(), 100);
    }

    #[tokio::test]
    async fn start_advances_checkpoint_for_later_start_ts() {
        let h = harness(100);
        h.oracle.push_ts(2_000, 0);
        h.wrapper
            .start(180, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(h.wrapper.get_checkpoint_ts(), ResolvedTs::new(180));
        assert_eq!(h.wrapper.get_received_sorter_resolved_ts(), 180);
    }

    #[tokio::test]
    #[should_panic(expected = "table sink already started")]
    async fn double_start_is_a_programmer_error() {
        let h = harness(100);
        h.oracle.push_ts(2_000, 0);
        h.oracle.push_ts(2_001, 0);
        let cancel = CancellationToken::new();
        h.wrapper.start(100, &cancel).await.unwrap();
        let _ = h.wrapper.start(100, &cancel).await;
    }

    #[tokio::test]
    async fn restart_refreshes_replicate_ts_and_keeps_checkpoint() {
        let h = harness(100);
        let sink = attached(&h);
        h.oracle.push_ts(2_000, 0);
        let cancel = CancellationToken::new();
        h.wrapper.start(100, &cancel).await.unwrap();
        let first = h.wrapper.replicate_ts();

        sink.set_checkpoint_ts(ResolvedTs::new(170));
        assert_eq!(h.wrapper.get_checkpoint_ts(), ResolvedTs::new(170));

        // Recovery cycle after a sink failure.
        h.wrapper.mark_as_closing();
        sink.set_async_close_done(true);
        assert!(h.wrapper.async_close());
        assert!(h.wrapper.is_ready());
        h.oracle.push_ts(3_000, 0);
        h.wrapper.restart(&cancel).await.unwrap();

        assert!(h.wrapper.replicate_ts() > first);
        assert_eq!(h.wrapper.get_checkpoint_ts(), ResolvedTs::new(170));
    }

    #[test]
    fn barrier_clamps_upper_bound() {
        let h = harness(10);
        h.wrapper.update_received_sorter_resolved_ts(500);
        h.wrapper.update_barrier_ts(300);
        assert_eq!(h.wrapper.get_upper_bound_ts(), 300);

        // Barrier regressions are no-ops.
        h.wrapper.update_barrier_ts(200);
        assert_eq!(h.wrapper.get_upper_bound_ts(), 300);

        h.wrapper.update_barrier_ts(600);
        assert_eq!(h.wrapper.get_upper_bound_ts(), 500);
    }

    #[test]
    fn sorter_resolved_ts_is_monotonic_and_prepares_the_table() {
        let h = harness(10);
        assert_eq!(h.wrapper.state(), TableState::Preparing);

        h.wrapper.update_received_sorter_resolved_ts(5);
        assert_eq!(h.wrapper.get_received_sorter_resolved_ts(), 10);
        assert_eq!(h.wrapper.state(), TableState::Preparing);

        h.wrapper.update_received_sorter_resolved_ts(11);
        assert_eq!(h.wrapper.get_received_sorter_resolved_ts(), 11);
        assert_eq!(h.wrapper.state(), TableState::Prepared);
    }

    #[test]
    fn append_without_sink_is_sink_closed() {
        let h = harness(10);
        let err = h.wrapper.append_row_changed_events(vec![row(20)]).unwrap_err();
        assert!(matches!(err, TableSinkError::SinkClosed));
    }

    #[test]
    fn append_zero_events_succeeds() {
        let h = harness(10);
        attached(&h);
        h.wrapper.append_row_changed_events(vec![]).unwrap();
    }

    #[test]
    fn update_resolved_ts_reaches_the_sink() {
        let h = harness(10);
        let sink = attached(&h);
        h.wrapper.update_resolved_ts(ResolvedTs::new(42)).unwrap();
        assert_eq!(sink.resolved_ts(), ResolvedTs::new(42));
    }

    #[test]
    fn async_stop_stops_the_table() {
        let h = harness(10);
        let sink = attached(&h);

        // The sink is still draining: not stopped yet.
        sink.set_async_close_done(false);
        assert!(!h.wrapper.async_stop());
        assert_eq!(h.wrapper.state(), TableState::Stopping);

        sink.set_async_close_done(true);
        assert!(h.wrapper.async_stop());
        assert_eq!(h.wrapper.state(), TableState::Stopped);

        // No further append succeeds.
        let err = h.wrapper.append_row_changed_events(vec![row(20)]).unwrap_err();
        assert!(matches!(err, TableSinkError::SinkClosed));

        // mark_as_closing never resurrects a stopped table.
        h.wrapper.mark_as_closing();
        assert_eq!(h.wrapper.state(), TableState::Stopped);
    }

    #[test]
    fn async_close_without_sink_is_already_closed() {
        let h = harness(10);
        assert!(h.wrapper.async_close());
    }

    #[test]
    fn clear_snapshots_final_sink_state() {
        let h = harness(10);
        let sink = attached(&h);
        sink.set_checkpoint_ts(ResolvedTs::new(90));
        sink.set_last_synced_ts(95);

        h.wrapper.close_and_clear();

        assert_eq!(h.wrapper.get_checkpoint_ts(), ResolvedTs::new(90));
        assert_eq!(h.wrapper.get_last_synced_ts(), 95);
    }

    #[test]
    fn is_ready_retries_until_the_factory_delivers() {
        let h = harness(10);
        h.factory.set_ready(false);
        assert!(!h.wrapper.is_ready());
        h.factory.set_ready(true);
        assert!(h.wrapper.is_ready());
        assert!(h.wrapper.is_ready());
        assert_eq!(h.factory.created().len(), 1);
    }

    #[test]
    fn stuck_detection_honors_the_idle_healthy_refresh() {
        let h = harness(10);
        let sink = attached(&h);
        let threshold = Duration::from_secs(5);

        // Fresh sink: not stuck.
        assert_eq!(h.wrapper.sink_maybe_stuck(threshold), (false, 0));

        // The sink sits below the frontier we handed it and its checkpoint
        // does not move: stuck.
        h.wrapper.update_resolved_ts(ResolvedTs::new(50)).unwrap();
        h.time_provider.inc(Duration::from_secs(10));
        let (stuck, version) = h.wrapper.sink_maybe_stuck(threshold);
        assert!(stuck);
        assert_eq!(version, 1);

        // The sink caught up with the frontier. Even without checkpoint
        // movement past it, that refreshes the marker: idle but healthy.
        sink.set_checkpoint_ts(ResolvedTs::new(50));
        assert_eq!(h.wrapper.sink_maybe_stuck(threshold), (false, 0));
        h.time_provider.inc(Duration::from_secs(4));
        assert_eq!(h.wrapper.sink_maybe_stuck(threshold), (false, 0));
    }

    #[test]
    fn stuck_detection_needs_an_attached_sink() {
        let h = harness(10);
        h.time_provider.inc(Duration::from_secs(60));
        assert_eq!(h.wrapper.sink_maybe_stuck(Duration::from_secs(5)), (false, 0));
    }

    #[test]
    fn sink_internal_errors_pass_through() {
        let h = harness(10);
        let sink = attached(&h);
        sink.set_health_error("disk full");
        let err = h.wrapper.check_health().unwrap_err();
        assert!(matches!(err, TableSinkError::SinkInternal { .. }));
    }

    #[test]
    fn filter_drops_empty_rows_and_sums_sizes() {
        let changefeed = ChangefeedId::new("test");
        let span = TableSpan::for_table(1);

        let mut empty = row(30);
        empty.columns.clear();

        let (retained, size) =
            filter_row_changed_events(&changefeed, span, vec![row(10), empty, row(20)]);
        assert_eq!(
            retained.iter().map(|e| e.commit_ts).collect::<Vec<_>>(),
            vec![10, 20]
        );
        assert_eq!(
            size,
            retained.iter().map(|e| e.approximate_bytes() as u64).sum::<u64>()
        );
    }
}
