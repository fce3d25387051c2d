//! The partition consumer and its resolve loop.
//!
//! Rows are buffered per table until a resolved event releases them; a
//! periodic driver interleaves DDL application with DML flushes and
//! advances the global resolved ts monotonically.

use crate::{
    codec::{CodecError, MessageDecoder},
    config::MessageLimits,
    source::{MessageSource, SourceError},
};
use changeflow_time::TimeProvider;
use data_types::{
    ChangeEvent, ChangefeedId, DdlEvent, ResolvedTs, RowChangedEvent, TableId, TableSpan,
    TableState, Ts,
};
use observability_deps::tracing::{debug, info, warn};
use parking_lot::Mutex;
use snafu::{ResultExt, Snafu};
use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use table_sink::{
    filter_row_changed_events, DdlSink, DynSinkError, SinkFactory, TableSinkError,
    TableSinkWrapper,
};
use tokio_util::sync::CancellationToken;
use tso::TsOracle;

/// How often the driver advances the global resolved ts.
const DRIVER_TICK: Duration = Duration::from_millis(100);

#[derive(Debug, Snafu)]
pub enum ConsumerError {
    #[snafu(display("table sink for table {table_id} is not ready yet"))]
    SinkNotReady { table_id: TableId },

    #[snafu(display("table sink error: {source}"))]
    Sink { source: TableSinkError },

    #[snafu(display("ddl sink error: {source}"))]
    Ddl { source: DynSinkError },

    #[snafu(display("failed to obtain a replicate ts: {source}"))]
    ReplicateTs { source: tso::FetchError },
}

/// Rows buffered for one table, released in commit-ts order by resolved
/// events.
#[derive(Debug, Default)]
struct EventsGroup {
    events: Vec<RowChangedEvent>,
}

impl EventsGroup {
    fn append(&mut self, event: RowChangedEvent) {
        self.events.push(event);
    }

    /// The smallest buffered commit ts at or below `resolved_ts`, if any.
    fn first_commit_ts_up_to(&self, resolved_ts: Ts) -> Option<Ts> {
        self.events
            .iter()
            .map(|e| e.commit_ts)
            .filter(|commit_ts| *commit_ts <= resolved_ts)
            .min()
    }

    /// Split off every event with `commit_ts <= resolved_ts`, in commit-ts
    /// order.
    fn resolve(&mut self, resolved_ts: Ts) -> Vec<RowChangedEvent> {
        self.events.sort_by_key(|e| e.commit_ts);
        let idx = self
            .events
            .partition_point(|e| e.commit_ts <= resolved_ts);
        self.events.drain(..idx).collect()
    }
}

/// Derives stable table ids for codecs that do not carry physical ids.
#[derive(Debug, Default)]
struct TableIdAllocator {
    ids: HashMap<String, TableId>,
    next_id: TableId,
}

impl TableIdAllocator {
    fn allocate(&mut self, schema: &str, table: &str, partition_id: TableId) -> TableId {
        let mut key = format!("`{schema}`.`{table}`");
        if partition_id != 0 {
            key = format!("{key}.`{partition_id}`");
        }
        if let Some(id) = self.ids.get(&key) {
            return *id;
        }
        self.next_id += 1;
        self.ids.insert(key, self.next_id);
        self.next_id
    }
}

/// Per-partition consumer state. The partition's resolved ts is monotonic
/// non-decreasing.
#[derive(Debug, Default)]
pub struct PartitionState {
    resolved_ts: AtomicU64,
    groups: Mutex<HashMap<TableId, EventsGroup>>,
    tables_commit_ts: Mutex<HashMap<TableId, Ts>>,
    table_sinks: Mutex<HashMap<TableId, Arc<TableSinkWrapper>>>,
}

impl PartitionState {
    pub fn resolved_ts(&self) -> Ts {
        self.resolved_ts.load(Ordering::Acquire)
    }

    /// The sink wrapper attached to `table_id`, if one was created.
    pub fn table_sink(&self, table_id: TableId) -> Option<Arc<TableSinkWrapper>> {
        self.table_sinks.lock().get(&table_id).cloned()
    }

    fn buffered_event_count(&self) -> usize {
        self.groups.lock().values().map(|g| g.events.len()).sum()
    }
}

#[derive(Debug, Default)]
struct DdlQueue {
    list: VecDeque<DdlEvent>,
    /// The DDL with the largest commit ts accepted so far; incoming DDLs
    /// must not regress below it.
    max: Option<DdlEvent>,
}

/// The changefeed consumer: one instance serves every upstream partition.
#[derive(Debug)]
pub struct Consumer {
    changefeed: ChangefeedId,
    partitions: Vec<Arc<PartitionState>>,
    ddl_queue: Mutex<DdlQueue>,
    ddl_sink: Arc<dyn DdlSink>,
    sink_factory: Arc<dyn SinkFactory>,
    oracle: Arc<dyn TsOracle>,
    time_provider: Arc<dyn TimeProvider>,
    /// Initialized to 0; advanced by the driver only.
    global_resolved_ts: AtomicU64,
    table_ids: Mutex<TableIdAllocator>,
}

impl Consumer {
    pub fn new(
        changefeed: ChangefeedId,
        partition_num: usize,
        sink_factory: Arc<dyn SinkFactory>,
        ddl_sink: Arc<dyn DdlSink>,
        oracle: Arc<dyn TsOracle>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        assert!(partition_num >= 1, "at least one partition is required");
        Self {
            changefeed,
            partitions: (0..partition_num)
                .map(|_| Arc::new(PartitionState::default()))
                .collect(),
            ddl_queue: Mutex::new(DdlQueue::default()),
            ddl_sink,
            sink_factory,
            oracle,
            time_provider,
            global_resolved_ts: AtomicU64::new(0),
            table_ids: Mutex::new(TableIdAllocator::default()),
        }
    }

    pub fn partition(&self, index: usize) -> &Arc<PartitionState> {
        &self.partitions[index]
    }

    pub fn global_resolved_ts(&self) -> Ts {
        self.global_resolved_ts.load(Ordering::Acquire)
    }

    /// Feed one decoded event from `partition` into the consumer.
    pub async fn handle_event(
        &self,
        partition: usize,
        event: ChangeEvent,
        cancel: &CancellationToken,
    ) -> Result<(), ConsumerError> {
        assert!(
            partition < self.partitions.len(),
            "event from unknown partition {partition} (partition_num={})",
            self.partitions.len(),
        );
        match event {
            ChangeEvent::Row(row) => {
                self.handle_row(partition, row);
                Ok(())
            }
            ChangeEvent::Ddl(ddl) => {
                self.handle_ddl(partition, ddl);
                Ok(())
            }
            ChangeEvent::Resolved(ts) => self.handle_resolved(partition, ts, cancel).await,
        }
    }

    /// Buffer a row unless it replays below the resolved frontier.
    fn handle_row(&self, partition: usize, mut row: RowChangedEvent) {
        let state = &self.partitions[partition];
        let global_resolved_ts = self.global_resolved_ts.load(Ordering::Acquire);
        let partition_resolved_ts = state.resolved_ts.load(Ordering::Acquire);
        if row.commit_ts <= global_resolved_ts || row.commit_ts <= partition_resolved_ts {
            warn!(
                commit_ts = row.commit_ts,
                global_resolved_ts,
                partition_resolved_ts,
                partition,
                schema = %row.schema,
                table = %row.table,
                "row changed event below the resolved frontier, ignored",
            );
            return;
        }

        let partition_id = if row.is_partition { row.table_id } else { 0 };
        let table_id = self
            .table_ids
            .lock()
            .allocate(&row.schema, &row.table, partition_id);
        row.table_id = table_id;

        state.groups.lock().entry(table_id).or_default().append(row);
    }

    /// Queue a DDL. Only the first partition feeds the queue (fan-out
    /// protocols deliver DDLs to every partition); all partitions still
    /// consume the message so their offsets advance.
    fn handle_ddl(&self, partition: usize, ddl: DdlEvent) {
        if partition != 0 {
            return;
        }

        let mut queue = self.ddl_queue.lock();
        if let Some(max) = &queue.max {
            if ddl.commit_ts < max.commit_ts {
                panic!(
                    "DDL commit ts regression: commit_ts={} < max_commit_ts={}, query={:?}",
                    ddl.commit_ts, max.commit_ts, ddl.query,
                );
            }
            // A rename-tables job emits several distinct DDLs sharing one
            // commit ts; only a re-delivery of the same event is redundant.
            if ddl == *max {
                info!(
                    commit_ts = ddl.commit_ts,
                    query = %ddl.query,
                    "ignoring redundant DDL",
                );
                return;
            }
        }

        info!(commit_ts = ddl.commit_ts, query = %ddl.query, "DDL event received");
        queue.list.push_back(ddl.clone());
        queue.max = Some(ddl);
    }

    /// Release every buffered row at or below `ts` into the table sinks,
    /// then advance the partition's resolved ts.
    async fn handle_resolved(
        &self,
        partition: usize,
        ts: Ts,
        cancel: &CancellationToken,
    ) -> Result<(), ConsumerError> {
        let state = &self.partitions[partition];
        let global_resolved_ts = self.global_resolved_ts.load(Ordering::Acquire);
        let partition_resolved_ts = state.resolved_ts.load(Ordering::Acquire);
        if ts < global_resolved_ts || ts < partition_resolved_ts {
            warn!(
                ts,
                partition_resolved_ts,
                global_resolved_ts,
                partition,
                "partition resolved ts fallback, ignored",
            );
            return Ok(());
        }

        let table_ids: Vec<TableId> = state.groups.lock().keys().copied().collect();
        for table_id in table_ids {
            // Make sure a started sink exists before splitting the buffer,
            // so a not-ready sink does not lose events.
            let first_commit_ts = {
                let groups = state.groups.lock();
                match groups.get(&table_id).and_then(|g| g.first_commit_ts_up_to(ts)) {
                    Some(commit_ts) => commit_ts,
                    None => continue,
                }
            };
            let wrapper = self
                .started_table_sink(state, table_id, first_commit_ts, cancel)
                .await?;

            let events = {
                let mut groups = state.groups.lock();
                match groups.get_mut(&table_id) {
                    Some(group) => group.resolve(ts),
                    None => continue,
                }
            };
            let Some(last_commit_ts) = events.last().map(|e| e.commit_ts) else {
                continue;
            };

            let (events, bytes) =
                filter_row_changed_events(&self.changefeed, wrapper.span(), events);
            debug!(
                partition,
                table_id,
                n_events = events.len(),
                bytes,
                resolved_ts = ts,
                "flushing rows to table sink",
            );
            wrapper
                .append_row_changed_events(events)
                .context(SinkSnafu)?;

            let mut tables_commit_ts = state.tables_commit_ts.lock();
            let entry = tables_commit_ts.entry(table_id).or_insert(0);
            *entry = (*entry).max(last_commit_ts);
        }

        state.resolved_ts.store(ts, Ordering::Release);
        Ok(())
    }

    /// The wrapper for `table_id`, created lazily with `start_ts` taken
    /// from the first event it will receive, its sink attached and started.
    async fn started_table_sink(
        &self,
        state: &PartitionState,
        table_id: TableId,
        start_ts: Ts,
        cancel: &CancellationToken,
    ) -> Result<Arc<TableSinkWrapper>, ConsumerError> {
        let wrapper = {
            let mut table_sinks = state.table_sinks.lock();
            let wrapper = table_sinks.entry(table_id).or_insert_with(|| {
                Arc::new(TableSinkWrapper::new(
                    self.changefeed.clone(),
                    TableSpan::for_table(table_id),
                    Arc::clone(&self.sink_factory),
                    Arc::clone(&self.oracle),
                    TableState::Preparing,
                    start_ts,
                    Arc::clone(&self.time_provider),
                ))
            });
            Arc::clone(wrapper)
        };

        if !wrapper.is_ready() {
            return SinkNotReadySnafu { table_id }.fail();
        }
        if wrapper.replicate_ts() == 0 {
            wrapper
                .start(start_ts, cancel)
                .await
                .context(ReplicateTsSnafu)?;
        }
        Ok(wrapper)
    }

    fn min_partition_resolved_ts(&self) -> Ts {
        self.partitions
            .iter()
            .map(|p| p.resolved_ts.load(Ordering::Acquire))
            .min()
            .expect("at least one partition")
    }

    fn front_ddl(&self) -> Option<DdlEvent> {
        self.ddl_queue.lock().list.front().cloned()
    }

    fn pop_ddl(&self) {
        self.ddl_queue.lock().list.pop_front();
    }

    /// Drive the resolve loop until cancelled.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<(), ConsumerError> {
        let mut ticker = tokio::time::interval(DRIVER_TICK);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = ticker.tick() => {}
            }
            self.tick(cancel).await?;
        }
    }

    /// One driver round: interleave a due DDL with DML flushes, then
    /// advance the global resolved ts and flush up to it.
    ///
    /// # Panics
    ///
    /// Panics when the global resolved ts would move backward; that is a
    /// broken ordering invariant, not a runtime condition.
    pub async fn tick(&self, cancel: &CancellationToken) -> Result<(), ConsumerError> {
        let mut min_partition_resolved_ts = self.min_partition_resolved_ts();

        if let Some(ddl) = self.front_ddl() {
            if ddl.commit_ts <= min_partition_resolved_ts {
                // Flush DMLs below the DDL first.
                for state in &self.partitions {
                    self.flush_partition(state, ddl.commit_ts, cancel).await?;
                }

                self.ddl_sink
                    .write_ddl_event(&ddl)
                    .await
                    .map_err(|source| ConsumerError::Ddl { source })?;
                self.pop_ddl();

                if ddl.commit_ts < min_partition_resolved_ts {
                    info!(
                        min_partition_resolved_ts,
                        ddl_commit_ts = ddl.commit_ts,
                        query = %ddl.query,
                        "DDL clamps the resolved frontier for this round",
                    );
                }
                min_partition_resolved_ts = ddl.commit_ts;
            }
        }

        let global_resolved_ts = self.global_resolved_ts.load(Ordering::Acquire);
        if global_resolved_ts > min_partition_resolved_ts {
            panic!(
                "global resolved ts regression: global={global_resolved_ts} > min_partition={min_partition_resolved_ts}",
            );
        }
        if global_resolved_ts < min_partition_resolved_ts {
            self.global_resolved_ts
                .store(min_partition_resolved_ts, Ordering::Release);
        }

        let target = self.global_resolved_ts.load(Ordering::Acquire);
        for state in &self.partitions {
            self.flush_partition(state, target, cancel).await?;
        }
        Ok(())
    }

    /// Push every live table of the partition to its flush target and wait
    /// until the checkpoints catch up. A table's target is the resolved ts
    /// clamped by the last commit ts it received.
    ///
    /// Abandoned when `cancel` fires; downstream sinks are idempotent up to
    /// their own checkpoint.
    async fn flush_partition(
        &self,
        state: &PartitionState,
        resolved_ts: Ts,
        cancel: &CancellationToken,
    ) -> Result<(), ConsumerError> {
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            let entries: Vec<(TableId, Ts)> = state
                .tables_commit_ts
                .lock()
                .iter()
                .map(|(table_id, commit_ts)| (*table_id, *commit_ts))
                .collect();

            let mut flushed = true;
            for (table_id, last_commit_ts) in entries {
                let wrapper = state
                    .table_sink(table_id)
                    .unwrap_or_else(|| panic!("table sink not found: table_id={table_id}"));

                let target = ResolvedTs::new(resolved_ts.min(last_commit_ts));
                match wrapper.update_resolved_ts(target) {
                    Ok(()) => {}
                    Err(TableSinkError::SinkClosed) => {
                        // Detached mid-flush; reattach and retry on the
                        // next round.
                        wrapper.is_ready();
                        flushed = false;
                        continue;
                    }
                    Err(e) => return Err(e).context(SinkSnafu),
                }
                if !wrapper.get_checkpoint_ts().equal_or_greater(target) {
                    flushed = false;
                }
            }

            if flushed {
                return Ok(());
            }
            tokio::task::yield_now().await;
        }
    }

    /// Buffered rows not yet released by a resolved event, across all
    /// partitions. Exposed for shutdown logging.
    pub fn buffered_event_count(&self) -> usize {
        self.partitions
            .iter()
            .map(|p| p.buffered_event_count())
            .sum()
    }
}

/// Read raw messages from `source`, decode them, and feed the consumer,
/// until the source drains or `cancel` fires.
///
/// # Panics
///
/// Panics when a message violates the producer contract (`max-batch-size`,
/// or `max-message-bytes` with more than one event in the message).
pub async fn pump_source(
    consumer: Arc<Consumer>,
    mut source: Box<dyn MessageSource>,
    mut decoder: Box<dyn MessageDecoder>,
    limits: MessageLimits,
    cancel: CancellationToken,
) -> Result<(), PumpError> {
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            message = source.recv() => message.context(SourceSnafu)?,
        };
        let Some(message) = message else {
            info!("upstream source exhausted");
            return Ok(());
        };

        let events = decoder
            .decode(&message.key, &message.value)
            .context(DecodeSnafu)?;

        if events.len() > limits.max_batch_size {
            panic!(
                "max-batch-size exceeded: batch_size={} max={}",
                events.len(),
                limits.max_batch_size,
            );
        }
        let message_bytes = message.key.len() + message.value.len();
        if message_bytes > limits.max_message_bytes {
            if events.len() > 1 {
                panic!(
                    "max-message-bytes exceeded: received={message_bytes} max={}",
                    limits.max_message_bytes,
                );
            }
            warn!(
                message_bytes,
                max_message_bytes = limits.max_message_bytes,
                "single oversized event accepted",
            );
        }

        for event in events {
            consumer
                .handle_event(message.partition, event, &cancel)
                .await
                .context(ConsumeSnafu)?;
        }
    }
}

#[derive(Debug, Snafu)]
pub enum PumpError {
    #[snafu(display("upstream source failed: {source}"))]
    Source { source: SourceError },

    #[snafu(display("failed to decode message: {source}"))]
    Decode { source: CodecError },

    #[snafu(display("failed to consume event: {source}"))]
    Consume { source: ConsumerError },
}

#[cfg(test)]
mod tests {
    use super::*;
    use changeflow_time::{MockProvider, Time};
    use data_types::Column;
    use table_sink::blackhole::{BlackholeDdlSink, BlackholeSinkFactory};
    use table_sink::mock::MockDdlSink;
    use tso::SystemTsOracle;

    fn row(schema: &str, table: &str, commit_ts: Ts) -> ChangeEvent {
        ChangeEvent::Row(RowChangedEvent {
            schema: schema.to_string(),
            table: table.to_string(),
            table_id: 0,
            is_partition: false,
            start_ts: commit_ts.saturating_sub(1),
            commit_ts,
            columns: vec![Column {
                name: "id".to_string(),
                value: Some("1".to_string()),
            }],
            pre_columns: vec![],
        })
    }

    fn ddl(commit_ts: Ts, query: &str) -> ChangeEvent {
        ChangeEvent::Ddl(DdlEvent {
            commit_ts,
            schema: "test".to_string(),
            table: "t1".to_string(),
            query: query.to_string(),
        })
    }

    fn consumer_with(partition_num: usize, ddl_sink: Arc<dyn DdlSink>) -> Consumer {
        let time_provider = Arc::new(MockProvider::new(Time::from_timestamp_millis(1_000)));
        Consumer::new(
            ChangefeedId::new("consumer-test"),
            partition_num,
            Arc::new(BlackholeSinkFactory::new()),
            ddl_sink,
            Arc::new(SystemTsOracle::new(Arc::clone(&time_provider) as _)),
            time_provider as _,
        )
    }

    fn blackhole_consumer(partition_num: usize) -> Consumer {
        consumer_with(partition_num, Arc::new(BlackholeDdlSink::new()))
    }

    #[tokio::test]
    async fn resolved_event_releases_prefix_in_commit_ts_order() {
        let consumer = blackhole_consumer(1);
        let cancel = CancellationToken::new();

        for commit_ts in [300, 100, 200] {
            consumer
                .handle_event(0, row("test", "t1", commit_ts), &cancel)
                .await
                .unwrap();
        }
        consumer
            .handle_event(0, ChangeEvent::Resolved(250), &cancel)
            .await
            .unwrap();

        let partition = consumer.partition(0);
        assert_eq!(partition.resolved_ts(), 250);
        // 300 stays buffered.
        assert_eq!(partition.buffered_event_count(), 1);

        let wrapper = partition.table_sink(1).expect("sink created lazily");
        assert_eq!(wrapper.start_ts(), 100);
        assert_eq!(wrapper.state(), TableState::Replicating);
    }

    #[tokio::test]
    async fn replayed_rows_below_the_frontier_are_dropped() {
        let consumer = blackhole_consumer(1);
        let cancel = CancellationToken::new();

        consumer
            .handle_event(0, ChangeEvent::Resolved(1_000), &cancel)
            .await
            .unwrap();
        consumer.tick(&cancel).await.unwrap();
        assert_eq!(consumer.global_resolved_ts(), 1_000);

        consumer
            .handle_event(0, row("test", "t1", 900), &cancel)
            .await
            .unwrap();

        let partition = consumer.partition(0);
        assert_eq!(partition.buffered_event_count(), 0);
        assert_eq!(partition.resolved_ts(), 1_000);
    }

    #[tokio::test]
    async fn resolved_ts_fallback_is_ignored() {
        let consumer = blackhole_consumer(1);
        let cancel = CancellationToken::new();

        consumer
            .handle_event(0, ChangeEvent::Resolved(500), &cancel)
            .await
            .unwrap();
        consumer
            .handle_event(0, ChangeEvent::Resolved(400), &cancel)
            .await
            .unwrap();

        assert_eq!(consumer.partition(0).resolved_ts(), 500);
    }

    #[tokio::test]
    async fn flush_checkpoints_clamp_to_last_commit_ts() {
        let consumer = blackhole_consumer(1);
        let cancel = CancellationToken::new();

        consumer
            .handle_event(0, row("test", "t1", 100), &cancel)
            .await
            .unwrap();
        consumer
            .handle_event(0, ChangeEvent::Resolved(500), &cancel)
            .await
            .unwrap();
        consumer.tick(&cancel).await.unwrap();

        assert_eq!(consumer.global_resolved_ts(), 500);
        let wrapper = consumer.partition(0).table_sink(1).unwrap();
        // The table saw nothing beyond 100, so its checkpoint target is
        // clamped there.
        assert_eq!(wrapper.get_checkpoint_ts(), ResolvedTs::new(100));
    }

    #[tokio::test]
    async fn ddl_interleaves_with_dml_flushes() {
        let ddl_sink = Arc::new(MockDdlSink::new());
        let consumer = consumer_with(2, Arc::clone(&ddl_sink) as _);
        let cancel = CancellationToken::new();

        consumer
            .handle_event(0, row("test", "t1", 350), &cancel)
            .await
            .unwrap();
        consumer.handle_event(0, ddl(400, "alter table t1 add column v int"), &cancel)
            .await
            .unwrap();
        consumer
            .handle_event(0, ChangeEvent::Resolved(500), &cancel)
            .await
            .unwrap();
        consumer
            .handle_event(1, ChangeEvent::Resolved(500), &cancel)
            .await
            .unwrap();

        // First round: DMLs flush up to the DDL, the DDL applies, and the
        // frontier is clamped to its commit ts.
        consumer.tick(&cancel).await.unwrap();
        assert_eq!(ddl_sink.ddls().len(), 1);
        assert_eq!(ddl_sink.ddls()[0].commit_ts, 400);
        assert_eq!(consumer.global_resolved_ts(), 400);

        // Next round completes the advance to the partitions' frontier.
        consumer.tick(&cancel).await.unwrap();
        assert_eq!(consumer.global_resolved_ts(), 500);
        let wrapper = consumer.partition(0).table_sink(1).unwrap();
        assert_eq!(wrapper.get_checkpoint_ts(), ResolvedTs::new(350));
    }

    #[tokio::test]
    async fn only_the_first_partition_feeds_the_ddl_queue() {
        let ddl_sink = Arc::new(MockDdlSink::new());
        let consumer = consumer_with(2, Arc::clone(&ddl_sink) as _);
        let cancel = CancellationToken::new();

        consumer
            .handle_event(1, ddl(400, "create table t2(id int)"), &cancel)
            .await
            .unwrap();
        for partition in 0..2 {
            consumer
                .handle_event(partition, ChangeEvent::Resolved(500), &cancel)
                .await
                .unwrap();
        }
        consumer.tick(&cancel).await.unwrap();
        assert!(ddl_sink.ddls().is_empty());
    }

    #[tokio::test]
    async fn rename_tables_ddls_share_a_commit_ts() {
        let ddl_sink = Arc::new(MockDdlSink::new());
        let consumer = consumer_with(1, Arc::clone(&ddl_sink) as _);
        let cancel = CancellationToken::new();

        consumer
            .handle_event(0, ddl(400, "rename table a to b"), &cancel)
            .await
            .unwrap();
        // Redundant re-delivery of the same event is skipped...
        consumer
            .handle_event(0, ddl(400, "rename table a to b"), &cancel)
            .await
            .unwrap();
        // ...but a distinct DDL with the same commit ts is accepted.
        consumer
            .handle_event(0, ddl(400, "rename table c to d"), &cancel)
            .await
            .unwrap();

        consumer
            .handle_event(0, ChangeEvent::Resolved(500), &cancel)
            .await
            .unwrap();
        consumer.tick(&cancel).await.unwrap();
        consumer.tick(&cancel).await.unwrap();

        let applied: Vec<String> = ddl_sink.ddls().iter().map(|d| d.query.clone()).collect();
        assert_eq!(applied, vec!["rename table a to b", "rename table c to d"]);
    }

    #[tokio::test]
    #[should_panic(expected = "DDL commit ts regression")]
    async fn ddl_commit_ts_regression_is_fatal() {
        let consumer = blackhole_consumer(1);
        let cancel = CancellationToken::new();

        consumer
            .handle_event(0, ddl(400, "create table a(id int)"), &cancel)
            .await
            .unwrap();
        let _ = consumer
            .handle_event(0, ddl(300, "create table b(id int)"), &cancel)
            .await;
    }

    #[tokio::test]
    async fn table_ids_are_stable_per_schema_table_partition() {
        let consumer = blackhole_consumer(1);
        let cancel = CancellationToken::new();

        consumer
            .handle_event(0, row("test", "t1", 100), &cancel)
            .await
            .unwrap();
        consumer
            .handle_event(0, row("test", "t2", 110), &cancel)
            .await
            .unwrap();
        consumer
            .handle_event(0, row("test", "t1", 120), &cancel)
            .await
            .unwrap();

        let groups = consumer.partition(0).groups.lock();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups.get(&1).unwrap().events.len(), 2);
        assert_eq!(groups.get(&2).unwrap().events.len(), 1);
    }

    #[tokio::test]
    async fn global_resolved_ts_is_the_min_across_partitions() {
        let consumer = blackhole_consumer(2);
        let cancel = CancellationToken::new();

        consumer
            .handle_event(0, ChangeEvent::Resolved(500), &cancel)
            .await
            .unwrap();
        consumer.tick(&cancel).await.unwrap();
        // Partition 1 has not advanced yet.
        assert_eq!(consumer.global_resolved_ts(), 0);

        consumer
            .handle_event(1, ChangeEvent::Resolved(300), &cancel)
            .await
            .unwrap();
        consumer.tick(&cancel).await.unwrap();
        assert_eq!(consumer.global_resolved_ts(), 300);
    }
}
