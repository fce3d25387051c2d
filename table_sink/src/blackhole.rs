//! A sink that discards everything and reports it durable immediately.
//!
//! Useful as a downstream for smoke tests and for measuring the pipeline
//! itself.

use crate::core::{DdlSink, DynSinkError, SinkFactory, TableSink};
use async_trait::async_trait;
use data_types::{DdlEvent, ResolvedTs, RowChangedEvent, Ts};
use observability_deps::tracing::{debug, info};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
struct BlackholeState {
    checkpoint_ts: ResolvedTs,
    last_synced_ts: Ts,
}

/// Every appended event is "applied" the moment a resolved ts covers it, so
/// the checkpoint tracks the resolved frontier exactly.
#[derive(Debug, Default)]
pub struct BlackholeTableSink {
    state: Mutex<BlackholeState>,
}

impl BlackholeTableSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TableSink for BlackholeTableSink {
    fn append_row_changed_events(&self, events: Vec<RowChangedEvent>) {
        let mut state = self.state.lock();
        for event in &events {
            debug!(
                schema = %event.schema,
                table = %event.table,
                commit_ts = event.commit_ts,
                "blackhole sink swallowed row",
            );
            state.last_synced_ts = state.last_synced_ts.max(event.commit_ts);
        }
    }

    fn update_resolved_ts(&self, resolved_ts: ResolvedTs) -> Result<(), DynSinkError> {
        let mut state = self.state.lock();
        state.checkpoint_ts = state.checkpoint_ts.max(resolved_ts);
        Ok(())
    }

    fn get_checkpoint_ts(&self) -> ResolvedTs {
        self.state.lock().checkpoint_ts
    }

    fn get_last_synced_ts(&self) -> Ts {
        self.state.lock().last_synced_ts
    }

    fn check_health(&self) -> Result<(), DynSinkError> {
        Ok(())
    }

    fn async_close(&self) -> bool {
        true
    }

    fn close(&self) {}
}

/// Produces [`BlackholeTableSink`]s; always ready.
#[derive(Debug)]
pub struct BlackholeSinkFactory {
    next_version: AtomicU64,
}

impl Default for BlackholeSinkFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl BlackholeSinkFactory {
    pub fn new() -> Self {
        Self {
            next_version: AtomicU64::new(1),
        }
    }
}

impl SinkFactory for BlackholeSinkFactory {
    fn create(&self) -> Option<(Box<dyn TableSink>, u64)> {
        let version = self.next_version.fetch_add(1, Ordering::AcqRel);
        Some((Box::new(BlackholeTableSink::new()), version))
    }
}

/// Logs schema changes and drops them.
#[derive(Debug, Default)]
pub struct BlackholeDdlSink {}

impl BlackholeDdlSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DdlSink for BlackholeDdlSink {
    async fn write_ddl_event(&self, ddl: &DdlEvent) -> Result<(), DynSinkError> {
        info!(commit_ts = ddl.commit_ts, query = %ddl.query, "blackhole sink swallowed DDL");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use data_types::Column;

    fn row(commit_ts: Ts) -> RowChangedEvent {
        RowChangedEvent {
            schema: "test".to_string(),
            table: "t1".to_string(),
            table_id: 1,
            is_partition: false,
            start_ts: commit_ts - 1,
            commit_ts,
            columns: vec![Column {
                name: "id".to_string(),
                value: Some("1".to_string()),
            }],
            pre_columns: vec![],
        }
    }

    #[test]
    fn checkpoint_tracks_resolved_frontier() {
        let sink = BlackholeTableSink::new();
        sink.append_row_changed_events(vec![row(10), row(20)]);
        assert_eq!(sink.get_checkpoint_ts(), ResolvedTs::new(0));
        assert_eq!(sink.get_last_synced_ts(), 20);

        sink.update_resolved_ts(ResolvedTs::new(15)).unwrap();
        assert_eq!(sink.get_checkpoint_ts(), ResolvedTs::new(15));
    }

    #[test]
    fn factory_versions_ascend_from_one() {
        let factory = BlackholeSinkFactory::new();
        let (_, v1) = factory.create().unwrap();
        let (_, v2) = factory.create().unwrap();
        assert_eq!((v1, v2), (1, 2));
    }
}
