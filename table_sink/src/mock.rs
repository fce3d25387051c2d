//! Scriptable sink doubles for tests.

use crate::core::{DdlSink, DynSinkError, SinkFactory, TableSink};
use async_trait::async_trait;
use data_types::{DdlEvent, ResolvedTs, RowChangedEvent, Ts};
use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

#[derive(Debug, Default)]
struct MockSinkInner {
    events: Vec<RowChangedEvent>,
    resolved_ts: ResolvedTs,
    checkpoint_ts: ResolvedTs,
    last_synced_ts: Ts,
    health_error: Option<String>,
    async_close_done: bool,
    closed: bool,
}

/// Shared handle onto one [`MockTableSink`]'s state.
///
/// Tests keep a clone to script checkpoint movement, close behavior, and
/// health, and to observe what the wrapper forwarded.
#[derive(Debug, Clone, Default)]
pub struct MockSinkSharedState {
    inner: Arc<Mutex<MockSinkInner>>,
}

impl MockSinkSharedState {
    pub fn set_checkpoint_ts(&self, checkpoint_ts: ResolvedTs) {
        self.inner.lock().checkpoint_ts = checkpoint_ts;
    }

    pub fn set_last_synced_ts(&self, last_synced_ts: Ts) {
        self.inner.lock().last_synced_ts = last_synced_ts;
    }

    /// What `async_close` reports until the test flips it.
    pub fn set_async_close_done(&self, done: bool) {
        self.inner.lock().async_close_done = done;
    }

    pub fn set_health_error(&self, message: impl Into<String>) {
        self.inner.lock().health_error = Some(message.into());
    }

    pub fn checkpoint_ts(&self) -> ResolvedTs {
        self.inner.lock().checkpoint_ts
    }

    pub fn resolved_ts(&self) -> ResolvedTs {
        self.inner.lock().resolved_ts
    }

    pub fn events(&self) -> Vec<RowChangedEvent> {
        self.inner.lock().events.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

/// A [`TableSink`] whose behavior is fully driven by its
/// [`MockSinkSharedState`].
#[derive(Debug)]
pub struct MockTableSink {
    state: MockSinkSharedState,
}

impl TableSink for MockTableSink {
    fn append_row_changed_events(&self, events: Vec<RowChangedEvent>) {
        let mut inner = self.state.inner.lock();
        for event in &events {
            inner.last_synced_ts = inner.last_synced_ts.max(event.commit_ts);
        }
        inner.events.extend(events);
    }

    fn update_resolved_ts(&self, resolved_ts: ResolvedTs) -> Result<(), DynSinkError> {
        self.state.inner.lock().resolved_ts = resolved_ts;
        Ok(())
    }

    fn get_checkpoint_ts(&self) -> ResolvedTs {
        self.state.inner.lock().checkpoint_ts
    }

    fn get_last_synced_ts(&self) -> Ts {
        self.state.inner.lock().last_synced_ts
    }

    fn check_health(&self) -> Result<(), DynSinkError> {
        match &self.state.inner.lock().health_error {
            Some(message) => Err(message.clone().into()),
            None => Ok(()),
        }
    }

    fn async_close(&self) -> bool {
        let mut inner = self.state.inner.lock();
        if inner.async_close_done {
            inner.closed = true;
        }
        inner.async_close_done
    }

    fn close(&self) {
        self.state.inner.lock().closed = true;
    }
}

/// A [`SinkFactory`] producing [`MockTableSink`]s with ascending versions.
#[derive(Debug)]
pub struct MockSinkFactory {
    next_version: AtomicU64,
    ready: AtomicBool,
    created: Mutex<Vec<MockSinkSharedState>>,
}

impl Default for MockSinkFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSinkFactory {
    pub fn new() -> Self {
        Self {
            next_version: AtomicU64::new(1),
            ready: AtomicBool::new(true),
            created: Mutex::new(Vec::new()),
        }
    }

    /// When `false`, `create` yields `None` (factory not ready yet).
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }

    /// Handles onto every sink created so far, in creation order.
    pub fn created(&self) -> Vec<MockSinkSharedState> {
        self.created.lock().clone()
    }

    /// Handle onto the most recently created sink.
    ///
    /// # Panics
    ///
    /// Panics when no sink was created yet.
    pub fn latest(&self) -> MockSinkSharedState {
        self.created
            .lock()
            .last()
            .cloned()
            .expect("no sink created yet")
    }
}

impl SinkFactory for MockSinkFactory {
    fn create(&self) -> Option<(Box<dyn TableSink>, u64)> {
        if !self.ready.load(Ordering::Acquire) {
            return None;
        }
        let state = MockSinkSharedState::default();
        // New sinks come up with everything done by default so lifecycle
        // tests opt into pending closes explicitly.
        state.set_async_close_done(true);
        self.created.lock().push(state.clone());
        let version = self.next_version.fetch_add(1, Ordering::AcqRel);
        Some((Box::new(MockTableSink { state }), version))
    }
}

/// A [`DdlSink`] that records what it was asked to apply.
#[derive(Debug, Default)]
pub struct MockDdlSink {
    ddls: Mutex<Vec<DdlEvent>>,
}

impl MockDdlSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ddls(&self) -> Vec<DdlEvent> {
        self.ddls.lock().clone()
    }
}

#[async_trait]
impl DdlSink for MockDdlSink {
    async fn write_ddl_event(&self, ddl: &DdlEvent) -> Result<(), DynSinkError> {
        self.ddls.lock().push(ddl.clone());
        Ok(())
    }
}
