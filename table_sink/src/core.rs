//! Contracts between the pipeline core and its downstream collaborators.

use async_trait::async_trait;
use data_types::{DdlEvent, ResolvedTs, RowChangedEvent, Ts};
use snafu::Snafu;

/// Generic boxed error type raised by sink implementations.
///
/// The dynamic boxing makes it easier to deal with errors from different
/// implementations.
pub type DynSinkError = Box<dyn std::error::Error + Send + Sync>;

/// Errors surfaced by [`TableSinkWrapper`](crate::TableSinkWrapper)
/// operations.
#[derive(Debug, Snafu)]
pub enum TableSinkError {
    /// The wrapper's sink slot is empty: the sink was closed (or never
    /// created). Retriable once `is_ready` succeeds again.
    #[snafu(display("table sink cleared"))]
    SinkClosed,

    /// The downstream sink failed. Recovery is
    /// `mark_as_closing → async_close → is_ready → restart`.
    #[snafu(display("table sink internal error: {source}"))]
    SinkInternal { source: DynSinkError },
}

/// A downstream sink for one table's row changes.
///
/// Implementations may buffer; durability is only observable through
/// [`TableSink::get_checkpoint_ts`], which must be monotone non-decreasing.
pub trait TableSink: Send + Sync + std::fmt::Debug {
    /// Deliver events. May buffer.
    fn append_row_changed_events(&self, events: Vec<RowChangedEvent>);

    /// Declare a frontier; the sink flushes at its own discretion.
    fn update_resolved_ts(&self, resolved_ts: ResolvedTs) -> Result<(), DynSinkError>;

    /// The frontier below which all events have been durably applied.
    fn get_checkpoint_ts(&self) -> ResolvedTs;

    /// Commit ts of the last successful write observed by the sink.
    fn get_last_synced_ts(&self) -> Ts;

    /// Errors when the sink has entered a non-recoverable state.
    fn check_health(&self) -> Result<(), DynSinkError>;

    /// Initiate an asynchronous close. Returns `true` once the sink is
    /// fully closed; callers poll until then.
    fn async_close(&self) -> bool;

    /// Close synchronously.
    fn close(&self);
}

/// Creates downstream sinks on demand.
pub trait SinkFactory: Send + Sync + std::fmt::Debug {
    /// A new sink plus its version: a monotonically assigned non-zero id
    /// unique per sink instance (consumed by the stuck detector).
    ///
    /// `None` means the factory is not ready yet; the caller retries.
    fn create(&self) -> Option<(Box<dyn TableSink>, u64)>;
}

/// A downstream sink for schema changes.
#[async_trait]
pub trait DdlSink: Send + Sync + std::fmt::Debug {
    async fn write_ddl_event(&self, ddl: &DdlEvent) -> Result<(), DynSinkError>;
}
