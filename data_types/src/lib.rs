//! Shared value types for the changeflow CDC pipeline.

#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use serde::{Deserialize, Serialize};

mod event;
mod position;
mod resolved_ts;

pub use event::{ChangeEvent, Column, DdlEvent, RowChangedEvent};
pub use position::Position;
pub use resolved_ts::{ResolvedTs, ResolvedTsMode};

/// A 64-bit hybrid logical clock timestamp: physical milliseconds in the
/// high bits, an 18-bit logical counter in the low bits.
pub type Ts = u64;

/// Identifies a logical table within a changefeed.
pub type TableId = i64;

/// Identifies a configured replication stream. Used for logging.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChangefeedId {
    pub namespace: String,
    pub id: String,
}

impl ChangefeedId {
    /// A changefeed in the default namespace.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            namespace: "default".to_string(),
            id: id.into(),
        }
    }
}

impl std::fmt::Display for ChangefeedId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.id)
    }
}

/// An interval identifying a logical table (or one partition of it)
/// uniquely. Used for logging.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TableSpan {
    pub table_id: TableId,
}

impl TableSpan {
    pub fn for_table(table_id: TableId) -> Self {
        Self { table_id }
    }
}

impl std::fmt::Display for TableSpan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "table[{}]", self.table_id)
    }
}

/// Lifecycle state of a replicated table.
///
/// Transitions are monotonic along the declared order; a stopped table is
/// never resurrected.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum TableState {
    Preparing = 0,
    Prepared = 1,
    Replicating = 2,
    Stopping = 3,
    Stopped = 4,
}

impl TableState {
    /// Inverse of `state as u32`.
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Preparing),
            1 => Some(Self::Prepared),
            2 => Some(Self::Replicating),
            3 => Some(Self::Stopping),
            4 => Some(Self::Stopped),
            _ => None,
        }
    }
}

impl std::fmt::Display for TableState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Preparing => "preparing",
            Self::Prepared => "prepared",
            Self::Replicating => "replicating",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}
