//! The decoded event model.

use crate::{TableId, Ts};
use serde::{Deserialize, Serialize};

/// A single column value within a row change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    /// `None` encodes SQL NULL.
    pub value: Option<String>,
}

impl Column {
    fn approximate_bytes(&self) -> usize {
        self.name.len() + self.value.as_ref().map(|v| v.len()).unwrap_or_default()
    }
}

/// One row change from an upstream transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowChangedEvent {
    pub schema: String,
    pub table: String,
    /// Physical table id when the codec carries one; `0` otherwise, in
    /// which case the consumer derives a stable id itself.
    #[serde(default)]
    pub table_id: TableId,
    /// Set when the row belongs to one partition of a partitioned table.
    #[serde(default)]
    pub is_partition: bool,
    #[serde(default)]
    pub start_ts: Ts,
    pub commit_ts: Ts,
    #[serde(default)]
    pub columns: Vec<Column>,
    #[serde(default)]
    pub pre_columns: Vec<Column>,
}

impl RowChangedEvent {
    /// A transaction like `begin; insert ...; delete ...; commit;` can
    /// produce a row change with neither columns nor pre-columns. Such
    /// events carry no data and are skipped before the sink.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty() && self.pre_columns.is_empty()
    }

    /// Approximate in-memory size, in bytes. Includes `Self`.
    pub fn approximate_bytes(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.schema.len()
            + self.table.len()
            + self
                .columns
                .iter()
                .chain(self.pre_columns.iter())
                .map(|c| std::mem::size_of::<Column>() + c.approximate_bytes())
                .sum::<usize>()
    }
}

/// A schema change from the upstream.
///
/// Value equality is meaningful: a rename-tables job emits several distinct
/// DDL events that share one commit ts, while a redundant re-delivery is
/// equal to the previously accepted event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DdlEvent {
    pub commit_ts: Ts,
    #[serde(default)]
    pub schema: String,
    #[serde(default)]
    pub table: String,
    pub query: String,
}

/// A decoded upstream message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "event", rename_all = "snake_case")]
pub enum ChangeEvent {
    Row(RowChangedEvent),
    Ddl(DdlEvent),
    Resolved(Ts),
}

impl ChangeEvent {
    /// The commit ts the event carries (the frontier ts for resolved
    /// events).
    pub fn commit_ts(&self) -> Ts {
        match self {
            Self::Row(row) => row.commit_ts,
            Self::Ddl(ddl) => ddl.commit_ts,
            Self::Resolved(ts) => *ts,
        }
    }
}

impl From<RowChangedEvent> for ChangeEvent {
    fn from(v: RowChangedEvent) -> Self {
        Self::Row(v)
    }
}

impl From<DdlEvent> for ChangeEvent {
    fn from(v: DdlEvent) -> Self {
        Self::Ddl(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(commit_ts: Ts) -> RowChangedEvent {
        RowChangedEvent {
            schema: "test".to_string(),
            table: "t1".to_string(),
            table_id: 0,
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
    fn empty_row_detection() {
        let mut event = row(100);
        assert!(!event.is_empty());
        event.columns.clear();
        assert!(event.is_empty());
    }

    #[test]
    fn approximate_bytes_counts_columns() {
        let event = row(100);
        let bare = std::mem::size_of::<RowChangedEvent>();
        assert!(event.approximate_bytes() > bare);
    }

    #[test]
    fn change_event_commit_ts() {
        assert_eq!(ChangeEvent::from(row(100)).commit_ts(), 100);
        assert_eq!(ChangeEvent::Resolved(42).commit_ts(), 42);
    }

    #[test]
    fn change_event_serde_envelope() {
        let event = ChangeEvent::Resolved(7);
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"type":"resolved","event":7}"#);
        let back: ChangeEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);

        let ddl = ChangeEvent::from(DdlEvent {
            commit_ts: 9,
            schema: "test".to_string(),
            table: "t1".to_string(),
            query: "create table t1(id int primary key)".to_string(),
        });
        let back: ChangeEvent = serde_json::from_str(&serde_json::to_string(&ddl).unwrap()).unwrap();
        assert_eq!(back, ddl);
    }
}
