//! Bookkeeping for sorter cleanup.
//!
//! The upstream sorter buffers events until the pipeline tells it a range
//! can be dropped. Cleanup calls into the sorter are expensive, so the
//! ledger records how many events passed through per position range and
//! defers the call until a meaningful number of events has accumulated.

use data_types::Position;
use tso::extract_physical;

/// Number of events that entered the pipeline within one position range.
///
/// If `events` is greater than 0 there must be events in the range
/// `(previous.last_pos, last_pos]`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RangeEventCount {
    /// `first_pos` is kept across merges so the merge window can be
    /// measured from the oldest position a record covers.
    pub first_pos: Position,
    pub last_pos: Position,
    pub events: u64,
}

impl RangeEventCount {
    pub fn new(pos: Position, events: u64) -> Self {
        Self {
            first_pos: pos,
            last_pos: pos,
            events,
        }
    }
}

/// Physical-time width under which adjacent records are merged, in ms.
const MERGE_WINDOW_MS: i64 = 1000;

/// An append-mostly sequence of [`RangeEventCount`] records with strictly
/// ascending `last_pos`.
#[derive(Debug, Default)]
pub struct RangeEventCountLedger {
    records: Vec<RangeEventCount>,
}

impl RangeEventCountLedger {
    /// Record a newly ingested batch.
    ///
    /// Ignored unless it strictly advances the last known position. When
    /// the new record lands within [`MERGE_WINDOW_MS`] of the last record's
    /// `first_pos` it is folded into that record instead of appended,
    /// keeping the ledger O(seconds of history).
    pub fn update(&mut self, count: RangeEventCount) {
        let Some(last) = self.records.last_mut() else {
            self.records.push(count);
            return;
        };
        if last.last_pos >= count.last_pos {
            return;
        }

        let last_phys = extract_physical(last.first_pos.commit_ts);
        let curr_phys = extract_physical(count.last_pos.commit_ts);
        if curr_phys - last_phys >= MERGE_WINDOW_MS {
            self.records.push(count);
        } else {
            last.last_pos = count.last_pos;
            last.events += count.events;
        }
    }

    /// Decide whether a sorter cleanup below `upper_bound` is worth it.
    ///
    /// Returns `true` and drops the covered records when at least
    /// `min_events` accumulated below the bound. Otherwise the covered
    /// records are folded into a single head record (so the count keeps
    /// accumulating) and `false` is returned.
    pub fn clean(&mut self, upper_bound: Position, min_events: u64) -> bool {
        let idx = self
            .records
            .partition_point(|r| r.last_pos <= upper_bound);
        if self.records.is_empty() || idx == 0 {
            return false;
        }

        let count: u64 = self.records[..idx].iter().map(|r| r.events).sum();
        let should_clean = count >= min_events;

        if should_clean {
            self.records.drain(..idx);
        } else {
            self.records[idx - 1].events = count;
            self.records.drain(..idx - 1);
        }
        should_clean
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[cfg(test)]
    fn records(&self) -> &[RangeEventCount] {
        &self.records
    }
}
