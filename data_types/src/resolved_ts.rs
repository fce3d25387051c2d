//! Resolved timestamps.

use crate::Ts;
use serde::{Deserialize, Serialize};

/// How a [`ResolvedTs`] was produced.
///
/// A batched resolved ts is emitted while a large transaction is still being
/// split into batches; the batch id disambiguates progress inside one commit
/// ts.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ResolvedTsMode {
    #[default]
    Normal,
    Batched,
}

/// A frontier below which all events have been observed.
///
/// Ordered by `(ts, batch id)`, where normal mode sorts after every batch of
/// the same commit ts (a normal resolved ts means the whole commit ts is
/// complete).
#[derive(Debug, Copy, Clone, Serialize, Deserialize, Default)]
pub struct ResolvedTs {
    pub ts: Ts,
    pub batch_id: u64,
    pub mode: ResolvedTsMode,
}

impl ResolvedTs {
    /// A resolved ts covering everything up to and including `ts`.
    pub const fn new(ts: Ts) -> Self {
        Self {
            ts,
            batch_id: 0,
            mode: ResolvedTsMode::Normal,
        }
    }

    /// A resolved ts covering `ts` only up to `batch_id`.
    pub const fn new_batch(ts: Ts, batch_id: u64) -> Self {
        Self {
            ts,
            batch_id,
            mode: ResolvedTsMode::Batched,
        }
    }

    fn effective_batch_id(&self) -> u64 {
        match self.mode {
            ResolvedTsMode::Normal => u64::MAX,
            ResolvedTsMode::Batched => self.batch_id,
        }
    }

    pub fn is_less_than(&self, other: Self) -> bool {
        *self < other
    }

    pub fn is_greater_than(&self, other: Self) -> bool {
        *self > other
    }

    pub fn equal_or_greater(&self, other: Self) -> bool {
        *self >= other
    }
}

impl PartialEq for ResolvedTs {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}

impl Eq for ResolvedTs {}

impl PartialOrd for ResolvedTs {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ResolvedTs {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.ts, self.effective_batch_id()).cmp(&(other.ts, other.effective_batch_id()))
    }
}

impl std::fmt::Display for ResolvedTs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.mode {
            ResolvedTsMode::Normal => write!(f, "{}", self.ts),
            ResolvedTsMode::Batched => write!(f, "{}({})", self.ts, self.batch_id),
        }
    }
}
