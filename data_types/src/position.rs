//! Event-boundary positions in the upstream sorter.

use crate::Ts;

/// Identifies a unique event boundary in the sorter.
///
/// Ordered by `(commit_ts, start_ts)`; the derive relies on the field
/// order below.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position {
    pub commit_ts: Ts,
    pub start_ts: Ts,
}

impl Position {
    pub fn new(commit_ts: Ts, start_ts: Ts) -> Self {
        Self {
            commit_ts,
            start_ts,
        }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.commit_ts, self.start_ts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordered_by_commit_then_start() {
        assert!(Position::new(10, 9) < Position::new(11, 1));
        assert!(Position::new(10, 1) < Position::new(10, 2));
        assert_eq!(Position::new(10, 2), Position::new(10, 2));
    }
}
