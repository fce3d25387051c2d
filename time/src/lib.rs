//! Wall-clock time abstraction.
//!
//! The sink pipeline stamps "last advanced" markers on sink wrappers and
//! compares them against stuck-detection thresholds. Routing every clock
//! read through a [`TimeProvider`] keeps those comparisons testable: tests
//! swap in a [`MockProvider`] and move time by hand.

#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::RwLock;
use std::{sync::Arc, time::Duration};

/// A UTC wall-clock instant returned by a [`TimeProvider`].
///
/// Deliberately opaque: the only supported constructions are through a
/// provider or through the millisecond helpers used by tests.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub struct Time(DateTime<Utc>);

impl std::fmt::Debug for Time {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

impl std::fmt::Display for Time {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl Time {
    /// Construct from non-leap milliseconds since the UNIX epoch.
    ///
    /// # Panics
    ///
    /// Panics if `millis` is outside the representable range.
    pub fn from_timestamp_millis(millis: i64) -> Self {
        Self(
            Utc.timestamp_millis_opt(millis)
                .single()
                .expect("timestamp in range"),
        )
    }

    /// Milliseconds since the UNIX epoch.
    pub fn timestamp_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }

    /// The duration since `other`, or `None` if `other` is later than
    /// `self`.
    pub fn checked_duration_since(&self, other: Self) -> Option<Duration> {
        self.0.signed_duration_since(other.0).to_std().ok()
    }
}

impl std::ops::Add<Duration> for Time {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        Self(self.0 + chrono::Duration::from_std(rhs).expect("duration in range"))
    }
}

/// A source of wall-clock time.
pub trait TimeProvider: std::fmt::Debug + Send + Sync + 'static {
    /// The current time. No monotonicity guarantees.
    fn now(&self) -> Time;
}

/// A [`TimeProvider`] backed by the system clock.
#[derive(Debug, Default)]
pub struct SystemProvider {}

impl SystemProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TimeProvider for SystemProvider {
    fn now(&self) -> Time {
        Time(Utc::now())
    }
}

impl TimeProvider for Arc<dyn TimeProvider> {
    fn now(&self) -> Time {
        self.as_ref().now()
    }
}

/// A [`TimeProvider`] that stands still until a test moves it.
#[derive(Debug)]
pub struct MockProvider {
    now: RwLock<Time>,
}

impl MockProvider {
    pub fn new(start: Time) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    pub fn set(&self, time: Time) {
        *self.now.write() = time
    }

    /// Advance the clock, returning the new time.
    pub fn inc(&self, duration: Duration) -> Time {
        let mut now = self.now.write();
        *now = *now + duration;
        *now
    }
}

impl TimeProvider for MockProvider {
    fn now(&self) -> Time {
        *self.now.read()
    }
}
