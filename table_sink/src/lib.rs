//! Per-table sink contracts and the concurrent sink wrapper.
//!
//! A [`TableSinkWrapper`] owns one downstream [`TableSink`] lazily, gates
//! delivery on three monotonic timestamps (barrier, sorter-resolved,
//! checkpoint), and preserves the checkpoint across sink close/restart
//! cycles.

#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

pub mod blackhole;
pub mod core;
pub mod mock;
mod range_ledger;
mod wrapper;

pub use crate::core::{DdlSink, DynSinkError, SinkFactory, TableSink, TableSinkError};
pub use range_ledger::{RangeEventCount, RangeEventCountLedger};
pub use wrapper::{filter_row_changed_events, TableSinkWrapper};
