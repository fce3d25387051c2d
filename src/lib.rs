//! The changefeed consumer: decodes an ordered stream of row-change / DDL /
//! resolved events, buffers rows per table, and flushes them through
//! per-table sink wrappers with monotonic checkpoint semantics.

#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

pub mod codec;
pub mod config;
pub mod consumer;
pub mod logging;
pub mod source;
