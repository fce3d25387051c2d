//! Re-exports the workspace's observability dependencies so that every crate
//! pins the same version of `tracing` through one place.

#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_debug_implementations)]

pub use tracing;
