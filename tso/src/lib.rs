//! Timestamp-oracle adapter.
//!
//! An external time source hands out `(physical ms, logical counter)`
//! pairs; this crate composes them into the 64-bit hybrid logical clock
//! timestamps the pipeline orders by, and wraps the fetch in a bounded
//! retry loop.

#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use async_trait::async_trait;
use backoff::{Backoff, BackoffConfig, BackoffError};
use changeflow_time::TimeProvider;
use data_types::Ts;
use snafu::Snafu;
use std::{
    ops::ControlFlow,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio_util::sync::CancellationToken;

/// Generic boxed error handed back by oracle implementations.
pub type DynError = Box<dyn std::error::Error + Send + Sync>;

/// Number of low bits reserved for the logical counter.
pub const LOGICAL_BITS: u32 = 18;

const LOGICAL_MASK: u64 = (1 << LOGICAL_BITS) - 1;

/// Compose a hybrid logical clock timestamp: `(physical_ms << 18) | logical`.
pub fn compose_ts(physical_ms: i64, logical: i64) -> Ts {
    ((physical_ms as u64) << LOGICAL_BITS) | (logical as u64 & LOGICAL_MASK)
}

/// The physical milliseconds component of a composed timestamp.
pub fn extract_physical(ts: Ts) -> i64 {
    (ts >> LOGICAL_BITS) as i64
}

/// Error from a single oracle request.
#[derive(Debug, Snafu)]
pub enum TsError {
    /// The service could not be reached or answered with a transient
    /// failure; the caller may retry.
    #[snafu(display("timestamp service unavailable: {source}"))]
    Unavailable { source: DynError },

    /// The request itself was invalid or the service refused it
    /// permanently.
    #[snafu(display("timestamp request rejected: {source}"))]
    Rejected { source: DynError },
}

impl TsError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// An external source of monotonic timestamps.
#[async_trait]
pub trait TsOracle: Send + Sync + std::fmt::Debug {
    /// One timestamp request: `(physical ms, logical counter)`.
    async fn get_ts(&self) -> Result<(i64, i64), TsError>;
}

/// Error from [`fetch_replicate_ts`].
#[derive(Debug, Snafu)]
pub enum FetchError {
    #[snafu(display("timestamp oracle unavailable: {source}"))]
    OracleUnavailable { source: TsError },

    #[snafu(display("timestamp fetch cancelled"))]
    Cancelled,
}

/// Obtain a fresh replicate ts from `oracle`, retrying transient failures
/// with exponential backoff (base delay 100 ms) within a 10 s budget.
///
/// Aborts immediately when `cancel` fires.
pub async fn fetch_replicate_ts(
    oracle: &dyn TsOracle,
    cancel: &CancellationToken,
) -> Result<Ts, FetchError> {
    let config = BackoffConfig {
        init_backoff: Duration::from_millis(100),
        max_backoff: Duration::from_secs(1),
        base: 2.0,
        deadline: Some(Duration::from_secs(10)),
    };

    let mut backoff = Backoff::new(&config);
    let retried = backoff.retry_with_backoff("fetch replicate ts", || async {
        match oracle.get_ts().await {
            Ok((physical, logical)) => ControlFlow::Break(Ok(compose_ts(physical, logical))),
            Err(e) if e.is_retryable() => ControlFlow::Continue(e),
            Err(e) => ControlFlow::Break(Err(e)),
        }
    });

    tokio::select! {
        _ = cancel.cancelled() => Err(FetchError::Cancelled),
        result = retried => match result {
            Ok(Ok(ts)) => Ok(ts),
            Ok(Err(source)) => Err(FetchError::OracleUnavailable { source }),
            Err(BackoffError::DeadlineExceeded { source, .. }) => {
                Err(FetchError::OracleUnavailable { source })
            }
        },
    }
}

/// A [`TsOracle`] that composes timestamps from the local wall clock plus a
/// process-wide logical counter.
#[derive(Debug)]
pub struct SystemTsOracle {
    time_provider: Arc<dyn TimeProvider>,
    logical: AtomicI64,
}

impl SystemTsOracle {
    pub fn new(time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            time_provider,
            logical: AtomicI64::new(0),
        }
    }
}

#[async_trait]
impl TsOracle for SystemTsOracle {
    async fn get_ts(&self) -> Result<(i64, i64), TsError> {
        let physical = self.time_provider.now().timestamp_millis();
        let logical = self.logical.fetch_add(1, Ordering::AcqRel) & LOGICAL_MASK as i64;
        Ok((physical, logical))
    }
}

/// A [`TsOracle`] that replays a scripted sequence of responses.
#[derive(Debug, Default)]
pub struct MockTsOracle {
    responses: parking_lot::Mutex<std::collections::VecDeque<Result<(i64, i64), TsError>>>,
}

impl MockTsOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_ts(&self, physical: i64, logical: i64) {
        self.responses.lock().push_back(Ok((physical, logical)));
    }

    pub fn push_error(&self, error: TsError) {
        self.responses.lock().push_back(Err(error));
    }
}

#[async_trait]
impl TsOracle for MockTsOracle {
    async fn get_ts(&self) -> Result<(i64, i64), TsError> {
        self.responses
            .lock()
            .pop_front()
            .expect("no scripted oracle response left")
    }
}
