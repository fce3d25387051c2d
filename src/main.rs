//! Entrypoint of the changeflow consumer binary.

#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use changeflow::{
    codec::JsonEventDecoder,
    config::{ConfigError, ConsumerConfig, ConsumerOptions},
    consumer::{pump_source, Consumer, ConsumerError, PumpError},
    logging::{init_logs, LoggingError},
    source::{self, SourceError},
};
use changeflow_time::{SystemProvider, TimeProvider};
use clap::Parser;
use data_types::ChangefeedId;
use observability_deps::tracing::info;
use snafu::{ResultExt, Snafu};
use std::sync::Arc;
use table_sink::{
    blackhole::{BlackholeDdlSink, BlackholeSinkFactory},
    DdlSink, SinkFactory,
};
use tokio_util::sync::CancellationToken;
use tso::{SystemTsOracle, TsOracle};

#[derive(Debug, Snafu)]
enum RunError {
    #[snafu(display("failed to initialize logs: {source}"))]
    Logging { source: LoggingError },

    #[snafu(display("invalid configuration: {source}"))]
    Config { source: ConfigError },

    #[snafu(display("failed to connect the upstream source: {source}"))]
    Upstream { source: SourceError },

    #[snafu(display(
        "no sink for downstream scheme {scheme:?} is bundled with this binary; \
         bundled sinks: blackhole"
    ))]
    UnsupportedDownstream { scheme: String },

    #[snafu(display("consumer failed: {source}"))]
    Driver { source: ConsumerError },

    #[snafu(display("upstream pump failed: {source}"))]
    Pump { source: PumpError },
}

#[tokio::main]
async fn main() {
    let config = ConsumerConfig::parse();
    if let Err(e) = run(config).await {
        eprintln!("changeflow consumer failed: {e}");
        std::process::exit(1);
    }
}

async fn run(config: ConsumerConfig) -> Result<(), RunError> {
    init_logs(&config.log_level, config.log_file.as_deref()).context(LoggingSnafu)?;
    info!(version = env!("CARGO_PKG_VERSION"), "changeflow consumer starting");

    let options = config.adjust().context(ConfigSnafu)?;

    let source = source::connect(&options).await.context(UpstreamSnafu)?;
    let (sink_factory, ddl_sink) = build_downstream(&options)?;

    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemProvider::new());
    let oracle: Arc<dyn TsOracle> = Arc::new(SystemTsOracle::new(Arc::clone(&time_provider)));
    let consumer = Arc::new(Consumer::new(
        ChangefeedId::new("changeflow-consumer"),
        options.partition_num,
        sink_factory,
        ddl_sink,
        oracle,
        time_provider,
    ));

    let cancel = CancellationToken::new();
    let pump = tokio::spawn({
        let consumer = Arc::clone(&consumer);
        let cancel = cancel.clone();
        let limits = options.limits;
        async move {
            let result = pump_source(
                consumer,
                source,
                Box::new(JsonEventDecoder::new()),
                limits,
                cancel.clone(),
            )
            .await;
            if result.is_err() {
                // Wake the driver so the process can exit with the error.
                cancel.cancel();
            }
            result
        }
    });

    info!("changeflow consumer up and running");
    let driver_result = tokio::select! {
        _ = wait_for_signal() => {
            info!("terminating: via signal");
            Ok(())
        }
        result = consumer.run(&cancel) => result.context(DriverSnafu),
    };

    cancel.cancel();
    let pump_result = pump.await;
    driver_result?;
    match pump_result {
        Ok(result) => result.context(PumpSnafu)?,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(_) => {}
    }

    info!(
        buffered_events = consumer.buffered_event_count(),
        "changeflow consumer stopped",
    );
    Ok(())
}

fn build_downstream(
    options: &ConsumerOptions,
) -> Result<(Arc<dyn SinkFactory>, Arc<dyn DdlSink>), RunError> {
    match options.downstream.scheme.as_str() {
        "blackhole" => Ok((
            Arc::new(BlackholeSinkFactory::new()),
            Arc::new(BlackholeDdlSink::new()),
        )),
        other => UnsupportedDownstreamSnafu { scheme: other }.fail(),
    }
}

/// On unix, SIGINT and SIGTERM both terminate the consumer gracefully.
#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = signal(SignalKind::terminate()).expect("failed to register signal handler");
    let mut int = signal(SignalKind::interrupt()).expect("failed to register signal handler");

    tokio::select! {
        _ = term.recv() => info!("received SIGTERM"),
        _ = int.recv() => info!("received SIGINT"),
    }
}

#[cfg(windows)]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
