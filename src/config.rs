//! CLI configuration for the changefeed consumer.

use observability_deps::tracing::info;
use snafu::{ensure, OptionExt, ResultExt, Snafu};
use std::{path::PathBuf, str::FromStr};

/// Wire protocols a changefeed can be encoded with.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Protocol {
    Default,
    Open,
    Canal,
    CanalJson,
    Avro,
    Maxwell,
}

impl Protocol {
    /// The protocols the pulsar surface supports.
    pub fn is_pulsar_supported(&self) -> bool {
        matches!(self, Self::CanalJson | Self::Canal | Self::Maxwell)
    }

    /// Only these protocols can carry the TiDB extension fields.
    pub fn supports_tidb_extension(&self) -> bool {
        matches!(self, Self::CanalJson | Self::Avro)
    }
}

impl FromStr for Protocol {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(Self::Default),
            "open-protocol" => Ok(Self::Open),
            "canal" => Ok(Self::Canal),
            "canal-json" => Ok(Self::CanalJson),
            "avro" => Ok(Self::Avro),
            "maxwell" => Ok(Self::Maxwell),
            other => UnknownProtocolSnafu { protocol: other }.fail(),
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Default => "default",
            Self::Open => "open-protocol",
            Self::Canal => "canal",
            Self::CanalJson => "canal-json",
            Self::Avro => "avro",
            Self::Maxwell => "maxwell",
        };
        f.write_str(s)
    }
}

/// A `scheme://authority/path?query` endpoint.
///
/// Broker URIs carry comma-separated multi-host authorities
/// (`pulsar://a:6650,b:6650/topic`), which strict URL parsers reject, so
/// the split is done by hand and only the query goes through
/// percent-decoding.
#[derive(Debug, Clone)]
pub struct EndpointUri {
    pub raw: String,
    pub scheme: String,
    pub authority: String,
    /// Path with the leading `/` preserved (empty when absent).
    pub path: String,
    pub query: Vec<(String, String)>,
}

impl FromStr for EndpointUri {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = s.split_once("://").context(MissingSchemeSnafu { uri: s })?;
        ensure!(
            !scheme.is_empty() && scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '+'),
            MissingSchemeSnafu { uri: s }
        );

        let (rest, query) = match rest.split_once('?') {
            Some((rest, query)) => (rest, query),
            None => (rest, ""),
        };
        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, ""),
        };

        let query = url::form_urlencoded::parse(query.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        Ok(Self {
            raw: s.to_string(),
            scheme: scheme.to_string(),
            authority: authority.to_string(),
            path: path.to_string(),
            query,
        })
    }
}

impl EndpointUri {
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

impl std::fmt::Display for EndpointUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Command line flags of the consumer binary.
#[derive(Debug, clap::Parser)]
#[clap(
    name = "changeflow",
    about = "Consume a changefeed and replicate it to a downstream sink",
    version
)]
pub struct ConsumerConfig {
    /// Upstream URI.
    ///
    /// Recognised query parameters: `protocol`, `enable-tidb-extension`,
    /// `version`.
    #[clap(long = "upstream-uri", env = "CHANGEFLOW_UPSTREAM_URI")]
    pub upstream_uri: String,

    /// Downstream sink URI.
    #[clap(long = "downstream-uri", env = "CHANGEFLOW_DOWNSTREAM_URI")]
    pub downstream_uri: String,

    /// Changefeed config file. Opaque to the consumer; it is only checked
    /// for readability at startup.
    #[clap(long = "config")]
    pub config_file: Option<PathBuf>,

    /// Log destination; stdout when unset.
    #[clap(long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// Log severity filter (error, warn, info, debug, trace or any
    /// tracing-subscriber directive).
    #[clap(long = "log-level", default_value = "info")]
    pub log_level: String,

    /// Time zone used when rendering timestamps. "System" keeps the
    /// process default.
    #[clap(long = "tz", default_value = "System")]
    pub timezone: String,

    /// CA certificate path for the upstream TLS connection.
    #[clap(long = "ca")]
    pub ca: Option<PathBuf>,

    /// Certificate path for the upstream TLS connection.
    #[clap(long = "cert")]
    pub cert: Option<PathBuf>,

    /// Private key path for the upstream TLS connection.
    #[clap(long = "key")]
    pub key: Option<PathBuf>,

    /// Number of upstream partitions.
    #[clap(long = "partition-num", default_value_t = 1)]
    pub partition_num: usize,

    /// Upper bound for a single message, in bytes. A message carrying one
    /// oversized event is tolerated with a warning.
    #[clap(long = "max-message-bytes", default_value_t = usize::MAX)]
    pub max_message_bytes: usize,

    /// Upper bound for the number of events carried by one message.
    #[clap(long = "max-batch-size", default_value_t = usize::MAX)]
    pub max_batch_size: usize,
}

/// Message-size guards enforced by the decode pump.
#[derive(Debug, Copy, Clone)]
pub struct MessageLimits {
    pub max_message_bytes: usize,
    pub max_batch_size: usize,
}

/// The adjusted, validated form of [`ConsumerConfig`].
#[derive(Debug)]
pub struct ConsumerOptions {
    pub upstream: EndpointUri,
    pub downstream: EndpointUri,
    /// Broker addresses from the upstream authority component.
    pub addresses: Vec<String>,
    /// Topic from the upstream path component.
    pub topic: String,
    pub protocol: Protocol,
    pub enable_tidb_extension: bool,
    /// The producer version announced on the upstream URI, if any.
    pub version: Option<String>,
    pub partition_num: usize,
    pub timezone: String,
    pub limits: MessageLimits,
}

#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("invalid uri {uri:?}: missing scheme"))]
    MissingScheme { uri: String },

    #[snafu(display("unknown protocol {protocol:?}"))]
    UnknownProtocol { protocol: String },

    #[snafu(display(
        "unsupported protocol {protocol}, only canal-json, canal and maxwell are supported here"
    ))]
    UnsupportedProtocol { protocol: Protocol },

    #[snafu(display("invalid enable-tidb-extension value {value:?}"))]
    InvalidTidbExtension { value: String },

    #[snafu(display("enable-tidb-extension only works with canal-json or avro"))]
    TidbExtensionProtocolMismatch,

    #[snafu(display("config file {} is not readable: {source}", path.display()))]
    ConfigFileUnreadable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("partition-num must be at least 1"))]
    NoPartitions,
}

impl ConsumerConfig {
    /// Validate the raw flags and fold the upstream URI query parameters
    /// in.
    pub fn adjust(&self) -> Result<ConsumerOptions, ConfigError> {
        ensure!(self.partition_num >= 1, NoPartitionsSnafu);

        let upstream: EndpointUri = self.upstream_uri.parse()?;
        let downstream: EndpointUri = self.downstream_uri.parse()?;

        let topic = upstream.path.trim_matches('/').to_string();
        let addresses = upstream
            .authority
            .split(',')
            .filter(|a| !a.is_empty())
            .map(str::to_string)
            .collect();

        let mut protocol = Protocol::Default;
        if let Some(value) = upstream.query_param("protocol") {
            protocol = value.parse()?;
            ensure!(
                protocol.is_pulsar_supported(),
                UnsupportedProtocolSnafu { protocol }
            );
        }

        let mut enable_tidb_extension = false;
        if let Some(value) = upstream.query_param("enable-tidb-extension") {
            enable_tidb_extension =
                value
                    .parse::<bool>()
                    .ok()
                    .context(InvalidTidbExtensionSnafu { value })?;
            if enable_tidb_extension {
                ensure!(
                    protocol.supports_tidb_extension(),
                    TidbExtensionProtocolMismatchSnafu
                );
            }
        }

        let version = upstream.query_param("version").map(str::to_string);

        if let Some(path) = &self.config_file {
            // The contents are an external collaborator's concern; fail
            // early when the operator points at something unreadable.
            std::fs::metadata(path).context(ConfigFileUnreadableSnafu { path })?;
        }

        info!(
            upstream = %upstream,
            topic = %topic,
            %protocol,
            enable_tidb_extension,
            version = version.as_deref().unwrap_or(""),
            partition_num = self.partition_num,
            "consumer options adjusted",
        );

        Ok(ConsumerOptions {
            upstream,
            downstream,
            addresses,
            topic,
            protocol,
            enable_tidb_extension,
            version,
            partition_num: self.partition_num,
            timezone: self.timezone.clone(),
            limits: MessageLimits {
                max_message_bytes: self.max_message_bytes,
                max_batch_size: self.max_batch_size,
            },
        })
    }
}
