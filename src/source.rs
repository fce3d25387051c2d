//! The upstream message seam.
//!
//! The production broker client is an external collaborator; the consumer
//! core only depends on [`MessageSource`]. Two sources are bundled: a
//! file-backed one for local runs and tests, and an in-memory one for unit
//! tests.

use crate::config::ConsumerOptions;
use async_trait::async_trait;
use observability_deps::tracing::info;
use snafu::{ResultExt, Snafu};
use std::collections::VecDeque;

/// One raw message from the upstream, before decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMessage {
    pub partition: usize,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

#[derive(Debug, Snafu)]
pub enum SourceError {
    #[snafu(display(
        "no client for upstream scheme {scheme:?} is bundled with this binary; \
         bundled sources: file, mock"
    ))]
    UnsupportedScheme { scheme: String },

    #[snafu(display("failed to read source file {path:?}: {source}"))]
    FileRead {
        path: String,
        source: std::io::Error,
    },
}

/// An ordered stream of raw upstream messages.
#[async_trait]
pub trait MessageSource: Send + std::fmt::Debug {
    /// The next message, or `None` once the stream is exhausted.
    async fn recv(&mut self) -> Result<Option<SourceMessage>, SourceError>;
}

/// Construct the message source selected by the upstream URI scheme.
pub async fn connect(options: &ConsumerOptions) -> Result<Box<dyn MessageSource>, SourceError> {
    match options.upstream.scheme.as_str() {
        "file" => {
            let source = FileSource::open(&options.upstream.path).await?;
            Ok(Box::new(source))
        }
        "mock" => Ok(Box::new(MockMessageSource::default())),
        other => UnsupportedSchemeSnafu { scheme: other }.fail(),
    }
}

/// Replays messages from a newline-delimited file.
///
/// Each line is one message value (a JSON event envelope). A line may carry
/// a leading `<partition> ` prefix to address a partition other than 0.
#[derive(Debug)]
pub struct FileSource {
    messages: VecDeque<SourceMessage>,
}

impl FileSource {
    pub async fn open(path: &str) -> Result<Self, SourceError> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .context(FileReadSnafu { path })?;

        let messages = contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(Self::parse_line)
            .collect::<VecDeque<_>>();

        info!(path, n_messages = messages.len(), "replaying changefeed from file");
        Ok(Self { messages })
    }

    fn parse_line(line: &str) -> SourceMessage {
        let (partition, value) = match line.split_once(' ') {
            Some((prefix, rest)) => match prefix.parse::<usize>() {
                Ok(partition) => (partition, rest),
                Err(_) => (0, line),
            },
            None => (0, line),
        };
        SourceMessage {
            partition,
            key: Vec::new(),
            value: value.as_bytes().to_vec(),
        }
    }
}

#[async_trait]
impl MessageSource for FileSource {
    async fn recv(&mut self) -> Result<Option<SourceMessage>, SourceError> {
        Ok(self.messages.pop_front())
    }
}

/// An in-memory source fed by tests.
#[derive(Debug, Default)]
pub struct MockMessageSource {
    messages: VecDeque<SourceMessage>,
}

impl MockMessageSource {
    pub fn new(messages: impl IntoIterator<Item = SourceMessage>) -> Self {
        Self {
            messages: messages.into_iter().collect(),
        }
    }

    pub fn push(&mut self, message: SourceMessage) {
        self.messages.push_back(message);
    }
}

#[async_trait]
impl MessageSource for MockMessageSource {
    async fn recv(&mut self) -> Result<Option<SourceMessage>, SourceError> {
        Ok(self.messages.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn file_source_replays_lines_with_partition_prefixes() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"type":"resolved","event":10}}"#).unwrap();
        writeln!(file, r#"1 {{"type":"resolved","event":20}}"#).unwrap();
        writeln!(file).unwrap();
        file.flush().unwrap();

        let mut source = FileSource::open(file.path().to_str().unwrap()).await.unwrap();

        let first = source.recv().await.unwrap().unwrap();
        assert_eq!(first.partition, 0);
        assert_eq!(first.value, br#"{"type":"resolved","event":10}"#.to_vec());

        let second = source.recv().await.unwrap().unwrap();
        assert_eq!(second.partition, 1);
        assert_eq!(second.value, br#"{"type":"resolved","event":20}"#.to_vec());

        assert_eq!(source.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let err = FileSource::open("/definitely/not/here.ndjson")
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::FileRead { .. }));
    }
}
