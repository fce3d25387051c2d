//! The decoder seam between raw upstream messages and the event model.
//!
//! Wire protocols (canal-json and friends) are external collaborators; the
//! consumer only depends on [`MessageDecoder`]. The bundled
//! [`JsonEventDecoder`] understands the newline-delimited JSON envelope the
//! file and mock sources carry.

use data_types::ChangeEvent;
use snafu::{ResultExt, Snafu};

#[derive(Debug, Snafu)]
pub enum CodecError {
    #[snafu(display("malformed message payload: {source}"))]
    Malformed { source: serde_json::Error },
}

/// Decodes one raw message into the events it carries.
pub trait MessageDecoder: Send + std::fmt::Debug {
    fn decode(&mut self, key: &[u8], value: &[u8]) -> Result<Vec<ChangeEvent>, CodecError>;
}

/// Decoder for the JSON envelope format: one [`ChangeEvent`] envelope per
/// line in the message value; the key is unused.
#[derive(Debug, Default)]
pub struct JsonEventDecoder {}

impl JsonEventDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MessageDecoder for JsonEventDecoder {
    fn decode(&mut self, _key: &[u8], value: &[u8]) -> Result<Vec<ChangeEvent>, CodecError> {
        value
            .split(|b| *b == b'\n')
            .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
            .map(|line| serde_json::from_slice(line))
            .collect::<Result<Vec<_>, _>>()
            .context(MalformedSnafu)
    }
}
