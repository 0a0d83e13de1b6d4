use std::fmt::Debug;

use anyhow::{
    Error,
    Result,
};
use futures_util::{
    Sink,
    Stream,
};

/// Data passed through a [`Transport`].
///
/// The distinction between text and binary exists because the setup exchange
/// always travels as text, while envelope frames follow the negotiated
/// serializer.
pub enum TransportData {
    /// A UTF-8 text message.
    Text(Vec<u8>),
    /// A binary message.
    Binary(Vec<u8>),
}

impl TransportData {
    /// The carried bytes, regardless of format.
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Text(bytes) => bytes,
            Self::Binary(bytes) => bytes,
        }
    }
}

/// A transport, over which mesh frames can be sent and received.
///
/// Implemented as a [`Stream`] and [`Sink`] of raw messages. Connection
/// closure is reported as the end of the stream; protocol violations are
/// handled at higher layers.
pub trait Transport:
    Send + Stream<Item = Result<TransportData>> + Sink<TransportData, Error = Error> + Unpin + Debug
{
}
