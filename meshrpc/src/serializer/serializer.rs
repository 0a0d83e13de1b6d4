use std::fmt::Debug;

use anyhow::Result;

use crate::{
    message::message::Frame,
    serializer::{
        json::JsonSerializer,
        message_pack::MessagePackSerializer,
    },
};

/// The type of serializer to use for a session.
///
/// Negotiated in the setup claims; the accepter follows the initiator's
/// choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SerializerType {
    /// Serializes frames to and from JavaScript Object Notation, carried as
    /// websocket text frames.
    Json,
    /// Serializes frames to and from the MessagePack format, carried as
    /// websocket binary frames.
    MessagePack,
}

impl SerializerType {
    /// The name used in the setup claims.
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::MessagePack => "pickle",
        }
    }

    /// Whether frames travel as binary websocket messages.
    pub fn binary(&self) -> bool {
        *self == Self::MessagePack
    }
}

impl TryFrom<&str> for SerializerType {
    type Error = &'static str;
    fn try_from(value: &str) -> std::result::Result<Self, Self::Error> {
        match value {
            "json" => Ok(Self::Json),
            "pickle" => Ok(Self::MessagePack),
            _ => Err("unsupported serializer"),
        }
    }
}

/// A serializer, which serializes and deserializes frames to a well-known
/// format that can be passed over wire.
pub trait Serializer: Send + Debug {
    /// Serializes the given frame to bytes.
    fn serialize(&self, frame: &Frame) -> Result<Vec<u8>>;

    /// Deserializes bytes to a frame.
    fn deserialize(&self, bytes: &[u8]) -> Result<Frame>;
}

/// Creates a new [`Serializer`] for the given type.
pub fn new_serializer(serializer_type: SerializerType) -> Box<dyn Serializer> {
    match serializer_type {
        SerializerType::Json => Box::new(JsonSerializer::default()),
        SerializerType::MessagePack => Box::new(MessagePackSerializer::default()),
    }
}
