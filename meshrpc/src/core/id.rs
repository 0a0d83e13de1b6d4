use std::fmt::Display;

use serde::{
    Deserialize,
    Serialize,
    de::{
        Unexpected,
        Visitor,
    },
};
use thiserror::Error;
use uuid::Uuid;

/// Error for a string that does not parse as an ID.
#[derive(Debug, Error)]
#[error("{value} is not a valid id")]
pub struct InvalidId {
    value: String,
}

struct UuidStringVisitor;

impl Visitor<'_> for UuidStringVisitor {
    type Value = Uuid;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(formatter, "a uuid string")
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Uuid::parse_str(v).map_err(|_| E::invalid_value(Unexpected::Str(v), &self))
    }
}

/// The identifier of a session, chosen by the connection initiator.
///
/// Session IDs are communicated in the setup token and identify the peer on
/// the accepting node for the whole lifetime of the connection. They travel
/// as uuid strings regardless of the negotiated serializer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl Serialize for SessionId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for SessionId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_str(UuidStringVisitor).map(Self)
    }
}

impl SessionId {
    /// Generates a new random session ID.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl TryFrom<&str> for SessionId {
    type Error = InvalidId;
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Uuid::parse_str(value).map(Self).map_err(|_| InvalidId {
            value: value.to_owned(),
        })
    }
}

/// The correlation identifier of a single request/response exchange.
///
/// A request ID is allocated by the caller, echoed back in the response, and
/// doubles as the identity of a cursor started by the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl Serialize for RequestId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for RequestId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_str(UuidStringVisitor).map(Self)
    }
}

impl RequestId {
    /// Generates a new random request ID.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl TryFrom<&str> for RequestId {
    type Error = InvalidId;
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Uuid::parse_str(value).map(Self).map_err(|_| InvalidId {
            value: value.to_owned(),
        })
    }
}
