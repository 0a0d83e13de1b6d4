use serde::{
    Deserialize,
    Serialize,
};
use uuid::Uuid;

use crate::core::{
    id::RequestId,
    types::{
        Dictionary,
        List,
        Value,
    },
};

/// The reserved action name for discovery queries.
pub const GET_REGISTERED_FUNCTIONS: &str = "get_registered_functions";

/// The reserved action name for advancing a server-side cursor.
pub const CURSOR_NEXT: &str = "CURSOR_NEXT";

/// The sentinel key starting a remote cursor.
pub const CURSOR_START: &str = "CURSOR_START";

/// The sentinel value terminating a cursor.
pub const CURSOR_END: &str = "CURSOR_END";

/// The sentinel key reporting a cursor that failed mid-stream.
pub const CURSOR_ERROR: &str = "cursor_error";

/// A frame exchanged over a mesh connection.
///
/// Setup and liveness frames are top-level maps with a single distinguishing
/// key; everything else travels inside the [`WsAction`] envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Frame {
    Setup(SetupFrame),
    SetupOk(SetupOkFrame),
    SetupError(SetupErrorFrame),
    Ping(PingFrame),
    Pong(PongFrame),
    Envelope(EnvelopeFrame),
}

impl Frame {
    /// The frame name for logging.
    pub fn frame_name(&self) -> &'static str {
        match self {
            Self::Setup(_) => "setup",
            Self::SetupOk(_) => "setup_ok",
            Self::SetupError(_) => "setup_error",
            Self::Ping(_) => "ping",
            Self::Pong(_) => "pong",
            Self::Envelope(_) => "ws_action",
        }
    }
}

/// The first frame on a connection, initiator to accepter.
///
/// `setup` holds a signed claim token carrying the session id, role,
/// namespace, and serializer choice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetupFrame {
    pub setup: String,
}

/// The accepter's reply to a successful setup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetupOkFrame {
    pub auth: String,
    pub server_id: Uuid,
}

impl SetupOkFrame {
    pub fn new(server_id: Uuid) -> Self {
        Self {
            auth: "ok".to_owned(),
            server_id,
        }
    }
}

/// The accepter's reply to a failed setup, sent just before closing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetupErrorFrame {
    pub error: String,
}

/// A keep-alive probe from the connection initiator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingFrame {
    pub ping: String,
}

impl Default for PingFrame {
    fn default() -> Self {
        Self {
            ping: "ping".to_owned(),
        }
    }
}

/// The accepter's reply to a [`PingFrame`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PongFrame {
    pub pong: String,
}

impl Default for PongFrame {
    fn default() -> Self {
        Self {
            pong: "pong".to_owned(),
        }
    }
}

/// The envelope wrapper giving every request or response a correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeFrame {
    pub ws_action: WsAction,
}

/// A correlated request or response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WsAction {
    Request(RequestAction),
    Response(ResponseAction),
}

/// A request riding in the envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestAction {
    pub request_id: RequestId,
    pub request: RequestBody,
    pub response_expected: bool,
}

/// A response riding in the envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseAction {
    pub request_id: RequestId,
    pub response: Value,
}

/// The body of a request.
///
/// When payload encryption is enabled for the session, the payload position
/// holds a signed token whose single claim `data` is the payload map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestBody {
    Sealed(String),
    Payload(Dictionary),
}

/// A decoded request payload.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RequestPayload {
    pub action: String,
    pub args: List,
    pub kwargs: Dictionary,
}

impl RequestPayload {
    /// Creates a payload for the given action.
    pub fn new<S>(action: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            action: action.into(),
            ..Default::default()
        }
    }

    /// Creates a payload with positional and keyword arguments.
    pub fn with_args<S>(action: S, args: List, kwargs: Dictionary) -> Self
    where
        S: Into<String>,
    {
        Self {
            action: action.into(),
            args,
            kwargs,
        }
    }

    /// Encodes the payload as a [`Dictionary`] for the wire.
    pub fn into_dictionary(self) -> Dictionary {
        Dictionary::from_iter([
            ("action".to_owned(), Value::String(self.action)),
            ("args".to_owned(), Value::List(self.args)),
            ("kwargs".to_owned(), Value::Dictionary(self.kwargs)),
        ])
    }

    /// Decodes a payload from a wire [`Dictionary`].
    ///
    /// Fails if the `action` field is missing, which callers should answer
    /// with a malformed-input error body.
    pub fn from_dictionary(mut dictionary: Dictionary) -> Option<Self> {
        let action = match dictionary.remove("action") {
            Some(Value::String(action)) => action,
            _ => return None,
        };
        let args = match dictionary.remove("args") {
            Some(Value::List(args)) => args,
            _ => List::default(),
        };
        let kwargs = match dictionary.remove("kwargs") {
            Some(Value::Dictionary(kwargs)) => kwargs,
            _ => Dictionary::default(),
        };
        Some(Self {
            action,
            args,
            kwargs,
        })
    }
}
