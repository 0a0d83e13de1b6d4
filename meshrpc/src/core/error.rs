use thiserror::Error;

use crate::core::id::RequestId;

/// An error verifying or decoding a signed claim token.
#[derive(Debug, Error)]
pub enum TokenError {
    /// The token's MAC does not match the shared secret.
    ///
    /// During setup this rejects the connection; on an encrypted payload
    /// frame it drops the frame.
    #[error("bad signature")]
    BadSignature,
    /// The token could not be decoded at all.
    #[error("malformed token: {0}")]
    Malformed(String),
}

/// A transport-level fault.
///
/// Transport faults are the only retryable errors: a caller that hits one may
/// tear down its session and try again with a fresh connection.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The remote endpoint could not be reached at all.
    #[error("server unreachable: {host}:{port}")]
    Unreachable { host: String, port: u16 },
    /// The connection was lost mid-stream.
    #[error("connection reset: {host}:{port}")]
    ConnectionReset { host: String, port: u16 },
}

impl TransportError {
    /// Whether the error wraps a retryable transport fault.
    pub fn retryable(error: &anyhow::Error) -> bool {
        error.downcast_ref::<TransportError>().is_some()
    }
}

/// An application-level fault while handling a request.
///
/// These are returned to the caller as `{"error": ...}` response bodies; the
/// transport itself stays healthy.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The requested action is not registered in the session's namespace.
    #[error("no action {action} registered in namespace {namespace}")]
    NoAction { action: String, namespace: String },
    /// The request payload is missing a required field.
    #[error("missing expected input: '{field}'")]
    Malformed { field: String },
}

/// An error from the registration API.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A namespace group with the same name already exists.
    #[error("a namespace group named {0} already exists")]
    GroupExists(String),
}

/// An error surfaced to a parked caller.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The session died while the caller was waiting on a response.
    #[error("session closed")]
    SessionClosed,
}

/// An error in the cursor protocol.
#[derive(Debug, Error)]
pub enum CursorError {
    /// A `CURSOR_NEXT` referenced a cursor this session does not hold.
    #[error("no cursor with id {0}")]
    CursorGone(RequestId),
    /// The server-side source of the cursor failed mid-stream.
    #[error("{0}")]
    Failed(String),
}
