use anyhow::Result;
use futures_util::{
    StreamExt,
    lock::Mutex,
};
use log::{
    debug,
    error,
};

use crate::{
    core::{
        error::CursorError,
        hash::HashMap,
        id::RequestId,
        types::{
            Dictionary,
            Value,
        },
    },
    message::message::{
        CURSOR_END,
        CURSOR_ERROR,
    },
    registry::procedure::ValueSequence,
};

/// A server-side iterator driven by client pulls.
///
/// A cursor's identity is the request id of the call that started it; the
/// consuming side reuses that id for every `CURSOR_NEXT` pull, which
/// serializes the cursor's advances.
pub struct Cursor {
    sequence: ValueSequence,
}

impl Cursor {
    /// Wraps a lazy sequence as a cursor.
    pub fn new(sequence: ValueSequence) -> Self {
        Self { sequence }
    }

    async fn next(&mut self) -> Result<Option<Value>> {
        self.sequence.next().await.transpose()
    }
}

/// The set of live cursors owned by one session.
///
/// Deleted wholesale when the session ends.
#[derive(Default)]
pub struct CursorManager {
    cursors: Mutex<HashMap<RequestId, Cursor>>,
}

impl CursorManager {
    /// Stores a cursor under the request id that started it.
    pub async fn insert(&self, request_id: RequestId, cursor: Cursor) {
        self.cursors.lock().await.insert(request_id, cursor);
    }

    /// Advances the named cursor and encodes the outcome as a response body.
    ///
    /// Exhaustion reports the `CURSOR_END` sentinel and forgets the cursor.
    /// A source error reports the `cursor_error` sentinel instead, so the
    /// consumer learns the cause rather than a silent end. An unknown cursor
    /// id is logged and answered with `CURSOR_END`.
    pub async fn advance(&self, request_id: RequestId) -> Value {
        let mut cursors = self.cursors.lock().await;
        let cursor = match cursors.get_mut(&request_id) {
            Some(cursor) => cursor,
            None => {
                debug!("{}", CursorError::CursorGone(request_id));
                return Value::String(CURSOR_END.to_owned());
            }
        };
        match cursor.next().await {
            Ok(Some(value)) => value,
            Ok(None) => {
                cursors.remove(&request_id);
                Value::String(CURSOR_END.to_owned())
            }
            Err(err) => {
                cursors.remove(&request_id);
                error!("cursor {request_id} failed mid-stream: {err:#}");
                Value::Dictionary(Dictionary::from_iter([(
                    CURSOR_ERROR.to_owned(),
                    Value::String(err.to_string()),
                )]))
            }
        }
    }

    /// Drops every live cursor.
    pub async fn clear(&self) {
        self.cursors.lock().await.clear();
    }

    /// The number of live cursors.
    pub async fn len(&self) -> usize {
        self.cursors.lock().await.len()
    }
}
