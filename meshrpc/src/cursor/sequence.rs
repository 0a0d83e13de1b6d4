use anyhow::Result;
use futures_util::StreamExt;

use crate::{
    core::{
        error::{
            CursorError,
            SessionError,
        },
        id::RequestId,
        types::{
            Dictionary,
            Value,
        },
    },
    message::{
        common::request_frame,
        message::{
            CURSOR_END,
            CURSOR_ERROR,
            CURSOR_NEXT,
            RequestPayload,
        },
    },
    registry::procedure::ValueSequence,
    session::session::SessionHandle,
};

/// The consuming side of a remote cursor: a lazy sequence that pulls one
/// item per frame from the server that owns the iterator.
///
/// Each pull reuses the request id that started the cursor, so responses
/// land in the same slot and arrive in the order the server produced them.
/// The id is released once the terminal sentinel is consumed.
pub struct RemoteSequence {
    session: SessionHandle,
    request_id: RequestId,
    done: bool,
}

impl RemoteSequence {
    pub(crate) fn new(session: SessionHandle, request_id: RequestId) -> Self {
        Self {
            session,
            request_id,
            done: false,
        }
    }

    /// The cursor id, equal to the request id of the originating call.
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Pulls the next item, or `None` once the cursor is exhausted.
    pub async fn next(&mut self) -> Result<Option<Value>> {
        if self.done {
            return Ok(None);
        }
        match self.pull().await {
            Ok(item) => {
                if item.is_none() {
                    self.done = true;
                }
                Ok(item)
            }
            Err(err) => {
                self.done = true;
                Err(err)
            }
        }
    }

    async fn pull(&mut self) -> Result<Option<Value>> {
        let payload = RequestPayload::with_args(
            CURSOR_NEXT,
            Vec::default(),
            Dictionary::from_iter([(
                "cursor_id".to_owned(),
                Value::String(self.request_id.to_string()),
            )]),
        );
        let body = self.session.encode_payload(payload)?;
        let rx = self.session.park(self.request_id).await?;
        if let Err(err) = self
            .session
            .enqueue(request_frame(self.request_id, body, true))
        {
            self.session.unpark(self.request_id).await;
            return Err(err);
        }
        let response = rx.await.map_err(|_| SessionError::SessionClosed)?;
        match response {
            Value::String(sentinel) if sentinel == CURSOR_END => Ok(None),
            Value::Dictionary(body) if body.contains_key(CURSOR_ERROR) => {
                let message = body
                    .get(CURSOR_ERROR)
                    .and_then(Value::string)
                    .unwrap_or("unknown cursor error");
                Err(CursorError::Failed(message.to_owned()).into())
            }
            value => Ok(Some(value)),
        }
    }

    /// Wraps the sequence as a stream of values.
    ///
    /// The stream is finished on the terminal sentinel or error.
    pub fn into_stream(self) -> ValueSequence {
        futures_util::stream::unfold(self, move |mut sequence| async {
            match sequence.next().await {
                Ok(Some(value)) => Some((Ok(value), sequence)),
                Ok(None) => None,
                Err(err) => Some((Err(err), sequence)),
            }
        })
        .boxed()
    }
}
