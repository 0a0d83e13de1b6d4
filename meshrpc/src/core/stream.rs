use std::{
    fmt::Debug,
    pin::Pin,
    task,
};

use anyhow::{
    Error,
    Result,
};
use futures_util::{
    Sink,
    SinkExt,
    Stream,
    StreamExt,
};

use crate::{
    message::message::Frame,
    serializer::serializer::{
        Serializer,
        SerializerType,
        new_serializer,
    },
    transport::transport::{
        Transport,
        TransportData,
    },
};

/// A stream of [`Frame`]s over some transport, applying the session's
/// serializer in both directions.
///
/// The serializer can be swapped after the setup exchange, which always
/// travels as JSON text regardless of the negotiated format.
#[derive(Debug)]
pub struct FrameStream {
    transport: Box<dyn Transport>,
    serializer: Box<dyn Serializer>,
    serializer_type: SerializerType,
}

impl FrameStream {
    /// Creates a frame stream with the given transport and serialization.
    pub fn new(transport: Box<dyn Transport>, serializer_type: SerializerType) -> Self {
        Self {
            transport,
            serializer: new_serializer(serializer_type),
            serializer_type,
        }
    }

    /// Rewraps the underlying transport with a different serializer.
    pub fn with_serializer(self, serializer_type: SerializerType) -> Self {
        Self::new(self.transport, serializer_type)
    }

    /// The serializer type in effect.
    pub fn serializer_type(&self) -> SerializerType {
        self.serializer_type
    }

    /// Closes the underlying transport.
    pub async fn close(&mut self) -> Result<()> {
        self.transport.close().await
    }
}

impl Stream for FrameStream {
    type Item = Result<Frame>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<Option<Self::Item>> {
        match futures_util::ready!(self.transport.poll_next_unpin(cx)) {
            Some(Ok(data)) => {
                let frame = self.serializer.deserialize(&data.into_bytes())?;
                task::Poll::Ready(Some(Ok(frame)))
            }
            Some(Err(err)) => task::Poll::Ready(Some(Err(err.into()))),
            None => task::Poll::Ready(None),
        }
    }
}

impl Sink<Frame> for FrameStream {
    type Error = Error;

    fn poll_ready(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<std::result::Result<(), Self::Error>> {
        self.transport.poll_ready_unpin(cx)
    }

    fn start_send(
        mut self: Pin<&mut Self>,
        frame: Frame,
    ) -> std::result::Result<(), Self::Error> {
        let bytes = self.serializer.serialize(&frame)?;
        let data = if self.serializer_type.binary() {
            TransportData::Binary(bytes)
        } else {
            TransportData::Text(bytes)
        };
        self.transport.start_send_unpin(data)
    }

    fn poll_flush(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<std::result::Result<(), Self::Error>> {
        self.transport.poll_flush_unpin(cx)
    }

    fn poll_close(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<std::result::Result<(), Self::Error>> {
        self.transport.poll_close_unpin(cx)
    }
}
