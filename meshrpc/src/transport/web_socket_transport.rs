use core::str;
use std::{
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
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream,
    WebSocketStream,
    tungstenite::Message,
};

use crate::transport::transport::{
    Transport,
    TransportData,
};

/// A transport implemented for a TCP stream using the WebSocket protocol.
///
/// WebSocket-level ping/pong frames are left to the protocol implementation;
/// mesh liveness uses its own top-level frames.
#[derive(Debug)]
pub struct WebSocketTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WebSocketTransport {
    /// Creates a transport over an established websocket stream.
    pub fn new(stream: WebSocketStream<MaybeTlsStream<TcpStream>>) -> Self {
        Self { stream }
    }
}

impl Transport for WebSocketTransport {}

impl Stream for WebSocketTransport {
    type Item = Result<TransportData>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<Option<Self::Item>> {
        loop {
            match futures_util::ready!(self.stream.poll_next_unpin(cx)) {
                Some(Ok(message)) => {
                    if message.is_text() {
                        return task::Poll::Ready(Some(Ok(TransportData::Text(
                            message.into_data().to_vec(),
                        ))));
                    } else if message.is_binary() {
                        return task::Poll::Ready(Some(Ok(TransportData::Binary(
                            message.into_data().to_vec(),
                        ))));
                    } else if message.is_close() {
                        return task::Poll::Ready(None);
                    }
                    // Protocol-level ping/pong frames carry no mesh payload.
                    continue;
                }
                Some(Err(err)) => return task::Poll::Ready(Some(Err(err.into()))),
                None => return task::Poll::Ready(None),
            }
        }
    }
}

impl Sink<TransportData> for WebSocketTransport {
    type Error = Error;

    fn poll_ready(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<std::result::Result<(), Self::Error>> {
        self.stream.poll_ready_unpin(cx).map_err(Error::new)
    }

    fn start_send(
        mut self: Pin<&mut Self>,
        item: TransportData,
    ) -> std::result::Result<(), Self::Error> {
        let message = match item {
            TransportData::Text(data) => Message::Text(str::from_utf8(&data)?.to_owned().into()),
            TransportData::Binary(data) => Message::Binary(data.into()),
        };
        self.stream.start_send_unpin(message).map_err(Error::new)
    }

    fn poll_flush(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<std::result::Result<(), Self::Error>> {
        self.stream.poll_flush_unpin(cx).map_err(Error::new)
    }

    fn poll_close(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<std::result::Result<(), Self::Error>> {
        self.stream.poll_close_unpin(cx).map_err(Error::new)
    }
}
