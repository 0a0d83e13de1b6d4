use std::{
    sync::Arc,
    time::Duration,
};

use anyhow::{
    Error,
    Result,
};
use futures_util::{
    SinkExt,
    StreamExt,
    stream::{
        SplitSink,
        SplitStream,
    },
};
use log::{
    error,
    info,
    trace,
    warn,
};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::{
    auth::token::open_payload,
    core::{
        error::RpcError,
        id::RequestId,
        stream::FrameStream,
        types::Value,
    },
    cursor::cursor::Cursor,
    message::{
        common::{
            cursor_start_body,
            error_body,
            ping_frame,
            pong_frame,
            response_frame,
        },
        message::{
            CURSOR_NEXT,
            Frame,
            GET_REGISTERED_FUNCTIONS,
            RequestBody,
            RequestPayload,
            WsAction,
        },
    },
    registry::procedure::Invocation,
    session::{
        dispatcher::{
            ActionDispatcher,
            filter_from_kwargs,
        },
        session::SessionHandle,
    },
};

/// How often the connection initiator probes an idle session.
pub const PING_INTERVAL: Duration = Duration::from_secs(10);

/// How long a session may go without receiving any frame before it is
/// considered dead: three ping intervals.
pub const LIVENESS_TIMEOUT: Duration = Duration::from_secs(30);

/// The long-running tasks servicing one session: a send pump draining the
/// outbound queue into the socket, a receive pump demultiplexing inbound
/// frames, and a keep-alive timer.
///
/// Any task failing (or cancellation through the session handle) drains to
/// full teardown: sibling tasks stop, parked callers wake with a fault, and
/// the session's cursors are flushed.
pub struct SessionService {
    handle: SessionHandle,
    stream: FrameStream,
    outbound_rx: UnboundedReceiver<Frame>,
    dispatcher: Arc<dyn ActionDispatcher>,
    send_pings: bool,
}

impl SessionService {
    /// Creates a service over an established, setup-complete frame stream.
    ///
    /// `send_pings` is set on the connection initiator; the accepter only
    /// answers probes and watches for silence.
    pub fn new(
        handle: SessionHandle,
        stream: FrameStream,
        outbound_rx: UnboundedReceiver<Frame>,
        dispatcher: Arc<dyn ActionDispatcher>,
        send_pings: bool,
    ) -> Self {
        Self {
            handle,
            stream,
            outbound_rx,
            dispatcher,
            send_pings,
        }
    }

    /// Starts the service asynchronously, taking ownership of the session's
    /// I/O. All further interaction goes through the [`SessionHandle`].
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let handle = self.handle;
        let (sink, stream) = self.stream.split();

        let mut send = tokio::spawn(Self::send_pump(sink, self.outbound_rx, handle.clone()));
        let mut receive = tokio::spawn(Self::receive_pump(
            stream,
            handle.clone(),
            self.dispatcher,
        ));
        let mut keep_alive = tokio::spawn(Self::keep_alive(handle.clone(), self.send_pings));

        let (task, result) = tokio::select! {
            result = &mut send => ("send pump", result),
            result = &mut receive => ("receive pump", result),
            result = &mut keep_alive => ("keep-alive", result),
        };
        match result {
            Ok(Ok(())) => info!("session {} {task} finished", handle.name()),
            Ok(Err(err)) => error!("session {} {task} failed: {err:#}", handle.name()),
            Err(err) => error!("session {} {task} panicked: {err}", handle.name()),
        }

        // Stop the sibling pumps, then release every parked caller.
        handle.close();
        send.abort();
        receive.abort();
        keep_alive.abort();
        handle.shut_down().await;
        info!("session {} torn down", handle.name());
    }

    async fn send_pump(
        mut sink: SplitSink<FrameStream, Frame>,
        mut outbound_rx: UnboundedReceiver<Frame>,
        handle: SessionHandle,
    ) -> Result<()> {
        let mut cancel_rx = handle.cancel_rx();
        loop {
            tokio::select! {
                frame = outbound_rx.recv() => {
                    let frame = match frame {
                        Some(frame) => frame,
                        None => return Ok(()),
                    };
                    sink.feed(frame).await?;
                    // Drain whatever is immediately available before
                    // flushing, so bursts go out in one write.
                    while let Ok(frame) = outbound_rx.try_recv() {
                        sink.feed(frame).await?;
                    }
                    sink.flush().await?;
                    handle.mark_sent();
                }
                _ = cancel_rx.recv() => return Ok(()),
            }
        }
    }

    async fn receive_pump(
        mut stream: SplitStream<FrameStream>,
        handle: SessionHandle,
        dispatcher: Arc<dyn ActionDispatcher>,
    ) -> Result<()> {
        let mut cancel_rx = handle.cancel_rx();
        loop {
            tokio::select! {
                frame = stream.next() => {
                    match frame {
                        Some(Ok(frame)) => {
                            handle.mark_received();
                            Self::handle_frame(&handle, &dispatcher, frame).await?;
                        }
                        Some(Err(err)) => return Err(err),
                        None => return Err(Error::msg("connection closed by remote")),
                    }
                }
                _ = cancel_rx.recv() => return Ok(()),
            }
        }
    }

    async fn handle_frame(
        handle: &SessionHandle,
        dispatcher: &Arc<dyn ActionDispatcher>,
        frame: Frame,
    ) -> Result<()> {
        trace!("session {} received {} frame", handle.name(), frame.frame_name());
        match frame {
            Frame::Ping(_) => handle.enqueue(pong_frame()),
            Frame::Pong(_) => Ok(()),
            Frame::Envelope(envelope) => match envelope.ws_action {
                WsAction::Response(response) => {
                    handle.deliver(response.request_id, response.response).await;
                    Ok(())
                }
                WsAction::Request(request) => {
                    Self::handle_request(
                        handle,
                        dispatcher,
                        request.request_id,
                        request.request,
                        request.response_expected,
                    );
                    Ok(())
                }
            },
            frame => {
                warn!(
                    "session {} ignoring unexpected {} frame",
                    handle.name(),
                    frame.frame_name()
                );
                Ok(())
            }
        }
    }

    fn handle_request(
        handle: &SessionHandle,
        dispatcher: &Arc<dyn ActionDispatcher>,
        request_id: RequestId,
        body: RequestBody,
        response_expected: bool,
    ) {
        let handle = handle.clone();
        let dispatcher = dispatcher.clone();
        // Requests are handled off the pump so that a slow invocation, or
        // one that calls back over this same socket, cannot stall inbound
        // responses.
        tokio::spawn(async move {
            let dictionary = match body {
                RequestBody::Payload(dictionary) => dictionary,
                RequestBody::Sealed(token) => {
                    match open_payload(handle.secret(), &token) {
                        Ok(dictionary) => dictionary,
                        Err(err) => {
                            // A payload failing verification is dropped, not
                            // answered; the caller times out instead of
                            // learning anything about the secret.
                            warn!(
                                "session {} dropped request {request_id}: {err:#}",
                                handle.name()
                            );
                            return;
                        }
                    }
                }
            };
            let response = match RequestPayload::from_dictionary(dictionary) {
                Some(payload) => Self::respond(&handle, &dispatcher, request_id, payload).await,
                None => error_body(
                    &RpcError::Malformed {
                        field: "action".to_owned(),
                    }
                    .into(),
                ),
            };
            if response_expected {
                handle.enqueue(response_frame(request_id, response)).ok();
            }
        });
    }

    async fn respond(
        handle: &SessionHandle,
        dispatcher: &Arc<dyn ActionDispatcher>,
        request_id: RequestId,
        payload: RequestPayload,
    ) -> Value {
        match payload.action.as_str() {
            GET_REGISTERED_FUNCTIONS => {
                let namespace = payload
                    .args
                    .first()
                    .and_then(Value::string)
                    .unwrap_or(handle.namespace())
                    .to_owned();
                let filter = filter_from_kwargs(&payload.kwargs);
                match dispatcher.discover(handle, &namespace, filter).await {
                    Ok(response) => response,
                    Err(err) => error_body(&err),
                }
            }
            CURSOR_NEXT => {
                let cursor_id = payload
                    .kwargs
                    .get("cursor_id")
                    .and_then(Value::string)
                    .and_then(|cursor_id| RequestId::try_from(cursor_id).ok());
                match cursor_id {
                    Some(cursor_id) => handle.cursors().advance(cursor_id).await,
                    None => error_body(
                        &RpcError::Malformed {
                            field: "cursor_id".to_owned(),
                        }
                        .into(),
                    ),
                }
            }
            action => {
                match dispatcher
                    .invoke(handle, action, payload.args, payload.kwargs)
                    .await
                {
                    Ok(Invocation::Value(value)) => value,
                    Ok(Invocation::Sequence(sequence)) => {
                        handle
                            .cursors()
                            .insert(request_id, Cursor::new(sequence))
                            .await;
                        cursor_start_body(request_id)
                    }
                    Err(err) => error_body(&err),
                }
            }
        }
    }

    async fn keep_alive(handle: SessionHandle, send_pings: bool) -> Result<()> {
        let mut cancel_rx = handle.cancel_rx();
        let mut interval = tokio::time::interval(PING_INTERVAL / 2);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = cancel_rx.recv() => return Ok(()),
            }
            if handle.received_idle() > LIVENESS_TIMEOUT {
                return Err(Error::msg(format!(
                    "session {} received no frames for {LIVENESS_TIMEOUT:?}",
                    handle.name()
                )));
            }
            if send_pings && handle.sent_idle() >= PING_INTERVAL {
                handle.enqueue(ping_frame())?;
            }
        }
    }
}
