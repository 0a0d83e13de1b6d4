use std::{
    sync::{
        Arc,
        atomic::{
            AtomicBool,
            AtomicU64,
            Ordering,
        },
    },
    time::{
        Duration,
        Instant,
    },
};

use anyhow::{
    Error,
    Result,
};
use futures_util::lock::Mutex;
use log::trace;
use tokio::sync::{
    broadcast,
    mpsc::{
        UnboundedReceiver,
        UnboundedSender,
        unbounded_channel,
    },
    oneshot,
};

use crate::{
    auth::token::seal_payload,
    core::{
        error::SessionError,
        hash::HashMap,
        id::{
            RequestId,
            SessionId,
        },
        roles::PeerRole,
        types::Value,
    },
    cursor::{
        cursor::CursorManager,
        sequence::RemoteSequence,
    },
    message::{
        common::{
            cursor_start_in_body,
            request_frame,
        },
        message::{
            Frame,
            RequestBody,
            RequestPayload,
        },
    },
    serializer::serializer::SerializerType,
};

/// The immutable identity of a session, fixed at setup time.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Session id chosen by the connection initiator.
    pub session_id: SessionId,
    /// The session's role, held for its whole lifetime.
    pub role: PeerRole,
    /// The namespace the session is bound to.
    pub namespace: String,
    /// The serializer negotiated at setup.
    pub serialization: SerializerType,
    /// Whether request payloads are sealed into signed tokens.
    pub encryption: bool,
    /// The shared secret, for payload sealing.
    pub secret: String,
    /// Name of the owning peer, mostly for logging.
    pub name: String,
}

struct SessionState {
    info: SessionInfo,
    outbound_tx: UnboundedSender<Frame>,
    outstanding: Mutex<HashMap<RequestId, oneshot::Sender<Value>>>,
    cursors: CursorManager,
    closed: AtomicBool,
    cancel_tx: broadcast::Sender<()>,
    closed_tx: broadcast::Sender<()>,
    created: Instant,
    last_sent_ms: AtomicU64,
    last_received_ms: AtomicU64,
}

impl SessionState {
    fn now_ms(&self) -> u64 {
        self.created.elapsed().as_millis() as u64
    }
}

/// The result of a call through a session.
pub enum CallOutcome {
    /// A single response value.
    Value(Value),
    /// A lazy sequence of values, pulled from a remote cursor.
    Sequence(RemoteSequence),
}

impl std::fmt::Debug for CallOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Sequence(sequence) => f
                .debug_tuple("Sequence")
                .field(&sequence.request_id())
                .finish(),
        }
    }
}

/// A handle to one side of a live session.
///
/// Cloneable; all clones share the same outbound queue, outstanding-request
/// map, and cursor set. Either side of a connection may issue requests
/// through its handle, which is what lets an accepting node run discovery
/// against a downstream server peer over the same socket.
#[derive(Clone)]
pub struct SessionHandle {
    state: Arc<SessionState>,
}

impl SessionHandle {
    /// Creates a session and the outbound queue its send pump drains.
    pub fn new(info: SessionInfo) -> (Self, UnboundedReceiver<Frame>) {
        let (outbound_tx, outbound_rx) = unbounded_channel();
        let (cancel_tx, _) = broadcast::channel(1);
        let (closed_tx, _) = broadcast::channel(1);
        let handle = Self {
            state: Arc::new(SessionState {
                info,
                outbound_tx,
                outstanding: Mutex::new(HashMap::default()),
                cursors: CursorManager::default(),
                closed: AtomicBool::new(false),
                cancel_tx,
                closed_tx,
                created: Instant::now(),
                last_sent_ms: AtomicU64::new(0),
                last_received_ms: AtomicU64::new(0),
            }),
        };
        (handle, outbound_rx)
    }

    /// The session id, as chosen by the initiator.
    pub fn session_id(&self) -> SessionId {
        self.state.info.session_id
    }

    /// The session's role.
    pub fn role(&self) -> PeerRole {
        self.state.info.role
    }

    /// The namespace the session is bound to.
    pub fn namespace(&self) -> &str {
        &self.state.info.namespace
    }

    /// The session name, for logging.
    pub fn name(&self) -> &str {
        &self.state.info.name
    }

    pub(crate) fn secret(&self) -> &str {
        &self.state.info.secret
    }

    /// The session's cursors.
    pub fn cursors(&self) -> &CursorManager {
        &self.state.cursors
    }

    /// Whether the session has been torn down.
    pub fn closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Receiver channel signaled once teardown finishes.
    pub fn closed_rx(&self) -> broadcast::Receiver<()> {
        self.state.closed_tx.subscribe()
    }

    pub(crate) fn cancel_rx(&self) -> broadcast::Receiver<()> {
        self.state.cancel_tx.subscribe()
    }

    /// Requests teardown of the session's pumps.
    pub fn close(&self) {
        self.state.cancel_tx.send(()).ok();
    }

    /// Enqueues a frame on the send pump.
    pub fn enqueue(&self, frame: Frame) -> Result<()> {
        if self.closed() {
            return Err(SessionError::SessionClosed.into());
        }
        trace!("session {} enqueues {} frame", self.name(), frame.frame_name());
        self.state
            .outbound_tx
            .send(frame)
            .map_err(|_| SessionError::SessionClosed.into())
    }

    /// Encodes a request payload for the wire, sealing it into a signed
    /// token when payload encryption is enabled for the session.
    pub(crate) fn encode_payload(&self, payload: RequestPayload) -> Result<RequestBody> {
        let dictionary = payload.into_dictionary();
        if self.state.info.encryption {
            Ok(RequestBody::Sealed(seal_payload(
                &self.state.info.secret,
                dictionary,
            )?))
        } else {
            Ok(RequestBody::Payload(dictionary))
        }
    }

    /// Parks a one-shot response slot under a request id.
    pub(crate) async fn park(&self, request_id: RequestId) -> Result<oneshot::Receiver<Value>> {
        if self.closed() {
            return Err(SessionError::SessionClosed.into());
        }
        let (tx, rx) = oneshot::channel();
        let mut outstanding = self.state.outstanding.lock().await;
        if outstanding.insert(request_id, tx).is_some() {
            return Err(Error::msg(format!(
                "request {request_id} already has a parked caller"
            )));
        }
        Ok(rx)
    }

    /// Releases a parked slot without delivering to it.
    pub(crate) async fn unpark(&self, request_id: RequestId) {
        self.state.outstanding.lock().await.remove(&request_id);
    }

    /// Delivers a response to its parked caller.
    ///
    /// A response whose slot was already released is silently dropped, which
    /// covers late and duplicate responses.
    pub(crate) async fn deliver(&self, request_id: RequestId, response: Value) {
        match self.state.outstanding.lock().await.remove(&request_id) {
            Some(tx) => {
                tx.send(response).ok();
            }
            None => {
                trace!(
                    "session {} dropped response for request {request_id} with no parked caller",
                    self.name()
                );
            }
        }
    }

    /// Sends a request and waits for its response.
    ///
    /// A response carrying the cursor-start sentinel becomes a lazy
    /// [`RemoteSequence`]; the request id stays reserved for the sequence's
    /// pulls until it terminates.
    pub async fn call(&self, payload: RequestPayload) -> Result<CallOutcome> {
        let request_id = RequestId::generate();
        let body = self.encode_payload(payload)?;
        let rx = self.park(request_id).await?;
        if let Err(err) = self.enqueue(request_frame(request_id, body, true)) {
            self.unpark(request_id).await;
            return Err(err);
        }
        let response = rx.await.map_err(|_| SessionError::SessionClosed)?;
        if cursor_start_in_body(&response).is_some() {
            Ok(CallOutcome::Sequence(RemoteSequence::new(
                self.clone(),
                request_id,
            )))
        } else {
            Ok(CallOutcome::Value(response))
        }
    }

    /// Sends a request without allocating a response slot.
    ///
    /// Used by fire-and-forget callers; returns as soon as the frame is
    /// enqueued.
    pub fn call_no_response(&self, payload: RequestPayload) -> Result<()> {
        let body = self.encode_payload(payload)?;
        self.enqueue(request_frame(RequestId::generate(), body, false))
    }

    pub(crate) fn mark_sent(&self) {
        self.state
            .last_sent_ms
            .store(self.state.now_ms(), Ordering::Relaxed);
    }

    pub(crate) fn mark_received(&self) {
        self.state
            .last_received_ms
            .store(self.state.now_ms(), Ordering::Relaxed);
    }

    pub(crate) fn sent_idle(&self) -> Duration {
        Duration::from_millis(
            self.state
                .now_ms()
                .saturating_sub(self.state.last_sent_ms.load(Ordering::Relaxed)),
        )
    }

    pub(crate) fn received_idle(&self) -> Duration {
        Duration::from_millis(
            self.state
                .now_ms()
                .saturating_sub(self.state.last_received_ms.load(Ordering::Relaxed)),
        )
    }

    /// Tears down session state: wakes every parked caller with a fault and
    /// flushes the session's cursors.
    pub(crate) async fn shut_down(&self) {
        self.state.closed.store(true, Ordering::SeqCst);
        // Dropping the senders wakes the parked callers with an error.
        self.state.outstanding.lock().await.clear();
        self.state.cursors.clear().await;
        self.state.closed_tx.send(()).ok();
    }
}

#[cfg(test)]
mod session_test {
    use crate::{
        core::{
            error::SessionError,
            id::{
                RequestId,
                SessionId,
            },
            roles::PeerRole,
            types::Value,
        },
        message::message::RequestPayload,
        serializer::serializer::SerializerType,
        session::session::{
            SessionHandle,
            SessionInfo,
        },
    };

    fn test_session() -> (SessionHandle, tokio::sync::mpsc::UnboundedReceiver<crate::message::message::Frame>) {
        SessionHandle::new(SessionInfo {
            session_id: SessionId::generate(),
            role: PeerRole::Proxy,
            namespace: "test".to_owned(),
            serialization: SerializerType::Json,
            encryption: false,
            secret: "abcd1234".to_owned(),
            name: "test".to_owned(),
        })
    }

    #[tokio::test]
    async fn delivers_response_to_parked_caller() {
        let (session, _outbound_rx) = test_session();
        let request_id = RequestId::generate();
        let rx = session.park(request_id).await.unwrap();
        session.deliver(request_id, Value::Integer(3)).await;
        assert_eq!(rx.await.unwrap(), Value::Integer(3));
    }

    #[tokio::test]
    async fn late_response_is_dropped() {
        let (session, _outbound_rx) = test_session();
        let request_id = RequestId::generate();
        let rx = session.park(request_id).await.unwrap();
        session.unpark(request_id).await;
        // Should not panic or deliver anywhere.
        session.deliver(request_id, Value::Integer(3)).await;
        assert_matches::assert_matches!(rx.await, Err(_));
    }

    #[tokio::test]
    async fn duplicate_park_is_rejected() {
        let (session, _outbound_rx) = test_session();
        let request_id = RequestId::generate();
        let _rx = session.park(request_id).await.unwrap();
        assert_matches::assert_matches!(session.park(request_id).await, Err(_));
    }

    #[tokio::test]
    async fn teardown_wakes_parked_callers() {
        let (session, _outbound_rx) = test_session();
        let request_id = RequestId::generate();
        let rx = session.park(request_id).await.unwrap();
        session.shut_down().await;
        assert_matches::assert_matches!(rx.await, Err(_));
        assert!(session.closed());
    }

    #[tokio::test]
    async fn call_on_closed_session_fails() {
        let (session, _outbound_rx) = test_session();
        session.shut_down().await;
        assert_matches::assert_matches!(
            session.call(RequestPayload::new("anything")).await,
            Err(err) => {
                assert_matches::assert_matches!(
                    err.downcast_ref::<SessionError>(),
                    Some(SessionError::SessionClosed)
                );
            }
        );
    }

    #[tokio::test]
    async fn call_no_response_enqueues_without_slot() {
        let (session, mut outbound_rx) = test_session();
        session
            .call_no_response(RequestPayload::new("log_message"))
            .unwrap();
        assert_matches::assert_matches!(
            outbound_rx.recv().await,
            Some(crate::message::message::Frame::Envelope(envelope)) => {
                assert_matches::assert_matches!(
                    envelope.ws_action,
                    crate::message::message::WsAction::Request(request) => {
                        assert!(!request.response_expected);
                    }
                );
            }
        );
    }
}
