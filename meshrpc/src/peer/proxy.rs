use std::{
    sync::Arc,
    time::Duration,
};

use anyhow::{
    Error,
    Result,
};
use async_trait::async_trait;
use futures_util::lock::Mutex;
use log::{
    error,
    info,
    warn,
};
use tokio::{
    sync::broadcast,
    task::JoinHandle,
};
use uuid::Uuid;

use crate::{
    auth::token::SetupClaims,
    core::{
        error::{
            SessionError,
            TokenError,
            TransportError,
        },
        id::SessionId,
        roles::PeerRole,
        stream::FrameStream,
        types::{
            Dictionary,
            List,
        },
    },
    message::{
        common::error_in_body,
        message::RequestPayload,
    },
    peer::{
        connector::{
            connector::Connector,
            web_socket_connector::WebSocketConnector,
        },
        discovery::{
            FunctionMap,
            filter_for_role,
            refresh,
            spawn_refresh_task,
        },
        remote::{
            ProcedureTarget,
            RemoteProcedure,
        },
    },
    serializer::serializer::SerializerType,
    session::{
        dispatcher::{
            ActionDispatcher,
            NullDispatcher,
        },
        handshake,
        service::SessionService,
        session::{
            CallOutcome,
            SessionHandle,
            SessionInfo,
        },
    },
};

const DEFAULT_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "-", env!("CARGO_PKG_VERSION"));

/// How many times a retryable transport fault is retried before it is
/// surfaced to the caller.
pub const RETRY_LIMIT: u32 = 5;

/// The fixed backoff between retries.
pub const RETRY_BACKOFF: Duration = Duration::from_secs(2);

/// Configuration for a connection to a server node.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Name of the peer, mostly for logging.
    pub name: String,
    /// Host of the server to connect to.
    pub host: String,
    /// Port of the server to connect to.
    pub port: u16,
    /// Websocket route path on the server.
    pub path: String,
    /// Shared secret gating connection setup.
    pub secret: String,
    /// The namespace to mirror.
    pub namespace: String,
    /// Wire format for the session.
    pub serializer: SerializerType,
    /// Whether request payloads are sealed into signed tokens.
    pub encryption: bool,
    /// Whether to connect over TLS.
    pub tls: bool,
    /// Whether to verify the server's TLS certificate.
    pub tls_verify: bool,
    /// Cadence of the periodic catalog refresh.
    pub discovery_interval: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_AGENT.to_owned(),
            host: "127.0.0.1".to_owned(),
            port: 0,
            path: "/".to_owned(),
            secret: String::default(),
            namespace: "DEFAULT".to_owned(),
            serializer: SerializerType::MessagePack,
            encryption: false,
            tls: false,
            tls_verify: true,
            discovery_interval: Duration::from_secs(30),
        }
    }
}

struct ActiveSession {
    handle: SessionHandle,
    #[allow(unused)]
    origin_id: Uuid,
}

/// The reconnecting core of a proxy link: session establishment, the retry
/// policy, and transparent re-establishment after a reset.
///
/// Shared by bare proxies and by a server's upstream link to its parent.
pub(crate) struct ProxyCore {
    config: ProxyConfig,
    session_id: SessionId,
    role: PeerRole,
    dispatcher: Arc<dyn ActionDispatcher>,
    connector: Box<dyn Connector>,
    state: Mutex<Option<ActiveSession>>,
}

impl ProxyCore {
    pub fn new(
        config: ProxyConfig,
        role: PeerRole,
        dispatcher: Arc<dyn ActionDispatcher>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            session_id: SessionId::generate(),
            role,
            dispatcher,
            connector: Box::new(WebSocketConnector::default()),
            state: Mutex::new(None),
        })
    }

    /// The session id this link presents to the server. Stable across
    /// reconnects, so a re-established session replaces the old one.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// The live session, establishing one if needed.
    pub async fn session(&self) -> Result<SessionHandle> {
        let mut state = self.state.lock().await;
        if let Some(active) = state.as_ref() {
            if !active.handle.closed() {
                return Ok(active.handle.clone());
            }
        }
        let (handle, origin_id) = self.establish().await?;
        *state = Some(ActiveSession {
            handle: handle.clone(),
            origin_id,
        });
        Ok(handle)
    }

    async fn establish(&self) -> Result<(SessionHandle, Uuid)> {
        let transport = self.connector.connect(&self.config).await?;
        let stream = FrameStream::new(transport, handshake::handshake_serializer());
        let claims = SetupClaims {
            id: self.session_id,
            role: self.role,
            namespace: self.config.namespace.clone(),
            serialization: self.config.serializer,
        };
        let (stream, origin_id) =
            match handshake::initiate(stream, &claims, &self.config.secret).await {
                Ok(established) => established,
                // A rejected setup is terminal; anything else lost the
                // connection mid-handshake and may be retried.
                Err(err) if err.downcast_ref::<TokenError>().is_some() => return Err(err),
                Err(err) => {
                    return Err(err.context(TransportError::ConnectionReset {
                        host: self.config.host.clone(),
                        port: self.config.port,
                    }));
                }
            };
        let (handle, outbound_rx) = SessionHandle::new(SessionInfo {
            session_id: self.session_id,
            role: self.role,
            namespace: self.config.namespace.clone(),
            serialization: self.config.serializer,
            encryption: self.config.encryption,
            secret: self.config.secret.clone(),
            name: format!(
                "{} -> {}:{}",
                self.config.name, self.config.host, self.config.port
            ),
        });
        SessionService::new(
            handle.clone(),
            stream,
            outbound_rx,
            self.dispatcher.clone(),
            true,
        )
        .start();
        info!(
            "started connection to server {}:{}",
            self.config.host, self.config.port
        );
        Ok((handle, origin_id))
    }

    /// Tears down the current session, if any.
    pub async fn teardown(&self) {
        if let Some(active) = self.state.lock().await.take() {
            active.handle.close();
        }
    }

    async fn call_once(&self, payload: RequestPayload) -> Result<CallOutcome> {
        let session = self.session().await?;
        match session.call(payload).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                if err.downcast_ref::<SessionError>().is_some() {
                    // Lost mid-stream: drop all session state before the
                    // caller retries over a fresh connection.
                    self.teardown().await;
                    Err(err.context(TransportError::ConnectionReset {
                        host: self.config.host.clone(),
                        port: self.config.port,
                    }))
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Forwards a request, retrying retryable transport faults with a fixed
    /// backoff.
    pub async fn call(&self, payload: RequestPayload) -> Result<CallOutcome> {
        let mut retries = 0;
        loop {
            match self.call_once(payload.clone()).await {
                Ok(outcome) => return Ok(outcome),
                Err(err) => {
                    if !TransportError::retryable(&err) {
                        return Err(err);
                    }
                    retries += 1;
                    if retries > RETRY_LIMIT {
                        error!("{err:#}");
                        return Err(err);
                    }
                    warn!(
                        "{err:#}; retrying in {RETRY_BACKOFF:?}, tentative {retries}/{RETRY_LIMIT}"
                    );
                    tokio::time::sleep(RETRY_BACKOFF).await;
                }
            }
        }
    }

    /// Forwards a fire-and-forget request, with the same retry policy for
    /// reaching the server.
    pub async fn call_no_response(&self, payload: RequestPayload) -> Result<()> {
        let session = self.session().await?;
        session.call_no_response(payload)
    }
}

#[async_trait]
impl ProcedureTarget for ProxyCore {
    async fn forward(&self, payload: RequestPayload) -> Result<CallOutcome> {
        self.call(payload).await
    }
}

/// A client mirroring one namespace of a remote server as local callables.
///
/// Connecting performs the setup handshake and an initial catalog fetch;
/// afterwards a periodic refresh keeps the mirror current. Calls
/// transparently re-establish the session after a connection reset.
pub struct Proxy {
    core: Arc<ProxyCore>,
    functions: Arc<FunctionMap>,
    refresh_task: JoinHandle<()>,
    cancel_tx: broadcast::Sender<()>,
}

impl std::fmt::Debug for Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy").finish_non_exhaustive()
    }
}

impl Proxy {
    /// Connects to a server and mirrors the configured namespace.
    pub async fn connect(config: ProxyConfig) -> Result<Self> {
        let namespace = config.namespace.clone();
        let interval = config.discovery_interval;
        let core = ProxyCore::new(config, PeerRole::Proxy, Arc::new(NullDispatcher::default()));
        let functions = Arc::new(FunctionMap::default());
        let filter = filter_for_role(PeerRole::Proxy, core.session_id());

        let target = core.clone() as Arc<dyn ProcedureTarget>;
        if let Err(err) = refresh(&target, &namespace, &filter, functions.as_ref()).await {
            core.teardown().await;
            return Err(err);
        }

        let (cancel_tx, cancel_rx) = broadcast::channel(1);
        let refresh_task = spawn_refresh_task(
            core.config.name.clone(),
            target,
            namespace,
            filter,
            functions.clone(),
            interval,
            None,
            cancel_rx,
        );
        Ok(Self {
            core,
            functions,
            refresh_task,
            cancel_tx,
        })
    }

    /// The session id this proxy presents to the server.
    pub fn session_id(&self) -> SessionId {
        self.core.session_id()
    }

    /// The names of every mirrored procedure.
    pub async fn functions(&self) -> Vec<String> {
        self.functions.names().await
    }

    /// Resolves a mirrored procedure by name.
    pub async fn procedure(&self, name: &str) -> Option<RemoteProcedure> {
        self.functions.get(name).await
    }

    /// Calls a procedure by name.
    ///
    /// A name not yet mirrored is forwarded anyway; the server resolves it
    /// against the session's namespace.
    pub async fn call(&self, name: &str, args: List, kwargs: Dictionary) -> Result<CallOutcome> {
        match self.functions.get(name).await {
            Some(procedure) => procedure.call(args, kwargs).await,
            None => {
                match self
                    .core
                    .call(RequestPayload::with_args(name, args, kwargs))
                    .await?
                {
                    CallOutcome::Value(value) => match error_in_body(&value) {
                        Some(message) => Err(Error::msg(message.to_owned())),
                        None => Ok(CallOutcome::Value(value)),
                    },
                    outcome => Ok(outcome),
                }
            }
        }
    }

    /// Sends a fire-and-forget call: no response slot is allocated, and the
    /// method returns as soon as the frame is enqueued.
    pub async fn call_no_response(
        &self,
        name: &str,
        args: List,
        kwargs: Dictionary,
    ) -> Result<()> {
        self.core
            .call_no_response(RequestPayload::with_args(name, args, kwargs))
            .await
    }

    /// Runs a discovery round immediately, returning how many new
    /// procedures were mirrored.
    pub async fn refresh(&self) -> Result<usize> {
        let target = self.core.clone() as Arc<dyn ProcedureTarget>;
        refresh(
            &target,
            &self.core.config.namespace,
            &filter_for_role(PeerRole::Proxy, self.core.session_id()),
            self.functions.as_ref(),
        )
        .await
    }

    /// Disconnects from the server.
    pub async fn close(&self) {
        self.cancel_tx.send(()).ok();
        self.core.teardown().await;
        self.functions.clear().await;
    }
}

impl Drop for Proxy {
    fn drop(&mut self) {
        self.cancel_tx.send(()).ok();
        self.refresh_task.abort();
    }
}
