use std::{
    net::{
        IpAddr,
        Ipv4Addr,
        SocketAddr,
    },
    sync::{
        Arc,
        OnceLock,
    },
    time::Duration,
};

use anyhow::{
    Error,
    Result,
};
use async_trait::async_trait;
use futures_util::lock::Mutex;
use log::{
    debug,
    error,
    info,
    warn,
};
use tokio::{
    net::{
        TcpListener,
        TcpStream,
    },
    sync::broadcast,
    task::JoinHandle,
};
use tokio_tungstenite::{
    MaybeTlsStream,
    tungstenite::{
        handshake::server::{
            ErrorResponse,
            Request,
            Response,
        },
        http::StatusCode,
    },
};
use uuid::Uuid;

use crate::{
    core::{
        error::RpcError,
        hash::HashMap,
        roles::PeerRole,
        stream::FrameStream,
        types::{
            Dictionary,
            List,
            Value,
        },
    },
    peer::{
        discovery::{
            RegistrySink,
            filter_for_role,
            refresh,
            spawn_refresh_task,
        },
        proxy::{
            ProxyConfig,
            ProxyCore,
        },
        remote::ProcedureTarget,
    },
    registry::{
        procedure::{
            Invocation,
            ProcedureSource,
            RegisteredProcedure,
        },
        registry::{
            ListFilter,
            Registry,
        },
    },
    server::connection::ConnectionManager,
    session::{
        dispatcher::ActionDispatcher,
        handshake,
        service::SessionService,
        session::{
            SessionHandle,
            SessionInfo,
        },
    },
    transport::web_socket_transport::WebSocketTransport,
};

const DEFAULT_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "-", env!("CARGO_PKG_VERSION"));

/// Configuration for an [`RpcServer`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Name of the server, mostly for logging.
    pub name: String,
    /// IP address the server starts on.
    pub address: IpAddr,
    /// Network port the server starts on; 0 picks an ephemeral port.
    pub port: u16,
    /// Websocket route path accepted for incoming connections.
    pub path: String,
    /// Shared secret gating connection setup.
    pub secret: String,
    /// Whether request payloads are sealed into signed tokens.
    pub encryption: bool,
    /// Cadence of the periodic catalog refresh toward peers.
    pub discovery_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_AGENT.to_owned(),
            address: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            port: 0,
            path: "/".to_owned(),
            secret: String::default(),
            encryption: false,
            discovery_interval: Duration::from_secs(30),
        }
    }
}

struct UpstreamLink {
    core: Arc<ProxyCore>,
    refresh_task: JoinHandle<()>,
}

struct ServerInner {
    config: ServerConfig,
    node_id: Uuid,
    registry: Arc<Registry>,
    connections: ConnectionManager,
    upstreams: Mutex<HashMap<String, UpstreamLink>>,
    local_addr: OnceLock<SocketAddr>,
    cancel_tx: broadcast::Sender<()>,
}

struct ServerDispatcher {
    inner: Arc<ServerInner>,
}

#[async_trait]
impl ActionDispatcher for ServerDispatcher {
    async fn discover(
        &self,
        _: &SessionHandle,
        namespace: &str,
        filter: ListFilter,
    ) -> Result<Value> {
        let descriptors = self.inner.registry.list(namespace, &filter).await;
        let funcs = List::from_iter(descriptors.into_iter().map(|descriptor| {
            Value::Dictionary(Dictionary::from_iter([(
                descriptor.name.clone(),
                descriptor.to_value(),
            )]))
        }));
        Ok(Value::Dictionary(Dictionary::from_iter([(
            "funcs".to_owned(),
            Value::List(funcs),
        )])))
    }

    async fn invoke(
        &self,
        session: &SessionHandle,
        action: &str,
        args: List,
        kwargs: Dictionary,
    ) -> Result<Invocation> {
        match self.inner.registry.lookup(session.namespace(), action).await {
            Some(procedure) => procedure.invoker.invoke(args, kwargs).await,
            None => Err(RpcError::NoAction {
                action: action.to_owned(),
                namespace: session.namespace().to_owned(),
            }
            .into()),
        }
    }
}

/// A server node of the mesh: it owns a registry of procedures, accepts
/// websocket connections at a fixed route, and can itself attach upstream to
/// a parent server, republishing what it learns in both directions.
#[derive(Clone)]
pub struct RpcServer {
    inner: Arc<ServerInner>,
}

impl RpcServer {
    /// Creates a new server node. [`Self::start`] makes it reachable.
    pub fn new(config: ServerConfig) -> Self {
        let (cancel_tx, _) = broadcast::channel(1);
        Self {
            inner: Arc::new(ServerInner {
                config,
                node_id: Uuid::new_v4(),
                registry: Arc::new(Registry::default()),
                connections: ConnectionManager::default(),
                upstreams: Mutex::new(HashMap::default()),
                local_addr: OnceLock::new(),
                cancel_tx,
            }),
        }
    }

    /// The node's unique id, returned to initiators in the setup response.
    pub fn node_id(&self) -> Uuid {
        self.inner.node_id
    }

    /// The node's registry.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.inner.registry
    }

    /// The address the server is listening on, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr.get().copied()
    }

    /// The number of live inbound sessions.
    pub async fn connection_count(&self) -> usize {
        self.inner.connections.len().await
    }

    /// Registers a procedure under a namespace or group.
    pub async fn register(&self, namespace: &str, procedure: RegisteredProcedure) -> bool {
        self.inner.registry.register(namespace, procedure).await
    }

    /// Creates a namespace group over the given members.
    pub async fn create_group<I, S>(&self, group: &str, members: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner.registry.create_group(group, members).await
    }

    /// Starts accepting connections; returns the bound address.
    pub async fn start(&self) -> Result<SocketAddr> {
        let addr = format!("{}:{}", self.inner.config.address, self.inner.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;
        self.inner.local_addr.set(local_addr).ok();
        info!(
            "starting server {} at {local_addr}{}",
            self.inner.config.name, self.inner.config.path
        );
        tokio::spawn(Self::handle_connections(self.inner.clone(), listener));
        Ok(local_addr)
    }

    /// Attaches this node to a parent server for the configured namespace.
    ///
    /// The session takes the upstream-peer role: this node learns the
    /// parent's procedures (minus anything the parent learned from this very
    /// session), while the parent runs its own discovery back over the same
    /// socket to learn this node's. Only one parent is allowed per
    /// namespace.
    pub async fn attach_upstream(&self, config: ProxyConfig) -> Result<()> {
        let namespace = config.namespace.clone();
        let mut upstreams = self.inner.upstreams.lock().await;
        if upstreams.contains_key(&namespace) {
            return Err(Error::msg(format!(
                "only one parent connection is allowed per namespace, and {namespace} already has one"
            )));
        }
        let interval = config.discovery_interval;
        let dispatcher = Arc::new(ServerDispatcher {
            inner: self.inner.clone(),
        });
        let core = ProxyCore::new(config, PeerRole::Server, dispatcher);
        let filter = filter_for_role(PeerRole::Server, core.session_id());
        let sink = Arc::new(RegistrySink {
            registry: self.inner.registry.clone(),
            namespace: namespace.clone(),
            source: ProcedureSource::Upstream {
                session: core.session_id(),
            },
        });
        let target = core.clone() as Arc<dyn ProcedureTarget>;
        if let Err(err) = refresh(&target, &namespace, &filter, sink.as_ref()).await {
            core.teardown().await;
            return Err(err);
        }

        let refresh_task = spawn_refresh_task(
            format!("{} upstream {namespace}", self.inner.config.name),
            target,
            namespace.clone(),
            filter,
            sink,
            interval,
            Some(self.inner.registry.changed_rx()),
            self.inner.cancel_tx.subscribe(),
        );
        upstreams.insert(namespace, UpstreamLink { core, refresh_task });
        Ok(())
    }

    /// Shuts the server down: stops accepting, closes every inbound session,
    /// and detaches from upstream parents.
    pub async fn shut_down(&self) {
        self.inner.cancel_tx.send(()).ok();
        for handle in self.inner.connections.all().await {
            handle.close();
        }
        let mut upstreams = self.inner.upstreams.lock().await;
        for (namespace, link) in upstreams.drain() {
            debug!("detaching upstream link for namespace {namespace}");
            link.refresh_task.abort();
            link.core.teardown().await;
        }
    }

    async fn handle_connections(inner: Arc<ServerInner>, listener: TcpListener) {
        let mut cancel_rx = inner.cancel_tx.subscribe();
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            debug!("accepted TCP connection from {addr}");
                            tokio::spawn(Self::handle_connection(inner.clone(), stream, addr));
                        }
                        Err(err) => {
                            error!("failed to accept connection: {err}");
                        }
                    }
                }
                _ = cancel_rx.recv() => break,
            }
        }
        info!("server {} stopped accepting connections", inner.config.name);
    }

    async fn handle_connection(inner: Arc<ServerInner>, stream: TcpStream, addr: SocketAddr) {
        if let Err(err) = Self::run_connection(inner, stream).await {
            warn!("connection from {addr} ended with error: {err:#}");
        }
    }

    fn path_callback(
        expected: String,
    ) -> impl FnOnce(&Request, Response) -> Result<Response, ErrorResponse> {
        move |request: &Request, response: Response| {
            if request.uri().path() == expected {
                Ok(response)
            } else {
                let mut response =
                    ErrorResponse::new(Some("no websocket route at this path".to_owned()));
                *response.status_mut() = StatusCode::NOT_FOUND;
                Err(response)
            }
        }
    }

    async fn run_connection(inner: Arc<ServerInner>, stream: TcpStream) -> Result<()> {
        let ws = tokio_tungstenite::accept_hdr_async(
            MaybeTlsStream::Plain(stream),
            Self::path_callback(inner.config.path.clone()),
        )
        .await?;
        let stream = FrameStream::new(
            Box::new(WebSocketTransport::new(ws)),
            handshake::handshake_serializer(),
        );
        let (stream, claims) =
            handshake::accept(stream, &inner.config.secret, inner.node_id).await?;
        info!("created websocket connection with endpoint {}", claims.id);

        let (handle, outbound_rx) = SessionHandle::new(SessionInfo {
            session_id: claims.id,
            role: claims.role,
            namespace: claims.namespace.clone(),
            serialization: claims.serialization,
            encryption: inner.config.encryption,
            secret: inner.config.secret.clone(),
            name: format!("{} <- {}", inner.config.name, claims.id),
        });
        inner.connections.insert(claims.id, handle.clone()).await;

        // Subscribe before the pumps start so a teardown can never be missed.
        let mut closed_rx = handle.closed_rx();
        let dispatcher = Arc::new(ServerDispatcher {
            inner: inner.clone(),
        });
        SessionService::new(handle.clone(), stream, outbound_rx, dispatcher, false).start();

        // A downstream server peer publishes its own procedures; learn them
        // over this same socket so they can be republished upward.
        let refresh_task = match claims.role {
            PeerRole::Server => Some(spawn_refresh_task(
                format!("{} downstream {}", inner.config.name, claims.id),
                Arc::new(handle.clone()) as Arc<dyn ProcedureTarget>,
                claims.namespace.clone(),
                filter_for_role(PeerRole::ServerProxy, claims.id),
                Arc::new(RegistrySink {
                    registry: inner.registry.clone(),
                    namespace: claims.namespace.clone(),
                    source: ProcedureSource::Downstream { session: claims.id },
                }),
                inner.config.discovery_interval,
                Some(inner.registry.changed_rx()),
                handle.cancel_rx(),
            )),
            _ => None,
        };

        closed_rx.recv().await.ok();

        if let Some(refresh_task) = refresh_task {
            refresh_task.abort();
        }
        inner.connections.remove(claims.id).await;
        inner.registry.drop_session(claims.id).await;
        info!("deleted websocket connection with endpoint {}", claims.id);
        Ok(())
    }
}
