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
use indexmap::IndexMap;
use log::{
    debug,
    trace,
};
use tokio::{
    sync::broadcast,
    task::JoinHandle,
};

use crate::{
    core::{
        id::SessionId,
        roles::PeerRole,
        types::{
            List,
            Value,
        },
    },
    message::{
        common::error_in_body,
        message::{
            GET_REGISTERED_FUNCTIONS,
            RequestPayload,
        },
    },
    peer::remote::{
        ProcedureTarget,
        RemoteProcedure,
    },
    registry::{
        descriptor::ProcedureDescriptor,
        procedure::{
            ProcedureSource,
            RegisteredProcedure,
        },
        registry::{
            ListFilter,
            Registry,
        },
    },
    session::{
        dispatcher::filter_to_kwargs,
        session::CallOutcome,
    },
};

/// The discovery filter a session issues periodically, per its role.
///
/// An upstream link always passes its own session id as the trigger, so the
/// parent suppresses procedures it learned from this very session; without
/// that filter a cycle of peers re-advertises forever.
pub fn filter_for_role(role: PeerRole, session_id: SessionId) -> ListFilter {
    match role {
        PeerRole::Proxy => ListFilter {
            upstream: true,
            all_functions: true,
            trigger: None,
        },
        PeerRole::Server => ListFilter {
            upstream: true,
            all_functions: false,
            trigger: Some(session_id),
        },
        PeerRole::ServerProxy => ListFilter {
            upstream: false,
            all_functions: false,
            trigger: None,
        },
    }
}

/// Builds the `get_registered_functions` request for a discovery round.
pub fn discovery_payload(namespace: &str, filter: &ListFilter) -> RequestPayload {
    RequestPayload::with_args(
        GET_REGISTERED_FUNCTIONS,
        List::from_iter([Value::String(namespace.to_owned())]),
        filter_to_kwargs(filter),
    )
}

/// Where learned procedures are stored.
#[async_trait]
pub trait CatalogSink: Send + Sync {
    /// Stores a mirrored procedure unless its name is already known; returns
    /// whether a new entry was created. Existing entries are never replaced.
    async fn absorb(&self, procedure: RemoteProcedure) -> bool;
}

/// A sink that registers learned procedures into a node's registry, tagged
/// with the session they were learned from.
pub struct RegistrySink {
    pub registry: Arc<Registry>,
    pub namespace: String,
    pub source: ProcedureSource,
}

#[async_trait]
impl CatalogSink for RegistrySink {
    async fn absorb(&self, procedure: RemoteProcedure) -> bool {
        let descriptor = procedure.descriptor().clone();
        self.registry
            .register(
                &self.namespace,
                RegisteredProcedure::learned(descriptor, Arc::new(procedure), self.source),
            )
            .await
    }
}

/// The catalog of a bare proxy: mirrored procedures by name, in the order
/// they were learned.
#[derive(Default)]
pub struct FunctionMap {
    functions: Mutex<IndexMap<String, RemoteProcedure>>,
}

impl FunctionMap {
    /// Resolves a mirrored procedure by name.
    pub async fn get(&self, name: &str) -> Option<RemoteProcedure> {
        self.functions.lock().await.get(name).cloned()
    }

    /// The known procedure names.
    pub async fn names(&self) -> Vec<String> {
        self.functions.lock().await.keys().cloned().collect()
    }

    /// Forgets everything, for a session teardown.
    pub async fn clear(&self) {
        self.functions.lock().await.clear();
    }
}

#[async_trait]
impl CatalogSink for FunctionMap {
    async fn absorb(&self, procedure: RemoteProcedure) -> bool {
        let mut functions = self.functions.lock().await;
        if functions.contains_key(procedure.name()) {
            return false;
        }
        functions.insert(procedure.name().to_owned(), procedure);
        true
    }
}

/// Runs one discovery round: queries the target for the namespace's
/// procedures and absorbs every descriptor not already known.
///
/// Returns the number of newly-mirrored procedures.
pub async fn refresh(
    target: &Arc<dyn ProcedureTarget>,
    namespace: &str,
    filter: &ListFilter,
    sink: &dyn CatalogSink,
) -> Result<usize> {
    let outcome = target
        .forward(discovery_payload(namespace, filter))
        .await?;
    let response = match outcome {
        CallOutcome::Value(response) => response,
        CallOutcome::Sequence(_) => {
            return Err(Error::msg("discovery response cannot be a cursor"));
        }
    };
    if let Some(message) = error_in_body(&response) {
        return Err(Error::msg(message.to_owned()));
    }
    let funcs = response
        .dictionary()
        .and_then(|body| body.get("funcs"))
        .and_then(Value::list)
        .ok_or_else(|| Error::msg("malformed discovery response"))?;
    let mut absorbed = 0;
    for func in funcs {
        let entry = match func.dictionary() {
            Some(entry) => entry,
            None => continue,
        };
        for config in entry.values() {
            let descriptor = ProcedureDescriptor::from_value(config)?;
            trace!("discovered function {}", descriptor.name);
            if sink
                .absorb(RemoteProcedure::new(descriptor, target.clone()))
                .await
            {
                absorbed += 1;
            }
        }
    }
    Ok(absorbed)
}

async fn changed_signal(changed_rx: &mut Option<broadcast::Receiver<()>>) {
    loop {
        match changed_rx {
            Some(rx) => match rx.recv().await {
                Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => return,
                Err(broadcast::error::RecvError::Closed) => {
                    *changed_rx = None;
                }
            },
            None => futures_util::future::pending::<()>().await,
        }
    }
}

/// Spawns the periodic catalog refresh for one session.
///
/// Runs a round immediately, then again every `interval` and whenever the
/// optional change channel fires (a local registration event). The task ends
/// on the cancel channel.
pub fn spawn_refresh_task(
    name: String,
    target: Arc<dyn ProcedureTarget>,
    namespace: String,
    filter: ListFilter,
    sink: Arc<dyn CatalogSink>,
    interval: Duration,
    mut changed_rx: Option<broadcast::Receiver<()>>,
    mut cancel_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!("starting catalog refresh for {name}, interval {interval:?}");
        loop {
            match refresh(&target, &namespace, &filter, sink.as_ref()).await {
                Ok(0) => {}
                Ok(absorbed) => debug!("{name} mirrored {absorbed} new functions"),
                Err(err) => debug!("catalog refresh for {name} failed: {err:#}"),
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = changed_signal(&mut changed_rx) => {}
                _ = cancel_rx.recv() => {
                    debug!("catalog refresh for {name} exiting");
                    return;
                }
            }
        }
    })
}
