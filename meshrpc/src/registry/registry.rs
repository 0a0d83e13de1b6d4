use anyhow::Result;
use futures_util::lock::Mutex;
use indexmap::IndexMap;
use log::{
    debug,
    info,
};
use tokio::sync::broadcast;

use crate::{
    core::{
        error::RegistryError,
        hash::HashSet,
        id::SessionId,
    },
    registry::{
        descriptor::ProcedureDescriptor,
        procedure::{
            ProcedureSource,
            RegisteredProcedure,
        },
    },
};

/// The filter applied to a discovery query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListFilter {
    /// Include procedures learned from the node above.
    pub upstream: bool,
    /// Include both the upstream and downstream sides.
    pub all_functions: bool,
    /// Session to suppress, so a peer never re-learns its own procedures.
    pub trigger: Option<SessionId>,
}

impl Default for ListFilter {
    fn default() -> Self {
        Self {
            upstream: true,
            all_functions: false,
            trigger: None,
        }
    }
}

#[derive(Default)]
struct NamespaceEntry {
    procedures: IndexMap<String, RegisteredProcedure>,
}

impl NamespaceEntry {
    /// Descriptors matching the filter, in deterministic order: locals in
    /// insertion order, then the upstream set, then downstream sets in
    /// session-insertion order.
    fn list(&self, filter: &ListFilter) -> Vec<ProcedureDescriptor> {
        let mut descriptors = Vec::new();
        let mut seen = HashSet::default();
        let mut push = |procedure: &RegisteredProcedure| {
            if seen.insert(procedure.name().to_owned()) {
                descriptors.push(procedure.descriptor.clone());
            }
        };

        for procedure in self.procedures.values() {
            if procedure.source == ProcedureSource::Local {
                push(procedure);
            }
        }
        if filter.upstream {
            for procedure in self.procedures.values() {
                match procedure.source {
                    ProcedureSource::Upstream { .. } => push(procedure),
                    ProcedureSource::Downstream { session }
                        if filter.trigger != Some(session) =>
                    {
                        push(procedure)
                    }
                    _ => (),
                }
            }
        }
        if filter.all_functions || !filter.upstream {
            for procedure in self.procedures.values() {
                if matches!(procedure.source, ProcedureSource::Downstream { .. }) {
                    push(procedure);
                }
            }
        }
        descriptors
    }
}

/// The store of procedures a node can resolve, by namespace.
///
/// Namespaces are created lazily on first registration. A namespace group
/// treats several namespaces as one logical namespace: registration fans out
/// to every member, and lookup returns the first hit by member order.
pub struct Registry {
    namespaces: Mutex<IndexMap<String, NamespaceEntry>>,
    groups: Mutex<IndexMap<String, Vec<String>>>,
    changed_tx: broadcast::Sender<()>,
}

impl Default for Registry {
    fn default() -> Self {
        let (changed_tx, _) = broadcast::channel(16);
        Self {
            namespaces: Mutex::new(IndexMap::default()),
            groups: Mutex::new(IndexMap::default()),
            changed_tx,
        }
    }
}

impl Registry {
    /// Receiver channel notified whenever the set of registered procedures
    /// grows or shrinks, so discovery can refresh ahead of its cadence.
    pub fn changed_rx(&self) -> broadcast::Receiver<()> {
        self.changed_tx.subscribe()
    }

    /// Expands a namespace or group name to concrete member namespaces.
    async fn expand(&self, namespace: &str) -> Vec<String> {
        match self.groups.lock().await.get(namespace) {
            Some(members) => members.clone(),
            None => Vec::from_iter([namespace.to_owned()]),
        }
    }

    /// Registers a procedure under a namespace or group.
    ///
    /// Registration is idempotent on (namespace, name): a name already
    /// present is silently left untouched, first writer wins. When
    /// `namespace` names a group, the registration fans out to every member.
    ///
    /// Returns whether any new entry was created.
    pub async fn register(&self, namespace: &str, procedure: RegisteredProcedure) -> bool {
        let members = self.expand(namespace).await;
        let mut namespaces = self.namespaces.lock().await;
        let mut registered = false;
        for member in members {
            let entry = namespaces.entry(member.clone()).or_default();
            if !entry.procedures.contains_key(procedure.name()) {
                info!(
                    "registered function {} in {member} namespace",
                    procedure.name()
                );
                entry
                    .procedures
                    .insert(procedure.name().to_owned(), procedure.clone());
                registered = true;
            }
        }
        drop(namespaces);
        if registered {
            self.changed_tx.send(()).ok();
        }
        registered
    }

    /// Resolves a procedure by namespace (or group) and name.
    ///
    /// For a group, returns the first hit by member iteration order, which
    /// enables failover between equivalent members.
    pub async fn lookup(&self, namespace: &str, name: &str) -> Option<RegisteredProcedure> {
        let members = self.expand(namespace).await;
        let namespaces = self.namespaces.lock().await;
        for member in members {
            if let Some(procedure) = namespaces
                .get(&member)
                .and_then(|entry| entry.procedures.get(name))
            {
                return Some(procedure.clone());
            }
        }
        None
    }

    /// Whether a procedure is already known under a namespace or group.
    pub async fn contains(&self, namespace: &str, name: &str) -> bool {
        self.lookup(namespace, name).await.is_some()
    }

    /// Creates a namespace group over the given members.
    ///
    /// Member namespaces that do not exist yet are created. Fails if the
    /// name is already taken by a group or namespace.
    pub async fn create_group<I, S>(&self, group: &str, members: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut groups = self.groups.lock().await;
        let mut namespaces = self.namespaces.lock().await;
        if groups.contains_key(group) || namespaces.contains_key(group) {
            return Err(RegistryError::GroupExists(group.to_owned()).into());
        }
        let members = Vec::from_iter(members.into_iter().map(Into::into));
        for member in &members {
            namespaces.entry(member.clone()).or_default();
        }
        groups.insert(group.to_owned(), members);
        Ok(())
    }

    /// Enumerates descriptors for a discovery query.
    pub async fn list(&self, namespace: &str, filter: &ListFilter) -> Vec<ProcedureDescriptor> {
        let members = self.expand(namespace).await;
        let namespaces = self.namespaces.lock().await;
        let mut descriptors = Vec::new();
        for member in members {
            if let Some(entry) = namespaces.get(&member) {
                descriptors.extend(entry.list(filter));
            }
        }
        descriptors
    }

    /// Forgets every procedure learned from the given session.
    ///
    /// Called on session teardown, so that a dead peer's procedures stop
    /// resolving and rebuild on reconnect.
    pub async fn drop_session(&self, session: SessionId) {
        let mut namespaces = self.namespaces.lock().await;
        let mut removed = false;
        for (name, entry) in namespaces.iter_mut() {
            let before = entry.procedures.len();
            entry
                .procedures
                .retain(|_, procedure| procedure.source.session() != Some(session));
            if entry.procedures.len() != before {
                debug!(
                    "dropped {} learned functions from namespace {name} for session {session}",
                    before - entry.procedures.len()
                );
                removed = true;
            }
        }
        drop(namespaces);
        if removed {
            self.changed_tx.send(()).ok();
        }
    }
}
