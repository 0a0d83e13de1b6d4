use anyhow::{
    Error,
    Result,
};
use async_trait::async_trait;

use crate::{
    core::{
        id::SessionId,
        types::{
            Dictionary,
            List,
            Value,
        },
    },
    registry::{
        procedure::Invocation,
        registry::ListFilter,
    },
    session::session::SessionHandle,
};

/// The seam between a session's receive pump and the node hosting it.
///
/// A server node answers discovery from its registry and resolves actions in
/// the session's bound namespace; a bare proxy has nothing to serve.
#[async_trait]
pub trait ActionDispatcher: Send + Sync {
    /// Answers a discovery query.
    async fn discover(
        &self,
        session: &SessionHandle,
        namespace: &str,
        filter: ListFilter,
    ) -> Result<Value>;

    /// Resolves an action in the session's bound namespace and invokes it.
    async fn invoke(
        &self,
        session: &SessionHandle,
        action: &str,
        args: List,
        kwargs: Dictionary,
    ) -> Result<Invocation>;
}

/// Dispatcher for a peer with no local procedures to serve.
#[derive(Debug, Default)]
pub struct NullDispatcher {}

#[async_trait]
impl ActionDispatcher for NullDispatcher {
    async fn discover(&self, _: &SessionHandle, _: &str, _: ListFilter) -> Result<Value> {
        Err(Error::msg("proxy has no associated server"))
    }

    async fn invoke(
        &self,
        _: &SessionHandle,
        _: &str,
        _: List,
        _: Dictionary,
    ) -> Result<Invocation> {
        Err(Error::msg("proxy has no associated server"))
    }
}

/// Decodes a discovery filter from the keyword arguments of a
/// `get_registered_functions` request.
pub fn filter_from_kwargs(kwargs: &Dictionary) -> ListFilter {
    let defaults = ListFilter::default();
    ListFilter {
        upstream: kwargs
            .get("upstream")
            .and_then(Value::bool)
            .unwrap_or(defaults.upstream),
        all_functions: kwargs
            .get("all_functions")
            .and_then(Value::bool)
            .unwrap_or(defaults.all_functions),
        trigger: kwargs
            .get("trigger")
            .and_then(Value::string)
            .and_then(|trigger| SessionId::try_from(trigger).ok()),
    }
}

/// Encodes a discovery filter as keyword arguments.
pub fn filter_to_kwargs(filter: &ListFilter) -> Dictionary {
    let mut kwargs = Dictionary::from_iter([
        ("upstream".to_owned(), Value::Bool(filter.upstream)),
        (
            "all_functions".to_owned(),
            Value::Bool(filter.all_functions),
        ),
    ]);
    if let Some(trigger) = filter.trigger {
        kwargs.insert("trigger".to_owned(), Value::String(trigger.to_string()));
    }
    kwargs
}
