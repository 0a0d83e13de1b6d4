use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
};

use anyhow::Result;
use async_trait::async_trait;
use futures_util::{
    FutureExt,
    Stream,
    future::BoxFuture,
};

use crate::{
    core::{
        id::SessionId,
        types::{
            Dictionary,
            List,
            Value,
        },
    },
    registry::descriptor::ProcedureDescriptor,
};

/// A lazy sequence of values, as produced by a sequence-kind procedure.
pub type ValueSequence = Pin<Box<dyn Stream<Item = Result<Value>> + Send>>;

/// The result of invoking a procedure.
pub enum Invocation {
    /// A single value.
    Value(Value),
    /// A lazy sequence, transported to remote callers as a cursor.
    Sequence(ValueSequence),
}

/// The executable half of a registered procedure.
///
/// An invoker is either a local callable, owned by the origin node, or a
/// remote stub that forwards arguments through a session.
#[async_trait]
pub trait Invoker: Send + Sync {
    async fn invoke(&self, args: List, kwargs: Dictionary) -> Result<Invocation>;
}

/// Where the registry learned a procedure.
///
/// Drives discovery filtering: a node never advertises back to a peer the
/// procedures it learned from that same peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcedureSource {
    /// Defined on this node.
    Local,
    /// Learned from the parent this node attached to.
    Upstream { session: SessionId },
    /// Learned from a downstream peer that connected to this node.
    Downstream { session: SessionId },
}

impl ProcedureSource {
    /// The session the procedure was learned from, if any.
    pub fn session(&self) -> Option<SessionId> {
        match self {
            Self::Local => None,
            Self::Upstream { session } => Some(*session),
            Self::Downstream { session } => Some(*session),
        }
    }
}

/// A procedure held by the registry: a descriptor paired with its invoker.
///
/// Identity is (namespace, name); names are unique within a namespace.
#[derive(Clone)]
pub struct RegisteredProcedure {
    pub descriptor: ProcedureDescriptor,
    pub invoker: Arc<dyn Invoker>,
    pub source: ProcedureSource,
}

impl RegisteredProcedure {
    /// Creates a locally-defined procedure.
    pub fn local(descriptor: ProcedureDescriptor, invoker: Arc<dyn Invoker>) -> Self {
        Self {
            descriptor,
            invoker,
            source: ProcedureSource::Local,
        }
    }

    /// Creates a procedure learned from a peer.
    pub fn learned(
        descriptor: ProcedureDescriptor,
        invoker: Arc<dyn Invoker>,
        source: ProcedureSource,
    ) -> Self {
        Self {
            descriptor,
            invoker,
            source,
        }
    }

    /// The procedure name.
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }
}

struct SyncInvoker<F> {
    f: F,
}

#[async_trait]
impl<F> Invoker for SyncInvoker<F>
where
    F: Fn(List, Dictionary) -> Result<Value> + Send + Sync,
{
    async fn invoke(&self, args: List, kwargs: Dictionary) -> Result<Invocation> {
        Ok(Invocation::Value((self.f)(args, kwargs)?))
    }
}

struct AsyncInvoker {
    f: Box<dyn Fn(List, Dictionary) -> BoxFuture<'static, Result<Value>> + Send + Sync>,
}

#[async_trait]
impl Invoker for AsyncInvoker {
    async fn invoke(&self, args: List, kwargs: Dictionary) -> Result<Invocation> {
        Ok(Invocation::Value((self.f)(args, kwargs).await?))
    }
}

struct SequenceInvoker<F> {
    f: F,
}

#[async_trait]
impl<F> Invoker for SequenceInvoker<F>
where
    F: Fn(List, Dictionary) -> Result<ValueSequence> + Send + Sync,
{
    async fn invoke(&self, args: List, kwargs: Dictionary) -> Result<Invocation> {
        Ok(Invocation::Sequence((self.f)(args, kwargs)?))
    }
}

/// Wraps a synchronous callable as a locally-registered procedure.
pub fn sync_procedure<F>(descriptor: ProcedureDescriptor, f: F) -> RegisteredProcedure
where
    F: Fn(List, Dictionary) -> Result<Value> + Send + Sync + 'static,
{
    RegisteredProcedure::local(descriptor, Arc::new(SyncInvoker { f }))
}

/// Wraps an asynchronous callable as a locally-registered procedure.
pub fn async_procedure<F, Fut>(descriptor: ProcedureDescriptor, f: F) -> RegisteredProcedure
where
    F: Fn(List, Dictionary) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    RegisteredProcedure::local(
        descriptor,
        Arc::new(AsyncInvoker {
            f: Box::new(move |args, kwargs| f(args, kwargs).boxed()),
        }),
    )
}

/// Wraps a callable producing a lazy sequence as a locally-registered
/// procedure.
pub fn sequence_procedure<F>(descriptor: ProcedureDescriptor, f: F) -> RegisteredProcedure
where
    F: Fn(List, Dictionary) -> Result<ValueSequence> + Send + Sync + 'static,
{
    RegisteredProcedure::local(descriptor, Arc::new(SequenceInvoker { f }))
}
