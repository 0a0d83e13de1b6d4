use std::sync::Arc;

use anyhow::{
    Error,
    Result,
};
use async_trait::async_trait;

use crate::{
    core::types::{
        Dictionary,
        List,
    },
    message::{
        common::error_in_body,
        message::RequestPayload,
    },
    registry::{
        descriptor::ProcedureDescriptor,
        procedure::{
            Invocation,
            Invoker,
        },
    },
    session::session::{
        CallOutcome,
        SessionHandle,
    },
};

/// Something a mirrored procedure can forward its calls through: a live
/// session directly, or a reconnecting link that re-establishes its session
/// as needed.
#[async_trait]
pub trait ProcedureTarget: Send + Sync {
    /// Forwards an action request and returns the outcome.
    async fn forward(&self, payload: RequestPayload) -> Result<CallOutcome>;
}

#[async_trait]
impl ProcedureTarget for SessionHandle {
    async fn forward(&self, payload: RequestPayload) -> Result<CallOutcome> {
        self.call(payload).await
    }
}

/// A local callable mirroring a procedure owned by a remote node.
///
/// The callable keeps the remote procedure's parameter descriptor for
/// metadata-driven dispatch and exposes a uniform dynamic entry point:
/// positional arguments as a list, keyword arguments as a map. The body
/// packages both into an action request and forwards it through the bound
/// target; a cursor-start response comes back as a lazy sequence.
#[derive(Clone)]
pub struct RemoteProcedure {
    descriptor: ProcedureDescriptor,
    target: Arc<dyn ProcedureTarget>,
}

impl RemoteProcedure {
    /// Binds a descriptor to a call target.
    pub fn new(descriptor: ProcedureDescriptor, target: Arc<dyn ProcedureTarget>) -> Self {
        Self { descriptor, target }
    }

    /// The mirrored procedure's descriptor.
    pub fn descriptor(&self) -> &ProcedureDescriptor {
        &self.descriptor
    }

    /// The mirrored procedure's name.
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Calls the remote procedure.
    ///
    /// An `{"error": ...}` response body, the shape application faults take
    /// on the wire, is surfaced as an error.
    pub async fn call(&self, args: List, kwargs: Dictionary) -> Result<CallOutcome> {
        let payload = RequestPayload::with_args(self.descriptor.name.clone(), args, kwargs);
        match self.target.forward(payload).await? {
            CallOutcome::Value(value) => match error_in_body(&value) {
                Some(message) => Err(Error::msg(message.to_owned())),
                None => Ok(CallOutcome::Value(value)),
            },
            outcome => Ok(outcome),
        }
    }
}

#[async_trait]
impl Invoker for RemoteProcedure {
    async fn invoke(&self, args: List, kwargs: Dictionary) -> Result<Invocation> {
        match self.call(args, kwargs).await? {
            CallOutcome::Value(value) => Ok(Invocation::Value(value)),
            CallOutcome::Sequence(sequence) => Ok(Invocation::Sequence(sequence.into_stream())),
        }
    }
}
