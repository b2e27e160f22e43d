//! Event broker
//!
//! Every node exposes an [`EventBroker`] as a private pseudo-export under
//! [`EVENT_BROKER_CONTRACT`]. Raising an event resolves every
//! [`EventListener`] export of the event contract visible from the node,
//! runs the any-thread listeners on the calling thread, and hands the
//! thread-affine ones to the coordination thread as one deferred job.

use crate::node::Node;
use arbor_core::{
    ArborError, BoxError, ControllerId, CoordinationThread, ExportDefinition, ImportDefinition,
    Result, Scope,
};
use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

/// Contract under which each node exports its broker
pub const EVENT_BROKER_CONTRACT: &str = "arbor.event-broker";

pub(crate) fn broker_definition() -> ExportDefinition {
    ExportDefinition::new(EVENT_BROKER_CONTRACT).with_scope(Scope::Private)
}

/// A raised event as seen by listeners
#[derive(Clone)]
pub struct EventContext {
    contract: String,
    sender: Option<ControllerId>,
    args: Arc<dyn Any + Send + Sync>,
}

impl EventContext {
    /// Create an event
    pub fn new(
        contract: impl Into<String>,
        sender: Option<ControllerId>,
        args: Arc<dyn Any + Send + Sync>,
    ) -> Self {
        Self {
            contract: contract.into(),
            sender,
            args,
        }
    }

    /// Event contract
    pub fn contract(&self) -> &str {
        &self.contract
    }

    /// Raising controller, if any
    pub fn sender(&self) -> Option<ControllerId> {
        self.sender
    }

    /// Event arguments, if they are a `T`
    pub fn args<T: Any>(&self) -> Option<&T> {
        self.args.downcast_ref::<T>()
    }
}

impl fmt::Debug for EventContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventContext")
            .field("contract", &self.contract)
            .field("sender", &self.sender)
            .finish_non_exhaustive()
    }
}

type Handler = dyn Fn(&EventContext) -> std::result::Result<(), BoxError> + Send + Sync;

/// Exported event handler
///
/// Export an `EventListener` under the event's contract; mark the export
/// definition thread-affine to have it run on the coordination thread.
#[derive(Clone)]
pub struct EventListener {
    handler: Arc<Handler>,
}

impl EventListener {
    /// Listener receiving every event of its contract
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&EventContext) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
        }
    }

    /// Listener receiving only events whose arguments are a `T`
    pub fn typed<T, F>(handler: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(Option<ControllerId>, &T) -> std::result::Result<(), BoxError>
            + Send
            + Sync
            + 'static,
    {
        Self::new(move |event: &EventContext| match event.args::<T>() {
            Some(args) => handler(event.sender(), args),
            None => Ok(()),
        })
    }

    /// Run the handler
    pub fn invoke(&self, event: &EventContext) -> std::result::Result<(), BoxError> {
        (self.handler)(event)
    }
}

impl fmt::Debug for EventListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventListener").finish_non_exhaustive()
    }
}

fn deliver(listeners: &[Arc<EventListener>], event: &EventContext) -> Result<()> {
    for listener in listeners {
        listener
            .invoke(event)
            .map_err(|err| ArborError::listener_failed(event.contract(), err))?;
    }
    Ok(())
}

/// Per-node publisher of events
pub struct EventBroker {
    node: Weak<Node>,
    coordination: Arc<dyn CoordinationThread>,
    enforce_affinity: bool,
}

impl EventBroker {
    pub(crate) fn new(
        node: Weak<Node>,
        coordination: Arc<dyn CoordinationThread>,
        enforce_affinity: bool,
    ) -> Self {
        Self {
            node,
            coordination,
            enforce_affinity,
        }
    }

    /// Raise an event to every listener of `contract` visible from the node
    pub fn raise<A: Any + Send + Sync>(
        &self,
        contract: &str,
        sender: Option<ControllerId>,
        args: A,
    ) -> Result<()> {
        self.raise_shared(contract, sender, Arc::new(args))
    }

    /// Raise an event with already shared arguments
    ///
    /// Any-thread listeners run here, in resolution order; the first failure
    /// is returned and stops the remaining any-thread listeners. Thread-affine
    /// listeners run here too when called on the coordination thread, and
    /// otherwise as a single job queued to it, before any-thread delivery
    /// starts, whose failure surfaces there. A synchronous failure never
    /// suppresses affine delivery.
    pub fn raise_shared(
        &self,
        contract: &str,
        sender: Option<ControllerId>,
        args: Arc<dyn Any + Send + Sync>,
    ) -> Result<()> {
        let node = self
            .node
            .upgrade()
            .ok_or_else(|| ArborError::protocol_violation("event broker outlived its node"))?;
        let span = tracing::debug_span!("raise", node = %node.id(), contract);
        let _enter = span.enter();

        let exports = node.query(&ImportDefinition::many(contract))?;
        let mut any_thread = Vec::new();
        let mut affine = Vec::new();
        for export in &exports {
            let Some(listener) = export.downcast::<EventListener>() else {
                tracing::trace!(part = ?export.part(), "skipping non-listener export");
                continue;
            };
            if self.enforce_affinity && export.definition().is_thread_affine() {
                affine.push(listener);
            } else {
                any_thread.push(listener);
            }
        }
        tracing::debug!(
            any_thread = any_thread.len(),
            affine = affine.len(),
            "delivering event"
        );

        let event = EventContext::new(contract, sender, args);
        if affine.is_empty() {
            return deliver(&any_thread, &event);
        }
        if !self.coordination.is_current_thread() {
            let queued = event.clone();
            self.coordination
                .begin_invoke(Box::new(move || deliver(&affine, &queued)))?;
            return deliver(&any_thread, &event);
        }
        let synchronous = deliver(&any_thread, &event);
        let marshaled = deliver(&affine, &event);
        synchronous.and(marshaled)
    }
}

impl fmt::Debug for EventBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBroker")
            .field("enforce_affinity", &self.enforce_affinity)
            .finish_non_exhaustive()
    }
}
