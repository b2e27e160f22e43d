//! Controller and module contracts
//!
//! A controller is the user-extensible owner of exactly one [`Node`]. It
//! embeds a [`ControllerContext`] holding its identity and, while activated,
//! its node; everything a controller does against the hierarchy goes through
//! that context.

use crate::node::Node;
use crate::part_factory::Exportable;
use arbor_core::{
    ArborError, BoxError, CompositionBatch, ControllerId, Export, ExportsChange, ImportDefinition,
    PartRef, Result,
};
use parking_lot::RwLock;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// User-extensible owner of a node
pub trait Controller: Send + Sync + 'static {
    /// Context embedded in this controller
    fn context(&self) -> &ControllerContext;

    /// Called after the node is attached
    ///
    /// Runs outside the hierarchy lock for child controllers. For a module it
    /// runs under the activating thread's write lock, just before
    /// [`Module::initialize`].
    fn on_activated(&self) -> std::result::Result<(), BoxError> {
        Ok(())
    }

    /// Called after the node is detached and disposed, outside the hierarchy lock
    fn on_deactivated(&self) -> std::result::Result<(), BoxError> {
        Ok(())
    }

    /// Exports visible to this controller changed
    ///
    /// Receives the unfiltered change for the controller's own batches and a
    /// scope-filtered change for batches composed on nodes it can see.
    fn on_exports_changed(&self, _change: &ExportsChange) {}
}

/// A controller attached directly under the hierarchy root
pub trait Module: Controller {
    /// Called once after activation, before any other thread can attach a
    /// controller beneath this module
    ///
    /// The calling thread holds the hierarchy write lock, so activating
    /// children from here is allowed. Waiting on another thread that
    /// touches the same hierarchy deadlocks.
    fn initialize(&self) -> std::result::Result<(), BoxError> {
        Ok(())
    }
}

/// Identity and node slot of a controller
pub struct ControllerContext {
    id: ControllerId,
    name: Option<String>,
    node: RwLock<Option<Arc<Node>>>,
}

impl ControllerContext {
    /// Create a context with a fresh identity
    pub fn new() -> Self {
        Self {
            id: ControllerId::new(),
            name: None,
            node: RwLock::new(None),
        }
    }

    /// Create a context with a display name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::new()
        }
    }

    /// Controller identity
    pub fn id(&self) -> ControllerId {
        self.id
    }

    /// Display name, if any
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The controller's node while activated
    pub fn node(&self) -> Option<Arc<Node>> {
        self.node.read().clone()
    }

    /// Whether the controller currently has a node
    pub fn is_activated(&self) -> bool {
        self.node.read().is_some()
    }

    /// The controller's node, or `NotActivated`
    pub fn require_node(&self) -> Result<Arc<Node>> {
        self.node().ok_or_else(|| ArborError::not_activated(self))
    }

    pub(crate) fn install(&self, node: Arc<Node>) {
        *self.node.write() = Some(node);
    }

    /// Clear the slot if it still holds `node`
    pub(crate) fn release(&self, node: &Node) -> bool {
        let mut slot = self.node.write();
        match slot.as_deref() {
            Some(current) if std::ptr::eq(current, node) => {
                *slot = None;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn is_current(&self, node: &Node) -> bool {
        self.node
            .read()
            .as_deref()
            .is_some_and(|current| std::ptr::eq(current, node))
    }

    /// Exports visible from this controller's position
    pub fn query(&self, import: &ImportDefinition) -> Result<Vec<Export>> {
        self.require_node()?.query(import)
    }

    /// The single export of a contract, downcast to `T`
    pub fn get_exported_value<T: Any + Send + Sync>(&self, contract: &str) -> Result<Arc<T>> {
        self.require_node()?.get_exported_value(contract)
    }

    /// Every export of a contract that downcasts to `T`
    pub fn get_exported_values<T: Any + Send + Sync>(
        &self,
        contract: &str,
    ) -> Result<Vec<Arc<T>>> {
        self.require_node()?.get_exported_values(contract)
    }

    /// Activate `child` beneath this controller
    pub fn activate(&self, child: Arc<dyn Controller>) -> Result<Arc<Node>> {
        let parent = self.node().ok_or_else(|| {
            ArborError::invalid_activation("parent", format!("{self} is not activated"))
        })?;
        parent.shared()?.activate_under(child, parent)
    }

    /// Detach and dispose this controller's node and its subtree
    pub fn deactivate(&self) -> Result<()> {
        self.require_node()?.dispose()
    }

    /// Apply a composition batch to this controller's node
    pub fn compose(&self, batch: CompositionBatch) -> Result<ExportsChange> {
        self.require_node()?.compose(batch)
    }

    /// Compose a single part
    pub fn add_part(&self, part: PartRef) -> Result<ExportsChange> {
        self.compose(CompositionBatch::new().add_part(part))
    }

    /// Turn an object into a part and compose it
    pub fn add_exportable<T: Exportable>(&self, object: T) -> Result<PartRef> {
        let node = self.require_node()?;
        let part = node.shared()?.part_factory().create_part(Arc::new(object));
        node.compose(CompositionBatch::new().add_part(Arc::clone(&part)))?;
        Ok(part)
    }

    /// Register a catalog part built on first matching query
    pub fn register_lazy<T, F>(&self, constructor: F) -> Result<()>
    where
        T: Exportable,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let node = self.require_node()?;
        let shared = node.shared()?;
        node.catalog()
            .register_exportable(shared.part_factory(), constructor);
        Ok(())
    }

    /// Publish an event to every listener of `contract` visible from here
    pub fn raise_event<A: Any + Send + Sync>(&self, contract: &str, args: A) -> Result<()> {
        self.require_node()?
            .event_broker()
            .raise(contract, Some(self.id), args)
    }
}

impl Default for ControllerContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ControllerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name} ({})", self.id),
            None => write!(f, "{}", self.id),
        }
    }
}

impl fmt::Debug for ControllerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerContext")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("activated", &self.is_activated())
            .finish()
    }
}
