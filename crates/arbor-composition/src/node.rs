//! Composition nodes
//!
//! One node per activated controller. A node owns a part engine, a catalog,
//! the local provider over both, and three scope filters that attach
//! propagation fills with other nodes' local providers. Queries resolve in a
//! fixed priority order: composed parts, catalog parts, the protected,
//! internal and public filters, then the node's event broker.

use crate::catalog::PartCatalog;
use crate::controller::Controller;
use crate::event_broker::{broker_definition, EventBroker};
use crate::hierarchy::HierarchyShared;
use crate::propagation;
use crate::provider::{ExportProvider, LocalExportProvider};
use crate::scope_filter::ScopeFilter;
use arbor_core::{
    AggregateError, ArborError, Cardinality, CompositionBatch, CompositionObserver, ControllerId,
    Export, ExportValue, ExportsChange, ExportsChangeEvent, ImportDefinition, NodeId, PartEngine,
    PartId, PartRef, Result, ScopeRadius,
};
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Weak};
use uuid::Uuid;

/// Where a node hangs in the tree
#[derive(Clone)]
pub(crate) enum ParentLink {
    /// Module attached under the synthetic root
    Root,
    /// Ordinary controller attached under another node
    Node(Weak<Node>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    Active,
    Detaching,
    Disposed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExportSource {
    Parts,
    Catalog,
    Protected,
    Internal,
    Public,
    Broker,
}

const RESOLUTION_ORDER: [ExportSource; 6] = [
    ExportSource::Parts,
    ExportSource::Catalog,
    ExportSource::Protected,
    ExportSource::Internal,
    ExportSource::Public,
    ExportSource::Broker,
];

/// Part set of a batch whose transaction has not committed yet
struct PendingBatch {
    transaction: Uuid,
    parts: Vec<PartRef>,
}

/// Per-controller composition container
pub struct Node {
    id: NodeId,
    controller: Arc<dyn Controller>,
    parent: ParentLink,
    depth: usize,
    pub(crate) children: RwLock<Vec<Arc<Node>>>,
    engine: Arc<dyn PartEngine>,
    catalog: Arc<PartCatalog>,
    local: Arc<LocalExportProvider>,
    protected: Arc<ScopeFilter>,
    internal: Arc<ScopeFilter>,
    public: Arc<ScopeFilter>,
    broker: Arc<EventBroker>,
    composed: Mutex<Option<Vec<PartRef>>>,
    pending: Mutex<Option<PendingBatch>>,
    state: Mutex<NodeState>,
    hierarchy: Weak<HierarchyShared>,
}

impl Node {
    pub(crate) fn new(
        shared: &Arc<HierarchyShared>,
        controller: Arc<dyn Controller>,
        parent: ParentLink,
        depth: usize,
    ) -> Arc<Self> {
        let id = NodeId::new();
        let engine = shared.create_engine();
        let catalog = Arc::new(PartCatalog::new());
        let local = Arc::new(LocalExportProvider::new(
            id,
            Arc::clone(&engine),
            Arc::clone(&catalog),
        ));
        Arc::new_cyclic(|weak| Self {
            id,
            controller,
            parent,
            depth,
            children: RwLock::new(Vec::new()),
            engine,
            catalog,
            local,
            protected: Arc::new(ScopeFilter::new(ScopeRadius::Protected)),
            internal: Arc::new(ScopeFilter::new(ScopeRadius::Internal)),
            public: Arc::new(ScopeFilter::new(ScopeRadius::Public)),
            broker: Arc::new(EventBroker::new(
                weak.clone(),
                shared.dispatcher(),
                shared.config().enforce_listener_affinity,
            )),
            composed: Mutex::new(None),
            pending: Mutex::new(None),
            state: Mutex::new(NodeState::Active),
            hierarchy: Arc::downgrade(shared),
        })
    }

    /// Node identity
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Identity of the owning controller
    pub fn controller_id(&self) -> ControllerId {
        self.controller.context().id()
    }

    /// Owning controller
    pub fn controller(&self) -> &Arc<dyn Controller> {
        &self.controller
    }

    /// Parent node; `None` for modules
    pub fn parent(&self) -> Option<Arc<Node>> {
        match &self.parent {
            ParentLink::Root => None,
            ParentLink::Node(parent) => parent.upgrade(),
        }
    }

    /// Whether this node hangs directly under the hierarchy root
    pub fn is_module(&self) -> bool {
        matches!(self.parent, ParentLink::Root)
    }

    /// Distance from the hierarchy root; modules are at depth 1
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Direct children in attach order
    pub fn children(&self) -> Vec<Arc<Node>> {
        self.children.read().clone()
    }

    /// Every strict descendant, parents before children
    pub fn descendants(&self) -> Vec<Arc<Node>> {
        let mut found = Vec::new();
        for child in self.children.read().iter() {
            found.push(Arc::clone(child));
            found.extend(child.descendants());
        }
        found
    }

    /// Whether `other` is a strict ancestor of this node
    pub fn is_descendant_of(&self, other: &Node) -> bool {
        let mut current = self.parent();
        while let Some(node) = current {
            if std::ptr::eq(node.as_ref(), other) {
                return true;
            }
            current = node.parent();
        }
        false
    }

    /// Whether the node is attached and not being torn down
    pub fn is_active(&self) -> bool {
        *self.state.lock() == NodeState::Active
    }

    /// Filter at the given radius
    pub fn filter(&self, radius: ScopeRadius) -> &Arc<ScopeFilter> {
        match radius {
            ScopeRadius::Public => &self.public,
            ScopeRadius::Internal => &self.internal,
            ScopeRadius::Protected => &self.protected,
        }
    }

    /// Filter over ancestors
    pub fn protected_filter(&self) -> &Arc<ScopeFilter> {
        &self.protected
    }

    /// Filter over children of this node and of its ancestors
    pub fn internal_filter(&self) -> &Arc<ScopeFilter> {
        &self.internal
    }

    /// Filter over every other node
    pub fn public_filter(&self) -> &Arc<ScopeFilter> {
        &self.public
    }

    /// Provider over this node's own parts and catalog
    pub fn local_provider(&self) -> &Arc<LocalExportProvider> {
        &self.local
    }

    /// Lazily instantiated parts
    pub fn catalog(&self) -> &Arc<PartCatalog> {
        &self.catalog
    }

    /// Event broker pseudo-export
    pub fn event_broker(&self) -> &Arc<EventBroker> {
        &self.broker
    }

    /// Part set of the last committed batch
    pub fn composed_parts(&self) -> Vec<PartRef> {
        self.composed.lock().clone().unwrap_or_default()
    }

    pub(crate) fn shared(&self) -> Result<Arc<HierarchyShared>> {
        self.hierarchy
            .upgrade()
            .ok_or_else(|| ArborError::not_activated(self.controller.context()))
    }

    pub(crate) fn belongs_to(&self, shared: &Arc<HierarchyShared>) -> bool {
        std::ptr::eq(self.hierarchy.as_ptr(), Arc::as_ptr(shared))
    }

    pub(crate) fn local_as_provider(&self) -> Arc<dyn ExportProvider> {
        Arc::clone(&self.local) as Arc<dyn ExportProvider>
    }

    fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(ArborError::not_activated(self.controller.context()))
        }
    }

    /// Exports visible from this node
    ///
    /// Takes the hierarchy read lock for the duration of the resolution.
    pub fn query(&self, import: &ImportDefinition) -> Result<Vec<Export>> {
        let shared = self.shared()?;
        let _guard = shared.lock.read();
        self.ensure_active()?;
        self.resolve(import, shared.config().strict_cardinality)
    }

    /// The single export of a contract, downcast to `T`
    pub fn get_exported_value<T: Any + Send + Sync>(&self, contract: &str) -> Result<Arc<T>> {
        let exports = self.query(&ImportDefinition::single(contract))?;
        exports
            .first()
            .and_then(Export::downcast::<T>)
            .ok_or_else(|| {
                ArborError::composition(format!(
                    "export '{contract}' is not a {}",
                    std::any::type_name::<T>()
                ))
            })
    }

    /// Every export of a contract that downcasts to `T`
    pub fn get_exported_values<T: Any + Send + Sync>(
        &self,
        contract: &str,
    ) -> Result<Vec<Arc<T>>> {
        Ok(self
            .query(&ImportDefinition::many(contract))?
            .iter()
            .filter_map(Export::downcast::<T>)
            .collect())
    }

    fn source_exports(
        &self,
        source: ExportSource,
        import: &ImportDefinition,
    ) -> Result<Vec<Export>> {
        match source {
            ExportSource::Parts => self.local.part_exports(import),
            ExportSource::Catalog => self.local.catalog_exports(import),
            ExportSource::Protected => self.protected.get_exports(import),
            ExportSource::Internal => self.internal.get_exports(import),
            ExportSource::Public => self.public.get_exports(import),
            ExportSource::Broker => {
                let definition = broker_definition();
                if import.is_satisfied_by(&definition) {
                    let value = Arc::clone(&self.broker) as ExportValue;
                    Ok(vec![Export::new(definition, value).with_origin(self.id)])
                } else {
                    Ok(Vec::new())
                }
            }
        }
    }

    fn resolve(&self, import: &ImportDefinition, strict: bool) -> Result<Vec<Export>> {
        if import.cardinality() == Cardinality::ZeroOrMore {
            let mut exports = Vec::new();
            for source in RESOLUTION_ORDER {
                exports.extend(self.source_exports(source, import)?);
            }
            return Ok(exports);
        }

        for source in RESOLUTION_ORDER {
            let mut found = self.source_exports(source, import)?;
            if found.is_empty() {
                continue;
            }
            if found.len() > 1 && strict {
                return Err(ArborError::CardinalityMismatch {
                    contract: import.contract().to_string(),
                    expected: import.cardinality(),
                    found: found.len(),
                });
            }
            found.truncate(1);
            return Ok(found);
        }

        match import.cardinality() {
            Cardinality::ExactlyOne => Err(ArborError::ExportNotFound {
                contract: import.contract().to_string(),
            }),
            _ => Ok(Vec::new()),
        }
    }

    /// Apply a composition batch to this node's engine
    ///
    /// Runs under the exclusive hierarchy lock. The owning controller receives
    /// the change as-is; every node holding this node's provider receives it
    /// filtered through the holding filter, after the lock is released.
    pub fn compose(self: &Arc<Self>, batch: CompositionBatch) -> Result<ExportsChange> {
        let shared = self.shared()?;
        let span = tracing::debug_span!("compose", node = %self.id);
        let _enter = span.enter();

        let (change, notifications) = {
            let _guard = shared.lock.write()?;
            self.ensure_active()?;
            let observer = NodeCompositionObserver { node: self };
            let change = self.engine.compose(batch, &observer)?;
            let notifications = if change.is_empty() {
                Vec::new()
            } else {
                shared.change_notifications(self, &change)
            };
            (change, notifications)
        };

        tracing::debug!(
            added = change.added.len(),
            removed = change.removed.len(),
            recipients = notifications.len(),
            "batch composed"
        );
        for (controller, filtered) in notifications {
            controller.on_exports_changed(&filtered);
        }
        Ok(change)
    }

    fn commit_pending(&self, transaction: Uuid) {
        let mut pending = self.pending.lock();
        if pending.as_ref().is_some_and(|p| p.transaction == transaction) {
            if let Some(batch) = pending.take() {
                *self.composed.lock() = Some(batch.parts);
            }
        }
    }

    fn discard_pending(&self, transaction: Uuid) {
        let mut pending = self.pending.lock();
        if pending.as_ref().is_some_and(|p| p.transaction == transaction) {
            *pending = None;
        }
    }

    pub(crate) fn mark_detaching(&self) {
        *self.state.lock() = NodeState::Detaching;
    }

    /// Release local resources, collecting every failure
    pub(crate) fn release(&self) -> AggregateError {
        let mut failures = AggregateError::new();
        self.local.dispose();
        failures.extend(self.catalog.dispose());
        failures.collect(self.engine.dispose());

        let mut seen: HashSet<PartId> = HashSet::new();
        let pending = self.pending.lock().take().map(|p| p.parts);
        let composed = self.composed.lock().take();
        for part in pending.into_iter().chain(composed).flatten() {
            if seen.insert(part.id()) {
                failures.collect(part.dispose());
            }
        }

        *self.state.lock() = NodeState::Disposed;
        failures
    }

    /// Detach and dispose this node and its whole subtree
    ///
    /// A no-op unless the owning controller still refers to this node, so a
    /// second call does nothing. Resource failures from every node in the
    /// subtree and every `on_deactivated` failure are reported together once
    /// all cleanup has run.
    pub fn dispose(self: &Arc<Self>) -> Result<()> {
        if !self.controller.context().is_current(self) {
            return Ok(());
        }
        let Some(shared) = self.hierarchy.upgrade() else {
            self.controller.context().release(self);
            return Ok(());
        };
        let span = tracing::debug_span!(
            "deactivate",
            node = %self.id,
            controller = %self.controller_id()
        );
        let _enter = span.enter();

        let mut failures = AggregateError::new();
        let detached = {
            let _guard = shared.lock.write()?;
            if !self.controller.context().is_current(self) {
                return Ok(());
            }
            let detached = propagation::detach(&shared, self, &mut failures);
            tracing::debug!(nodes = detached.len(), "subtree detached");
            detached
        };

        for node in &detached {
            if let Err(err) = node.controller.on_deactivated() {
                failures.push(ArborError::lifecycle("on_deactivated", err));
            }
        }

        if !failures.is_empty() {
            tracing::warn!(failures = failures.len(), "disposal completed with failures");
        }
        failures.into_result()
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("controller", &self.controller_id())
            .field("depth", &self.depth)
            .field("state", &*self.state.lock())
            .field("children", &self.children.read().len())
            .finish_non_exhaustive()
    }
}

/// Tracks a node's pending batch across the engine's transaction
pub(crate) struct NodeCompositionObserver<'a> {
    node: &'a Arc<Node>,
}

impl CompositionObserver for NodeCompositionObserver<'_> {
    fn exports_changing(&self, event: &ExportsChangeEvent<'_>) -> Result<()> {
        let transaction = event.transaction.ok_or_else(|| {
            ArborError::protocol_violation("exports changing outside an atomic composition")
        })?;
        let parts = self.node.engine.staged_parts(transaction).ok_or_else(|| {
            ArborError::protocol_violation(format!(
                "engine has no staged parts for transaction {}",
                transaction.id()
            ))
        })?;

        let id = transaction.id();
        *self.node.pending.lock() = Some(PendingBatch {
            transaction: id,
            parts,
        });

        let committed = Arc::downgrade(self.node);
        transaction.add_complete_action(move || {
            if let Some(node) = committed.upgrade() {
                node.commit_pending(id);
            }
        });
        let reverted = Arc::downgrade(self.node);
        transaction.add_revert_action(move || {
            if let Some(node) = reverted.upgrade() {
                node.discard_pending(id);
            }
        });
        Ok(())
    }

    fn exports_changed(&self, event: &ExportsChangeEvent<'_>) -> Result<()> {
        tracing::trace!(
            node = %self.node.id,
            added = event.change.added.len(),
            removed = event.change.removed.len(),
            "exports changed"
        );
        Ok(())
    }
}
