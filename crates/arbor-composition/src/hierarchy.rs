//! Hierarchy root and tree-wide operations
//!
//! [`HierarchyRoot`] is the synthetic root every module hangs from. It owns
//! the tree lock, the configuration, the engine and part factories, the
//! coordination thread, and the edge table mirroring every provider link.
//! Dropping the root shuts the tree down.

use crate::controller::{Controller, Module};
use crate::dispatcher::DedicatedDispatcher;
use crate::engine::default_engine_factory;
use crate::lock::HierarchyLock;
use crate::node::{Node, ParentLink};
use crate::part_factory::PartFactory;
use crate::propagation;
use arbor_core::{
    AggregateError, ArborConfig, ArborError, CoordinationThread, EngineFactory, ExportsChange,
    HierarchyConfig, NodeId, PartEngine, Result, ScopeRadius,
};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};

/// A provider link as recorded in the edge table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HierarchyEdge {
    /// Node whose filter holds the provider
    pub holder: NodeId,
    /// Node whose local provider is held
    pub provider: NodeId,
    /// Radius of the holding filter
    pub radius: ScopeRadius,
}

#[derive(Default)]
pub(crate) struct TreeState {
    pub(crate) modules: Vec<Arc<Node>>,
    pub(crate) registry: IndexMap<NodeId, Weak<Node>>,
    pub(crate) edges: IndexMap<(NodeId, NodeId), ScopeRadius>,
}

pub(crate) struct HierarchyShared {
    pub(crate) lock: HierarchyLock,
    pub(crate) tree: Mutex<TreeState>,
    config: HierarchyConfig,
    engine_factory: EngineFactory,
    part_factory: PartFactory,
    dispatcher: Arc<dyn CoordinationThread>,
}

impl HierarchyShared {
    pub(crate) fn config(&self) -> &HierarchyConfig {
        &self.config
    }

    pub(crate) fn part_factory(&self) -> &PartFactory {
        &self.part_factory
    }

    pub(crate) fn dispatcher(&self) -> Arc<dyn CoordinationThread> {
        Arc::clone(&self.dispatcher)
    }

    pub(crate) fn create_engine(&self) -> Arc<dyn PartEngine> {
        (self.engine_factory)()
    }

    fn install(&self, node: &Arc<Node>, parent: Option<&Arc<Node>>) {
        node.controller().context().install(Arc::clone(node));
        let mut tree = self.tree.lock();
        tree.registry.insert(node.id(), Arc::downgrade(node));
        propagation::attach(&mut tree, node);
        match parent {
            Some(parent) => parent.children.write().push(Arc::clone(node)),
            None => tree.modules.push(Arc::clone(node)),
        }
    }

    /// Attach `child` beneath `parent`
    pub(crate) fn activate_under(
        self: &Arc<Self>,
        child: Arc<dyn Controller>,
        parent: Arc<Node>,
    ) -> Result<Arc<Node>> {
        let span = tracing::debug_span!(
            "activate",
            controller = %child.context().id(),
            parent = %parent.id()
        );
        let _enter = span.enter();

        let node = {
            let _guard = self.lock.write()?;
            if !parent.belongs_to(self) {
                return Err(ArborError::invalid_activation(
                    "parent",
                    "activated in a different hierarchy",
                ));
            }
            if !parent.is_active() {
                return Err(ArborError::invalid_activation(
                    "parent",
                    format!("{} is no longer activated", parent.controller().context()),
                ));
            }
            if child.context().is_activated() {
                return Err(ArborError::invalid_activation(
                    "child",
                    format!("{} is already activated", child.context()),
                ));
            }
            let node = Node::new(
                self,
                Arc::clone(&child),
                ParentLink::Node(Arc::downgrade(&parent)),
                parent.depth() + 1,
            );
            self.install(&node, Some(&parent));
            node
        };
        tracing::debug!(node = %node.id(), depth = node.depth(), "controller activated");

        child
            .on_activated()
            .map_err(|err| ArborError::lifecycle("on_activated", err))?;
        Ok(node)
    }

    /// Attach a module under the root and run its hooks
    ///
    /// `on_activated` and `initialize` run while this thread still holds the
    /// write lock, so no other thread can attach beneath the module before
    /// it is initialized. The lock is re-entrant for writes, so both hooks
    /// may activate children themselves.
    fn activate_module<M: Module>(self: &Arc<Self>, module: Arc<M>) -> Result<Arc<Node>> {
        let span = tracing::debug_span!("activate_module", controller = %module.context().id());
        let _enter = span.enter();

        let _guard = self.lock.write()?;
        if module.context().is_activated() {
            return Err(ArborError::invalid_activation(
                "module",
                format!("{} is already activated", module.context()),
            ));
        }
        let node = Node::new(
            self,
            Arc::clone(&module) as Arc<dyn Controller>,
            ParentLink::Root,
            1,
        );
        self.install(&node, None);
        tracing::debug!(node = %node.id(), "module activated");

        module
            .on_activated()
            .map_err(|err| ArborError::lifecycle("on_activated", err))?;
        module
            .initialize()
            .map_err(|err| ArborError::lifecycle("initialize", err))?;
        tracing::debug!(node = %node.id(), "module initialized");
        Ok(node)
    }

    /// Owner change plus one scope-filtered change per holder of `node`
    pub(crate) fn change_notifications(
        &self,
        node: &Arc<Node>,
        change: &ExportsChange,
    ) -> Vec<(Arc<dyn Controller>, ExportsChange)> {
        let mut notifications = vec![(Arc::clone(node.controller()), change.clone())];
        let tree = self.tree.lock();
        for ((holder, provider), radius) in &tree.edges {
            if *provider != node.id() {
                continue;
            }
            let Some(holder) = tree.registry.get(holder).and_then(Weak::upgrade) else {
                continue;
            };
            if let Some(filtered) = holder.filter(*radius).filter_change(change) {
                notifications.push((Arc::clone(holder.controller()), filtered));
            }
        }
        notifications
    }
}

/// Builder for [`HierarchyRoot`]
#[derive(Default)]
pub struct HierarchyBuilder {
    config: HierarchyConfig,
    engine_factory: Option<EngineFactory>,
    part_factory: Option<PartFactory>,
    coordination_thread: Option<Arc<dyn CoordinationThread>>,
}

impl HierarchyBuilder {
    /// Use the given configuration
    pub fn config(mut self, config: HierarchyConfig) -> Self {
        self.config = config;
        self
    }

    /// Create node engines with `factory`
    pub fn engine_factory(mut self, factory: EngineFactory) -> Self {
        self.engine_factory = Some(factory);
        self
    }

    /// Share a part factory (and its metadata cache)
    pub fn part_factory(mut self, factory: PartFactory) -> Self {
        self.part_factory = Some(factory);
        self
    }

    /// Use an existing coordination thread instead of spawning one
    pub fn coordination_thread(mut self, thread: Arc<dyn CoordinationThread>) -> Self {
        self.coordination_thread = Some(thread);
        self
    }

    /// Validate the configuration and build the root
    pub fn build(self) -> Result<HierarchyRoot> {
        self.config.validate()?;
        let dispatcher = match self.coordination_thread {
            Some(thread) => thread,
            None => Arc::new(DedicatedDispatcher::spawn(
                &self.config.coordination_thread_name,
                self.config.dispatch_queue_capacity,
            )?) as Arc<dyn CoordinationThread>,
        };
        Ok(HierarchyRoot {
            shared: Arc::new(HierarchyShared {
                lock: HierarchyLock::new(),
                tree: Mutex::new(TreeState::default()),
                config: self.config,
                engine_factory: self.engine_factory.unwrap_or_else(default_engine_factory),
                part_factory: self.part_factory.unwrap_or_default(),
                dispatcher,
            }),
        })
    }
}

/// Synthetic root of a composition hierarchy
pub struct HierarchyRoot {
    shared: Arc<HierarchyShared>,
}

impl HierarchyRoot {
    /// Root with default configuration, in-memory engines and a dedicated
    /// coordination thread
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    /// Root with explicit configuration and engine factory
    pub fn with_config(config: HierarchyConfig, engine_factory: EngineFactory) -> Result<Self> {
        Self::builder()
            .config(config)
            .engine_factory(engine_factory)
            .build()
    }

    /// Start building a root
    pub fn builder() -> HierarchyBuilder {
        HierarchyBuilder::default()
    }

    /// Active configuration
    pub fn config(&self) -> &HierarchyConfig {
        self.shared.config()
    }

    /// Coordination thread used by event brokers
    pub fn coordination_thread(&self) -> Arc<dyn CoordinationThread> {
        self.shared.dispatcher()
    }

    /// Factory turning objects into parts
    pub fn part_factory(&self) -> &PartFactory {
        self.shared.part_factory()
    }

    /// Activate `child` beneath an activated `parent`
    pub fn activate(
        &self,
        child: Arc<dyn Controller>,
        parent: &dyn Controller,
    ) -> Result<Arc<Node>> {
        let parent = parent.context().node().ok_or_else(|| {
            ArborError::invalid_activation(
                "parent",
                format!("{} is not activated", parent.context()),
            )
        })?;
        self.shared.activate_under(child, parent)
    }

    /// Activate a module under the root, then run its `initialize` hook
    ///
    /// Other threads cannot attach beneath the module until `initialize`
    /// has returned.
    pub fn activate_module<M: Module>(&self, module: Arc<M>) -> Result<Arc<Node>> {
        self.shared.activate_module(module)
    }

    /// Detach and dispose a controller's node and its subtree
    pub fn deactivate(&self, controller: &dyn Controller) -> Result<()> {
        controller.context().require_node()?.dispose()
    }

    /// Top-level modules in activation order
    pub fn modules(&self) -> Vec<Arc<Node>> {
        let _guard = self.shared.lock.read();
        self.shared.tree.lock().modules.clone()
    }

    /// Look up a live node
    pub fn find(&self, id: NodeId) -> Option<Arc<Node>> {
        let _guard = self.shared.lock.read();
        self.shared
            .tree
            .lock()
            .registry
            .get(&id)
            .and_then(Weak::upgrade)
    }

    /// Number of attached nodes
    pub fn node_count(&self) -> usize {
        let _guard = self.shared.lock.read();
        self.shared.tree.lock().registry.len()
    }

    /// Number of provider links
    pub fn edge_count(&self) -> usize {
        let _guard = self.shared.lock.read();
        self.shared.tree.lock().edges.len()
    }

    /// Snapshot of every provider link
    pub fn edges(&self) -> Vec<HierarchyEdge> {
        let _guard = self.shared.lock.read();
        self.shared
            .tree
            .lock()
            .edges
            .iter()
            .map(|(&(holder, provider), &radius)| HierarchyEdge {
                holder,
                provider,
                radius,
            })
            .collect()
    }

    /// Dispose every module subtree, newest first
    pub fn shutdown(&self) -> Result<()> {
        let modules = self.modules();
        let mut failures = AggregateError::new();
        for module in modules.iter().rev() {
            match module.dispose() {
                Ok(()) => {}
                Err(ArborError::Disposal(collected)) => failures.extend(collected),
                Err(other) => failures.push(other),
            }
        }
        tracing::debug!(modules = modules.len(), failures = failures.len(), "hierarchy shut down");
        failures.into_result()
    }
}

impl Drop for HierarchyRoot {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            tracing::warn!(error = %err, "hierarchy shutdown reported failures");
        }
    }
}

impl fmt::Debug for HierarchyRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HierarchyRoot")
            .field("config", self.config())
            .field("nodes", &self.node_count())
            .field("edges", &self.edge_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::ControllerContext;
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        context: ControllerContext,
        activated: AtomicUsize,
        initialized: AtomicUsize,
        deactivated: AtomicUsize,
    }

    impl Controller for Counting {
        fn context(&self) -> &ControllerContext {
            &self.context
        }

        fn on_activated(&self) -> std::result::Result<(), arbor_core::BoxError> {
            self.activated.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn on_deactivated(&self) -> std::result::Result<(), arbor_core::BoxError> {
            self.deactivated.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl Module for Counting {
        fn initialize(&self) -> std::result::Result<(), arbor_core::BoxError> {
            self.initialized.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_activation_preconditions() {
        let root = HierarchyRoot::new().unwrap();
        let module = Arc::new(Counting::default());
        let orphan_parent = Arc::new(Counting::default());
        let child = Arc::new(Counting::default());

        assert_matches!(
            root.activate(child.clone(), orphan_parent.as_ref()),
            Err(ArborError::InvalidActivationState { ref argument, .. }) if argument == "parent"
        );

        root.activate_module(Arc::clone(&module)).unwrap();
        root.activate(child.clone(), module.as_ref()).unwrap();
        assert_matches!(
            root.activate(child.clone(), module.as_ref()),
            Err(ArborError::InvalidActivationState { ref argument, .. }) if argument == "child"
        );
        assert_matches!(
            root.activate_module(Arc::clone(&module)),
            Err(ArborError::InvalidActivationState { ref argument, .. }) if argument == "module"
        );

        assert_eq!(module.activated.load(Ordering::SeqCst), 1);
        assert_eq!(module.initialized.load(Ordering::SeqCst), 1);
        assert_eq!(child.activated.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_parent_from_other_hierarchy_rejected() {
        let first = HierarchyRoot::new().unwrap();
        let second = HierarchyRoot::new().unwrap();
        let module = Arc::new(Counting::default());
        first.activate_module(Arc::clone(&module)).unwrap();

        let child = Arc::new(Counting::default());
        assert_matches!(
            second.activate(child.clone(), module.as_ref()),
            Err(ArborError::InvalidActivationState { .. })
        );
        assert!(!child.context.is_activated());
    }

    #[test]
    fn test_introspection() {
        let root = HierarchyRoot::new().unwrap();
        let module = Arc::new(Counting::default());
        let child = Arc::new(Counting::default());
        let grandchild = Arc::new(Counting::default());
        let module_node = root.activate_module(Arc::clone(&module)).unwrap();
        let child_node = root.activate(child.clone(), module.as_ref()).unwrap();
        let grandchild_node = child.context.activate(grandchild.clone()).unwrap();

        assert_eq!(root.modules().len(), 1);
        assert!(module_node.is_module());
        assert_eq!(grandchild_node.depth(), 3);
        assert!(grandchild_node.is_descendant_of(&module_node));
        assert!(Arc::ptr_eq(&grandchild_node.parent().unwrap(), &child_node));
        assert_eq!(module_node.descendants().len(), 2);
        assert!(root.find(child_node.id()).is_some());
        assert_eq!(root.node_count(), 3);
        assert_eq!(root.edge_count(), 6);
    }

    #[test]
    fn test_shutdown_deactivates_everything() {
        let root = HierarchyRoot::new().unwrap();
        let modules: Vec<_> = (0..3).map(|_| Arc::new(Counting::default())).collect();
        for module in &modules {
            root.activate_module(Arc::clone(module)).unwrap();
        }
        let child = Arc::new(Counting::default());
        root.activate(child.clone(), modules[0].as_ref()).unwrap();

        root.shutdown().unwrap();
        assert_eq!(root.node_count(), 0);
        assert_eq!(root.edge_count(), 0);
        assert!(root.modules().is_empty());
        for module in &modules {
            assert_eq!(module.deactivated.load(Ordering::SeqCst), 1);
            assert!(!module.context.is_activated());
        }
        assert_eq!(child.deactivated.load(Ordering::SeqCst), 1);
    }
}
